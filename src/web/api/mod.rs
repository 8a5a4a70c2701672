pub mod catalog;
pub mod error;
pub mod trips;

use serde::Serialize;

/// List responses are wrapped in `data`, as the collection API does.
#[derive(Debug, Serialize)]
pub struct DataList<T> {
    pub data: Vec<T>,
}

impl<T> DataList<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}
