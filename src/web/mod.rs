pub mod api;
pub mod api_doc;
pub mod auth;
pub mod server;
pub mod store;

pub use auth::AppState;
pub use server::{router, run_server};
pub use store::Store;
