pub mod api;

pub use api::{ApiResponse, ApiServer, AppState, RepositorySnapshot};
