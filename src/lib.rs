pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod logger;
pub mod matcher;
pub mod models;
pub mod reservation;
pub mod session;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, Result};
