pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod proto;
pub mod services;
pub mod snapshot;
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
