pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod stream;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::*;
pub use stream::SessionRegistry;
