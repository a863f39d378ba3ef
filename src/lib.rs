pub mod error;
pub mod clock;
pub mod config;
pub mod storage;
pub mod identity;
pub mod server;

pub use error::{AppError, AppResult};
