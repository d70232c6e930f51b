pub mod config;
pub mod data_sources;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod logging;
pub mod strategy;

pub use error::{ApiError, ApiResult, FieldError, ValidationErrors};
