pub mod config_schema;
pub mod repository;
pub mod strategy_constants;
pub mod types;
pub mod validator;

pub use config_schema::{StrategyConfig, default_config, discriminator_field, prune};
pub use repository::StrategyRepository;
pub use types::{
    CreateStrategy, DataSource, DataSourceType, NewDataSource, ProjectAssignment, RemoteCheck,
    Strategy, StrategyTemplate, StrategyType, UpdateStrategy, UploadReceipt,
};
pub use validator::validate;
