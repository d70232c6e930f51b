pub mod import_adapter;
pub mod manager;
pub mod parsing;
pub mod validation;

pub use import_adapter::{BackendImportAdapter, ImportAdapter};
pub use manager::{DataSourceManager, SourceDraft};
pub use parsing::{ParsedItems, SourcePreview};
pub use validation::validate_source;
