use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{ApiResult, FieldError, ValidationErrors};
use crate::strategy::strategy_constants::DEFAULT_SAMPLE_SIZE;
use crate::strategy::types::{DataSourceType, NewDataSource};
use super::import_adapter::ImportAdapter;
use super::parsing::{self, ParsedItems, SourcePreview};
use super::validation;

/// A data source ready to be attached to a strategy, with its item count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDraft {
    pub source: NewDataSource,
    pub items_count: usize,
}

impl SourceDraft {
    pub fn preview(&self) -> SourcePreview {
        parsing::preview(self.source.data_content.as_deref().unwrap_or_default(), DEFAULT_SAMPLE_SIZE)
    }
}

/// Normalizes manual text, files and remote imports into data sources.
#[derive(Clone)]
pub struct DataSourceManager {
    adapter: Arc<dyn ImportAdapter>,
}

impl DataSourceManager {
    pub fn new(adapter: Arc<dyn ImportAdapter>) -> Self {
        Self { adapter }
    }

    pub fn from_manual_text(&self, text: &str) -> ParsedItems {
        parsing::from_manual_text(text)
    }

    pub fn from_delimited_file(&self, text: &str) -> ParsedItems {
        parsing::from_delimited_file(text)
    }

    pub fn preview(&self, document: &str, sample_size: usize) -> SourcePreview {
        parsing::preview(document, sample_size)
    }

    pub fn validate_source(&self, source: &NewDataSource) -> Vec<FieldError> {
        validation::validate_source(source)
    }

    /// Fetches a remote list through the import adapter and turns it into a
    /// manual-list draft. The URL is checked before anything is fetched.
    #[instrument(skip(self, source_type), fields(source_type = %source_type))]
    pub async fn from_import_adapter(&self, source_type: DataSourceType, url: &str) -> ApiResult<SourceDraft> {
        ValidationErrors::from(validation::validate_source(&NewDataSource::import(source_type, url))).into_result()?;

        let items = self.adapter.fetch_items(source_type, url.trim()).await?;
        let parsed = parsing::from_items(&items);
        info!(items_count = parsed.items_count, "Import converted to manual list");
        Ok(SourceDraft {
            source: NewDataSource::manual(parsed.data_content),
            items_count: parsed.items_count,
        })
    }

    /// Reads a local list file. `.csv` files contribute their first column,
    /// anything else is one item per line.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn read_source_file(&self, path: impl AsRef<Path>) -> ApiResult<SourceDraft> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        let parsed = if is_csv {
            parsing::from_delimited_file(&text)
        } else {
            parsing::from_manual_text(&text)
        };
        Ok(SourceDraft {
            source: NewDataSource::file(parsed.data_content, Some(path.display().to_string())),
            items_count: parsed.items_count,
        })
    }
}
