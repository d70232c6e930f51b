use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{ApiError, ApiResult, FieldError};
use crate::gateway::client::ApiGateway;
use crate::strategy::types::DataSourceType;

/// Fetches a remote list (plain URL, Google Sheets, Google Docs) as flat text items.
#[async_trait]
pub trait ImportAdapter: Send + Sync {
    async fn fetch_items(&self, source_type: DataSourceType, url: &str) -> ApiResult<Vec<String>>;
}

#[derive(Serialize)]
struct ImportRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportResponse {
    Items(Vec<String>),
    Wrapped {
        #[serde(alias = "data")]
        items: Vec<String>,
    },
}

/// Delegates imports to the backend's `/strategies/import/*` endpoints.
#[derive(Clone)]
pub struct BackendImportAdapter {
    gateway: ApiGateway,
}

impl BackendImportAdapter {
    pub fn new(gateway: ApiGateway) -> Self {
        Self { gateway }
    }

    fn endpoint(source_type: DataSourceType) -> ApiResult<&'static str> {
        match source_type {
            DataSourceType::UrlImport => Ok("strategies/import/url"),
            DataSourceType::GoogleSheets => Ok("strategies/import/google-sheets"),
            DataSourceType::GoogleDocs => Ok("strategies/import/google-docs"),
            other => Err(ApiError::Validation(
                vec![FieldError::new("source_type", format!("{other} sources are not imported"))].into(),
            )),
        }
    }
}

#[async_trait]
impl ImportAdapter for BackendImportAdapter {
    #[instrument(skip(self, source_type), fields(source_type = %source_type))]
    async fn fetch_items(&self, source_type: DataSourceType, url: &str) -> ApiResult<Vec<String>> {
        let path = Self::endpoint(source_type)?;
        let response: ImportResponse = self
            .gateway
            .post(path, &ImportRequest { url })
            .await
            .map_err(|e| e.or_fallback("Failed to import data"))?;
        let items = match response {
            ImportResponse::Items(items) | ImportResponse::Wrapped { items } => items,
        };
        debug!(count = items.len(), "Imported items");
        Ok(items)
    }
}
