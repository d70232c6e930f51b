use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::data_sources::validation::validate_source;
use crate::error::{ApiError, ApiResult, FieldError, ValidationErrors};
use crate::gateway::client::{ApiGateway, ApiRequest};
use super::config_schema::{StrategyConfig, default_config};
use super::types::{
    AssignmentReceipt, CreateStrategy, DataSource, NewDataSource, ProjectAssignment,
    ProjectStrategies, RemoteCheck, Strategy, StrategyTemplate, StrategyType, UpdateStrategy,
    UploadReceipt,
};
use super::validator::validate;

const STRATEGIES_PATH: &str = "strategies/";
const TEMPLATES_PATH: &str = "strategies/templates";
const PROJECT_STRATEGIES_PATH: &str = "strategies/project-strategies";
const VALIDATE_SOURCE_PATH: &str = "strategies/validate-data-source";
const DEFAULT_CONFIGS_PATH: &str = "strategies/default-configs";
const NURTURE_VALIDATE_PATH: &str = "strategies/profile-nurture/validate-config";
const SEARCH_ENGINES_PATH: &str = "strategies/profile-nurture/search-engines";
const UPLOAD_EXTENSIONS: [&str; 2] = ["txt", "csv"];
const MAX_NAME_LEN: usize = 255;

#[derive(Serialize)]
struct TypeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy_type: Option<StrategyType>,
}

#[derive(Serialize)]
struct DomainFilter<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    domain_id: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    template_id: Option<&'a str>,
    name: &'a str,
    strategy_type: StrategyType,
    config: Value,
}

// Fields of an update response that are merged into the cached strategy
#[derive(Deserialize)]
struct StrategyPatch {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    is_active: Option<bool>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    data_sources: Option<Vec<DataSource>>,
    #[serde(default)]
    nurture_status: Option<Value>,
}

fn strategy_path(id: &str) -> String {
    format!("strategies/{id}")
}

fn check_name(name: &str, errors: &mut Vec<FieldError>) {
    let len = name.trim().chars().count();
    if len == 0 {
        errors.push(FieldError::new("name", "must not be empty"));
    } else if len > MAX_NAME_LEN {
        errors.push(FieldError::new("name", format!("must be at most {MAX_NAME_LEN} characters")));
    }
}

/// Validates `document` for `strategy_type` and returns it typed and pruned.
fn checked_config(strategy_type: StrategyType, document: Value) -> ApiResult<StrategyConfig> {
    ValidationErrors::from(validate(strategy_type, &document)).into_result()?;
    let config = StrategyConfig::from_document(strategy_type, document)
        .map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(config.pruned())
}

// The backend only parses plain-text and CSV uploads
fn check_upload_name(file_name: &str) -> ApiResult<()> {
    let extension = Path::new(file_name).extension().and_then(|ext| ext.to_str());
    if extension.is_some_and(|ext| UPLOAD_EXTENSIONS.contains(&ext)) {
        return Ok(());
    }
    Err(ApiError::Validation(
        vec![FieldError::new("file", "only .txt and .csv files can be uploaded")].into(),
    ))
}

fn not_cached(id: &str) -> ApiError {
    ApiError::Consistency(format!("strategy {id} is not loaded"))
}

/// Client-side cache of the user's strategies and the available templates.
/// The cache only changes after the backend has accepted a mutation.
pub struct StrategyRepository {
    gateway: ApiGateway,
    strategies: RwLock<Vec<Strategy>>,
    templates: RwLock<Vec<StrategyTemplate>>,
}

impl StrategyRepository {
    pub fn new(gateway: ApiGateway) -> Self {
        Self {
            gateway,
            strategies: RwLock::new(Vec::new()),
            templates: RwLock::new(Vec::new()),
        }
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    // --- Read accessors ---

    pub async fn strategies(&self) -> Vec<Strategy> {
        self.strategies.read().await.clone()
    }

    pub async fn strategy(&self, id: &str) -> Option<Strategy> {
        self.strategies.read().await.iter().find(|s| s.id == id).cloned()
    }

    pub async fn templates(&self) -> Vec<StrategyTemplate> {
        self.templates.read().await.clone()
    }

    pub async fn strategies_of_type(&self, strategy_type: StrategyType) -> Vec<Strategy> {
        self.strategies
            .read()
            .await
            .iter()
            .filter(|s| s.strategy_type == strategy_type)
            .cloned()
            .collect()
    }

    pub async fn templates_of_type(&self, strategy_type: StrategyType) -> Vec<StrategyTemplate> {
        self.templates
            .read()
            .await
            .iter()
            .filter(|t| t.strategy_type == strategy_type)
            .cloned()
            .collect()
    }

    // --- Fetches (replace the cache, keep it on failure) ---

    #[instrument(skip(self))]
    pub async fn list_templates(&self, strategy_type: Option<StrategyType>) -> ApiResult<Vec<StrategyTemplate>> {
        let request = ApiRequest::get(TEMPLATES_PATH).with_query(&TypeFilter { strategy_type })?;
        let templates: Vec<StrategyTemplate> = self
            .gateway
            .send(request)
            .await
            .map_err(|e| e.or_fallback("Failed to load strategy templates"))?;
        debug!(count = templates.len(), "Templates fetched");
        *self.templates.write().await = templates.clone();
        Ok(templates)
    }

    #[instrument(skip(self))]
    pub async fn list_strategies(&self, strategy_type: Option<StrategyType>) -> ApiResult<Vec<Strategy>> {
        let request = ApiRequest::get(STRATEGIES_PATH).with_query(&TypeFilter { strategy_type })?;
        let strategies: Vec<Strategy> = self
            .gateway
            .send(request)
            .await
            .map_err(|e| e.or_fallback("Failed to load strategies"))?;
        debug!(count = strategies.len(), "Strategies fetched");
        *self.strategies.write().await = strategies.clone();
        Ok(strategies)
    }

    // --- Mutations ---

    /// Creates a strategy. Without a config the type's default is stored;
    /// a supplied config is validated, then pruned to its active variant.
    #[instrument(skip(self, new_strategy), fields(name = %new_strategy.name, strategy_type = %new_strategy.strategy_type))]
    pub async fn create(&self, new_strategy: CreateStrategy) -> ApiResult<Strategy> {
        let mut errors = Vec::new();
        check_name(&new_strategy.name, &mut errors);
        ValidationErrors::from(errors).into_result()?;

        let config = match new_strategy.config {
            Some(document) => checked_config(new_strategy.strategy_type, document)?,
            None => default_config(new_strategy.strategy_type),
        };

        let body = CreateBody {
            template_id: new_strategy.template_id.as_deref(),
            name: new_strategy.name.trim(),
            strategy_type: new_strategy.strategy_type,
            config: config.to_document(),
        };
        let created: Strategy = self
            .gateway
            .post(STRATEGIES_PATH, &body)
            .await
            .map_err(|e| e.or_fallback("Failed to create strategy"))?;

        self.strategies.write().await.push(created.clone());
        info!(strategy_id = %created.id, "Strategy created");
        Ok(created)
    }

    /// Submits a partial update and merges the response into the cached entry.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: &str, changes: UpdateStrategy) -> ApiResult<Strategy> {
        let cached = self.strategy(id).await.ok_or_else(|| not_cached(id))?;

        let mut errors = Vec::new();
        if let Some(name) = &changes.name {
            check_name(name, &mut errors);
        }
        ValidationErrors::from(errors).into_result()?;

        let mut body = changes;
        if let Some(document) = body.config.take() {
            body.config = Some(checked_config(cached.strategy_type, document)?.to_document());
        }

        let patch: StrategyPatch = self
            .gateway
            .put(&strategy_path(id), &body)
            .await
            .map_err(|e| e.or_fallback("Failed to update strategy"))?;

        // The type is fixed at creation, so the cached type decides the variant.
        // Decoded before merging: a failed decode leaves the entry untouched.
        let config = patch
            .config
            .map(|document| StrategyConfig::from_document(cached.strategy_type, document))
            .transpose()
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        let mut strategies = self.strategies.write().await;
        let entry = strategies.iter_mut().find(|s| s.id == id).ok_or_else(|| not_cached(id))?;
        if let Some(name) = patch.name {
            entry.name = name;
        }
        if let Some(config) = config {
            entry.config = config;
        }
        if let Some(is_active) = patch.is_active {
            entry.is_active = is_active;
        }
        if let Some(updated_at) = patch.updated_at {
            entry.updated_at = updated_at;
        }
        if let Some(data_sources) = patch.data_sources {
            entry.data_sources = data_sources;
        }
        if patch.nurture_status.is_some() {
            entry.nurture_status = patch.nurture_status;
        }
        info!(strategy_id = %id, "Strategy updated");
        Ok(entry.clone())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> ApiResult<()> {
        if self.strategy(id).await.is_none() {
            return Err(not_cached(id));
        }
        self.gateway
            .delete(&strategy_path(id))
            .await
            .map_err(|e| e.or_fallback("Failed to delete strategy"))?;

        // Data sources go with the strategy, the backend cascades them
        self.strategies.write().await.retain(|s| s.id != id);
        info!(strategy_id = %id, "Strategy deleted");
        Ok(())
    }

    #[instrument(skip(self, source), fields(source_type = %source.source_type))]
    pub async fn add_data_source(&self, strategy_id: &str, source: NewDataSource) -> ApiResult<DataSource> {
        ValidationErrors::from(validate_source(&source)).into_result()?;
        if self.strategy(strategy_id).await.is_none() {
            return Err(not_cached(strategy_id));
        }

        let mut added: DataSource = self
            .gateway
            .post(&format!("{}/data-sources", strategy_path(strategy_id)), &source)
            .await
            .map_err(|e| e.or_fallback("Failed to add data source"))?;
        // The backend does not echo the payload back
        if added.data_content.is_none() {
            added.data_content = source.data_content;
        }
        if added.source_url.is_none() {
            added.source_url = source.source_url;
        }

        let mut strategies = self.strategies.write().await;
        let entry = strategies
            .iter_mut()
            .find(|s| s.id == strategy_id)
            .ok_or_else(|| not_cached(strategy_id))?;
        entry.data_sources.push(added.clone());
        info!(strategy_id, data_source_id = %added.id, items = added.items_count, "Data source added");
        Ok(added)
    }

    /// Copies a cached strategy under a new name. Runs as create, then one
    /// add_data_source per source, then a full list refresh; until the
    /// refresh lands the copy may show without its sources.
    #[instrument(skip(self), fields(on_close = true))]
    pub async fn duplicate(&self, id: &str, new_name: &str) -> ApiResult<Strategy> {
        let original = self.strategy(id).await.ok_or_else(|| not_cached(id))?;

        let copy_request = CreateStrategy {
            name: new_name.to_string(),
            strategy_type: original.strategy_type,
            template_id: original.template_id.clone(),
            config: Some(original.config.to_document()),
        };
        let copy = self.create(copy_request).await?;

        let mut first_error = None;
        for source in &original.data_sources {
            let replay = source.to_new();
            if !validate_source(&replay).is_empty() {
                warn!(data_source_id = %source.id, "Source payload unknown locally, not copied");
                continue;
            }
            if let Err(e) = self.add_data_source(&copy.id, replay).await {
                warn!(data_source_id = %source.id, error = %e, "Failed to copy data source");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        self.list_strategies(None).await?;
        if let Some(e) = first_error {
            return Err(e);
        }
        let refreshed = self.strategy(&copy.id).await.ok_or_else(|| {
            ApiError::Consistency(format!("duplicated strategy {} missing after refresh", copy.id))
        })?;
        info!(source_id = %id, strategy_id = %refreshed.id, "Strategy duplicated");
        Ok(refreshed)
    }

    /// Uploads a list file as a file source. The backend answers with a
    /// receipt only, so the whole strategy list is refetched afterwards.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn upload_data_file(&self, strategy_id: &str, file_name: &str, content: &[u8]) -> ApiResult<UploadReceipt> {
        check_upload_name(file_name)?;
        if self.strategy(strategy_id).await.is_none() {
            return Err(not_cached(strategy_id));
        }

        let receipt: UploadReceipt = self
            .gateway
            .upload(&format!("{}/data-sources/upload-file", strategy_path(strategy_id)), file_name, content)
            .await
            .map_err(|e| e.or_fallback("Failed to upload data file"))?;
        info!(strategy_id, data_source_id = %receipt.data_source_id, items = receipt.items_count, "Data file uploaded");

        self.list_strategies(None).await?;
        Ok(receipt)
    }

    /// Asks the backend to check a source draft. Local rules run first.
    #[instrument(skip(self, source), fields(source_type = %source.source_type))]
    pub async fn validate_data_source(&self, source: &NewDataSource) -> ApiResult<RemoteCheck> {
        ValidationErrors::from(validate_source(source)).into_result()?;
        self.gateway
            .post(VALIDATE_SOURCE_PATH, source)
            .await
            .map_err(|e| e.or_fallback("Failed to validate data source"))
    }

    /// Dry run of a query source against a cached strategy; nothing is stored.
    #[instrument(skip(self, source), fields(source_type = %source.source_type))]
    pub async fn test_query_source(&self, strategy_id: &str, source: &NewDataSource) -> ApiResult<RemoteCheck> {
        ValidationErrors::from(validate_source(source)).into_result()?;
        if self.strategy(strategy_id).await.is_none() {
            return Err(not_cached(strategy_id));
        }
        self.gateway
            .post(&format!("{}/test-query-source", strategy_path(strategy_id)), source)
            .await
            .map_err(|e| e.or_fallback("Failed to test query source"))
    }

    /// Server-side check of a profile-nurture config. A document the local
    /// validator rejects is not sent.
    #[instrument(skip_all)]
    pub async fn validate_nurture_config(&self, document: &Value) -> ApiResult<RemoteCheck> {
        ValidationErrors::from(validate(StrategyType::ProfileNurture, document)).into_result()?;
        self.gateway
            .post(NURTURE_VALIDATE_PATH, document)
            .await
            .map_err(|e| e.or_fallback("Failed to validate nurture config"))
    }

    #[instrument(skip(self))]
    pub async fn search_engines(&self) -> ApiResult<Vec<String>> {
        self.gateway
            .get(SEARCH_ENGINES_PATH)
            .await
            .map_err(|e| e.or_fallback("Failed to load search engines"))
    }

    /// Backend defaults per strategy type. Types the backend leaves out fall
    /// back to the local default.
    #[instrument(skip(self))]
    pub async fn default_configs(&self) -> ApiResult<HashMap<StrategyType, StrategyConfig>> {
        let mut documents: serde_json::Map<String, Value> = self
            .gateway
            .get(DEFAULT_CONFIGS_PATH)
            .await
            .map_err(|e| e.or_fallback("Failed to load default configs"))?;

        let mut configs = HashMap::with_capacity(StrategyType::ALL.len());
        for strategy_type in StrategyType::ALL {
            let config = match documents.remove(strategy_type.as_str()) {
                Some(document) => StrategyConfig::from_document(strategy_type, document)
                    .map_err(|e| ApiError::Decode(format!("{strategy_type} default config: {e}")))?,
                None => {
                    debug!(%strategy_type, "No backend default, using the local one");
                    default_config(strategy_type)
                }
            };
            configs.insert(strategy_type, config);
        }
        Ok(configs)
    }

    // --- Project assignment and nurture helpers ---

    /// Assigns cached strategies to a project. At least one strategy is
    /// required and each must be of the slot's type.
    #[instrument(skip(self, assignment), fields(domain_id = ?assignment.domain_id))]
    pub async fn assign_to_project(&self, assignment: &ProjectAssignment) -> ApiResult<AssignmentReceipt> {
        let slots = assignment.assigned();
        if slots.is_empty() {
            return Err(ApiError::Validation(
                vec![FieldError::new("strategies", "select at least one strategy")].into(),
            ));
        }

        let mut errors = Vec::new();
        {
            let strategies = self.strategies.read().await;
            for (expected, id) in &slots {
                let strategy = strategies.iter().find(|s| s.id == *id).ok_or_else(|| not_cached(id))?;
                if strategy.strategy_type != *expected {
                    errors.push(FieldError::new(
                        format!("{expected}_strategy_id"),
                        format!("strategy {id} is a {} strategy", strategy.strategy_type),
                    ));
                }
            }
        }
        ValidationErrors::from(errors).into_result()?;

        let receipt: AssignmentReceipt = self
            .gateway
            .post(PROJECT_STRATEGIES_PATH, assignment)
            .await
            .map_err(|e| e.or_fallback("Failed to assign strategies"))?;
        info!(assignment_id = %receipt.assignment_id, "Strategies assigned to project");
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn project_assignments(&self, domain_id: Option<&str>) -> ApiResult<Vec<ProjectStrategies>> {
        let request = ApiRequest::get(PROJECT_STRATEGIES_PATH).with_query(&DomainFilter { domain_id })?;
        self.gateway
            .send(request)
            .await
            .map_err(|e| e.or_fallback("Failed to load project strategies"))
    }

    /// Progress document of a profile-nurture strategy.
    #[instrument(skip(self))]
    pub async fn nurture_progress(&self, id: &str) -> ApiResult<Value> {
        let strategy = self.strategy(id).await.ok_or_else(|| not_cached(id))?;
        if strategy.strategy_type != StrategyType::ProfileNurture {
            return Err(ApiError::Consistency(format!(
                "strategy {id} is a {} strategy, not profile_nurture",
                strategy.strategy_type
            )));
        }
        self.gateway
            .get(&format!("{}/nurture-progress", strategy_path(id)))
            .await
            .map_err(|e| e.or_fallback("Failed to load nurture progress"))
    }
}
