use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config_schema::StrategyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Warmup,
    PositionCheck,
    ProfileNurture,
}

impl StrategyType {
    pub const ALL: [StrategyType; 3] = [
        StrategyType::Warmup,
        StrategyType::PositionCheck,
        StrategyType::ProfileNurture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Warmup => "warmup",
            StrategyType::PositionCheck => "position_check",
            StrategyType::ProfileNurture => "profile_nurture",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StrategyType::Warmup => "Warmup",
            StrategyType::PositionCheck => "Position check",
            StrategyType::ProfileNurture => "Profile nurture",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StrategyType::Warmup => "Warm up sites before checking their positions",
            StrategyType::PositionCheck => "Check site positions in search results",
            StrategyType::ProfileNurture => "Nurture browser profiles to avoid detection",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
    ManualList,
    FileUpload,
    UrlImport,
    GoogleSheets,
    GoogleDocs,
}

impl DataSourceType {
    /// Import types carry a `source_url`; the others carry `data_content`.
    pub fn is_import(&self) -> bool {
        matches!(
            self,
            DataSourceType::UrlImport | DataSourceType::GoogleSheets | DataSourceType::GoogleDocs
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::ManualList => "manual_list",
            DataSourceType::FileUpload => "file_upload",
            DataSourceType::UrlImport => "url_import",
            DataSourceType::GoogleSheets => "google_sheets",
            DataSourceType::GoogleDocs => "google_docs",
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Input feed attached to a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub strategy_id: String,
    pub source_type: DataSourceType,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub data_content: Option<String>, // not echoed by the backend, kept from submission
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub items_count: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl DataSource {
    /// The submission that would recreate this source, if its payload is known.
    pub fn to_new(&self) -> NewDataSource {
        NewDataSource {
            source_type: self.source_type,
            source_url: self.source_url.clone(),
            data_content: self.data_content.clone(),
            file_path: self.file_path.clone(),
        }
    }
}

/// Data source as submitted to `POST /strategies/{id}/data-sources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDataSource {
    pub source_type: DataSourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl NewDataSource {
    pub fn manual(content: impl Into<String>) -> Self {
        Self {
            source_type: DataSourceType::ManualList,
            source_url: None,
            data_content: Some(content.into()),
            file_path: None,
        }
    }

    pub fn file(content: impl Into<String>, file_path: Option<String>) -> Self {
        Self {
            source_type: DataSourceType::FileUpload,
            source_url: None,
            data_content: Some(content.into()),
            file_path,
        }
    }

    pub fn import(source_type: DataSourceType, url: impl Into<String>) -> Self {
        Self {
            source_type,
            source_url: Some(url.into()),
            data_content: None,
            file_path: None,
        }
    }
}

#[derive(Deserialize)]
struct StrategyWire {
    id: String,
    user_id: String,
    #[serde(default)]
    template_id: Option<String>,
    name: String,
    strategy_type: StrategyType,
    #[serde(default)]
    config: Value,
    #[serde(default = "default_true")]
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    data_sources: Vec<DataSource>,
    #[serde(default)]
    nurture_status: Option<Value>,
}

/// A saved, named, typed configuration owned by the signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StrategyWire")]
pub struct Strategy {
    pub id: String,
    pub user_id: String,
    pub template_id: Option<String>,
    pub name: String,
    pub strategy_type: StrategyType,
    pub config: StrategyConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub data_sources: Vec<DataSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nurture_status: Option<Value>,
}

impl TryFrom<StrategyWire> for Strategy {
    type Error = serde_json::Error;

    fn try_from(wire: StrategyWire) -> Result<Self, Self::Error> {
        Ok(Strategy {
            config: StrategyConfig::from_document(wire.strategy_type, wire.config)?,
            id: wire.id,
            user_id: wire.user_id,
            template_id: wire.template_id,
            name: wire.name,
            strategy_type: wire.strategy_type,
            is_active: wire.is_active,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            data_sources: wire.data_sources,
            nurture_status: wire.nurture_status,
        })
    }
}

#[derive(Deserialize)]
struct TemplateWire {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    strategy_type: StrategyType,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    is_system: bool,
    created_at: DateTime<Utc>,
}

/// Read-only starting point for a new strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TemplateWire")]
pub struct StrategyTemplate {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub strategy_type: StrategyType,
    pub config: StrategyConfig,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TemplateWire> for StrategyTemplate {
    type Error = serde_json::Error;

    fn try_from(wire: TemplateWire) -> Result<Self, Self::Error> {
        Ok(StrategyTemplate {
            config: StrategyConfig::from_document(wire.strategy_type, wire.config)?,
            id: wire.id,
            name: wire.name,
            description: wire.description,
            strategy_type: wire.strategy_type,
            is_system: wire.is_system,
            created_at: wire.created_at,
        })
    }
}

/// Input for creating a strategy. Without a config the type's default is used.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateStrategy {
    pub name: String,
    pub strategy_type: StrategyType,
    pub template_id: Option<String>,
    pub config: Option<Value>,
}

impl CreateStrategy {
    pub fn new(name: impl Into<String>, strategy_type: StrategyType) -> Self {
        Self {
            name: name.into(),
            strategy_type,
            template_id: None,
            config: None,
        }
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// Partial update; only populated fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateStrategy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Strategies assigned to a project (domain).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectAssignment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_strategy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_check_strategy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_nurture_strategy_id: Option<String>,
}

impl ProjectAssignment {
    /// Assigned ids paired with the type each slot requires.
    pub fn assigned(&self) -> Vec<(StrategyType, &str)> {
        [
            (StrategyType::Warmup, self.warmup_strategy_id.as_deref()),
            (StrategyType::PositionCheck, self.position_check_strategy_id.as_deref()),
            (StrategyType::ProfileNurture, self.profile_nurture_strategy_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(t, id)| id.map(|id| (t, id)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssignmentReceipt {
    #[serde(default)]
    pub success: bool,
    pub assignment_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectStrategies {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default)]
    pub warmup_strategy: Option<Strategy>,
    #[serde(default)]
    pub position_check_strategy: Option<Strategy>,
    #[serde(default)]
    pub profile_nurture_strategy: Option<Strategy>,
    pub created_at: DateTime<Utc>,
}

/// Answer of `POST /strategies/{id}/data-sources/upload-file`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub success: bool,
    pub data_source_id: String,
    #[serde(default)]
    pub items_count: u64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Backend verdict on a data source or config draft. Fields the client does
/// not model are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteCheck {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub items_count: Option<u64>,
    #[serde(default)]
    pub sample: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}
