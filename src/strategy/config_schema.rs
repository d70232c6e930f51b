use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::strategy_constants::DEFAULT_YANDEX_DOMAIN;
use super::types::StrategyType;

// --- SHARED SHAPES ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Desktop,
    Mobile,
}

/// Percent split between direct site visits and search-driven visits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitProportions {
    pub direct_visits: i64,
    pub search_visits: i64,
}

impl VisitProportions {
    /// `None` when the sum does not fit in an i64.
    pub fn total(&self) -> Option<i64> {
        self.direct_visits.checked_add(self.search_visits)
    }
}

// --- WARMUP ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupType {
    Direct,
    Search,
    #[default]
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    #[serde(rename = "type")]
    pub warmup_type: WarmupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proportions: Option<VisitProportions>, // only meaningful for mixed
    pub min_sites: i64,
    pub max_sites: i64,
    pub session_timeout: i64, // seconds
    pub yandex_domain: String,
    pub device_type: DeviceType,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            warmup_type: WarmupType::Mixed,
            proportions: Some(VisitProportions {
                direct_visits: 30,
                search_visits: 70,
            }),
            min_sites: 3,
            max_sites: 7,
            session_timeout: 15,
            yandex_domain: DEFAULT_YANDEX_DOMAIN.to_string(),
            device_type: DeviceType::Desktop,
            extra: Map::new(),
        }
    }
}

// --- POSITION CHECK ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionCheckBehavior {
    pub random_delays: bool,
    pub scroll_pages: bool,
    pub human_like_clicks: bool,
}

impl Default for PositionCheckBehavior {
    fn default() -> Self {
        Self {
            random_delays: true,
            scroll_pages: true,
            human_like_clicks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionCheckConfig {
    pub check_frequency: CheckFrequency,
    #[serde(default)]
    pub custom_schedule: Option<String>, // cron expression, custom frequency only
    pub yandex_domain: String,
    pub device_type: DeviceType,
    pub max_pages: i64,
    pub behavior: PositionCheckBehavior,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PositionCheckConfig {
    fn default() -> Self {
        Self {
            check_frequency: CheckFrequency::Daily,
            custom_schedule: None,
            yandex_domain: DEFAULT_YANDEX_DOMAIN.to_string(),
            device_type: DeviceType::Desktop,
            max_pages: 10,
            behavior: PositionCheckBehavior::default(),
            extra: Map::new(),
        }
    }
}

// --- PROFILE NURTURE ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NurtureType {
    #[default]
    SearchBased,
    DirectVisits,
    MixedNurture,
}

impl NurtureType {
    pub fn label(&self) -> &'static str {
        match self {
            NurtureType::SearchBased => "Via search",
            NurtureType::DirectVisits => "Direct visits",
            NurtureType::MixedNurture => "Mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySourceType {
    #[default]
    ManualInput,
    FileUpload,
    #[serde(alias = "url_import")]
    UrlEndpoint,
    GoogleDocs,
    GoogleSheets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NurtureSessionConfig {
    pub timeout_per_site: i64,
    pub min_timeout: i64,
    pub max_timeout: i64,
}

impl Default for NurtureSessionConfig {
    fn default() -> Self {
        Self {
            timeout_per_site: 15,
            min_timeout: 10,
            max_timeout: 30,
        }
    }
}

/// Where search queries (or direct-visit sites) come from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueriesSource {
    #[serde(rename = "type", default)]
    pub source_type: QuerySourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_content: Option<String>,
    #[serde(default)]
    pub refresh_on_each_cycle: bool,
}

impl QueriesSource {
    /// Manual source with blank content, left in place when queries are unused.
    pub fn empty_manual() -> Self {
        Self {
            source_type: QuerySourceType::ManualInput,
            source_url: Some(String::new()),
            data_content: Some(String::new()),
            refresh_on_each_cycle: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NurtureBehavior {
    pub return_to_search: bool,
    pub close_browser_after_cycle: bool,
    pub emulate_human_actions: bool,
    pub scroll_pages: bool,
    pub random_clicks: bool,
}

impl Default for NurtureBehavior {
    fn default() -> Self {
        Self {
            return_to_search: true,
            close_browser_after_cycle: false,
            emulate_human_actions: true,
            scroll_pages: true,
            random_clicks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileNurtureConfig {
    pub nurture_type: NurtureType,
    pub target_cookies: CountRange,
    pub session_config: NurtureSessionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_engines: Option<Vec<String>>,
    pub queries_source: QueriesSource,
    pub behavior: NurtureBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proportions: Option<VisitProportions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_sites_source: Option<QueriesSource>,
    pub min_profiles_limit: i64,
    pub max_profiles_limit: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ProfileNurtureConfig {
    fn default() -> Self {
        Self {
            nurture_type: NurtureType::SearchBased,
            target_cookies: CountRange { min: 50, max: 100 },
            session_config: NurtureSessionConfig::default(),
            search_engines: Some(vec![DEFAULT_YANDEX_DOMAIN.to_string()]),
            queries_source: QueriesSource::default(),
            behavior: NurtureBehavior::default(),
            proportions: None,
            direct_sites_source: None,
            min_profiles_limit: 10,
            max_profiles_limit: 100,
            extra: Map::new(),
        }
    }
}

// --- TAGGED UNION ---

/// Strategy configuration; the variant always matches the owning strategy's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StrategyConfig {
    Warmup(WarmupConfig),
    PositionCheck(PositionCheckConfig),
    ProfileNurture(ProfileNurtureConfig),
}

impl StrategyConfig {
    /// Types a raw configuration document for `strategy_type`. Missing fields
    /// take their defaults; optional sub-structures stay absent.
    pub fn from_document(strategy_type: StrategyType, document: Value) -> Result<Self, serde_json::Error> {
        let document = match document {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Ok(match strategy_type {
            StrategyType::Warmup => StrategyConfig::Warmup(serde_json::from_value(document)?),
            StrategyType::PositionCheck => StrategyConfig::PositionCheck(serde_json::from_value(document)?),
            StrategyType::ProfileNurture => StrategyConfig::ProfileNurture(serde_json::from_value(document)?),
        })
    }

    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyConfig::Warmup(_) => StrategyType::Warmup,
            StrategyConfig::PositionCheck(_) => StrategyType::PositionCheck,
            StrategyConfig::ProfileNurture(_) => StrategyType::ProfileNurture,
        }
    }

    /// Drops the sub-structures the selected variant does not use.
    pub fn pruned(self) -> Self {
        match self {
            StrategyConfig::Warmup(mut cfg) => {
                if cfg.warmup_type != WarmupType::Mixed {
                    cfg.proportions = None;
                }
                StrategyConfig::Warmup(cfg)
            }
            StrategyConfig::PositionCheck(mut cfg) => {
                if cfg.check_frequency != CheckFrequency::Custom {
                    cfg.custom_schedule = None;
                }
                StrategyConfig::PositionCheck(cfg)
            }
            StrategyConfig::ProfileNurture(mut cfg) => {
                match cfg.nurture_type {
                    NurtureType::SearchBased => {
                        cfg.direct_sites_source = None;
                        cfg.proportions = None;
                    }
                    NurtureType::DirectVisits => {
                        cfg.search_engines = None;
                        cfg.proportions = None;
                        cfg.queries_source = QueriesSource::empty_manual();
                    }
                    NurtureType::MixedNurture => {}
                }
                StrategyConfig::ProfileNurture(cfg)
            }
        }
    }
}

pub fn default_config(strategy_type: StrategyType) -> StrategyConfig {
    match strategy_type {
        StrategyType::Warmup => StrategyConfig::Warmup(WarmupConfig::default()),
        StrategyType::PositionCheck => StrategyConfig::PositionCheck(PositionCheckConfig::default()),
        StrategyType::ProfileNurture => StrategyConfig::ProfileNurture(ProfileNurtureConfig::default()),
    }
}

pub fn prune(config: StrategyConfig) -> StrategyConfig {
    config.pruned()
}

/// Name of the field selecting the active variant of each configuration type.
pub fn discriminator_field(strategy_type: StrategyType) -> &'static str {
    match strategy_type {
        StrategyType::Warmup => "type",
        StrategyType::PositionCheck => "check_frequency",
        StrategyType::ProfileNurture => "nurture_type",
    }
}
