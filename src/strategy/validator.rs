use serde_json::{Map, Value};

use crate::error::FieldError;
use super::config_schema::{
    CheckFrequency, NurtureType, PositionCheckConfig, ProfileNurtureConfig, QueriesSource,
    QuerySourceType, StrategyConfig, WarmupConfig, WarmupType,
};
use super::strategy_constants::{
    NURTURE_PROPORTIONS_TOTAL, PROFILES_LIMIT_RANGE, SEARCH_ENGINES, SESSION_TIMEOUT_RANGE,
    WARMUP_SITES_RANGE,
};
use super::types::StrategyType;

#[derive(Clone, Copy)]
enum Kind {
    String,
    Integer,
    Bool,
    Object,
    Array,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Integer => value.is_i64() || value.is_u64(),
            Kind::Bool => value.is_boolean(),
            Kind::Object => value.is_object(),
            Kind::Array => value.is_array(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::String => "a string",
            Kind::Integer => "an integer",
            Kind::Bool => "a boolean",
            Kind::Object => "an object",
            Kind::Array => "an array",
        }
    }
}

// Structural pass over one object of the document
struct Shape<'a> {
    doc: &'a Map<String, Value>,
    prefix: String,
    errors: &'a mut Vec<FieldError>,
}

impl<'a> Shape<'a> {
    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Present and non-null.
    fn has(&self, name: &str) -> bool {
        self.doc.get(name).is_some_and(|v| !v.is_null())
    }

    fn field(&mut self, name: &str, kind: Kind, required: bool) {
        match self.doc.get(name) {
            None | Some(Value::Null) => {
                if required {
                    let path = self.path(name);
                    self.errors.push(FieldError::new(path, "is required"));
                }
            }
            Some(value) if !kind.matches(value) => {
                let path = self.path(name);
                self.errors.push(FieldError::new(path, format!("must be {}", kind.name())));
            }
            Some(_) => {}
        }
    }

    fn one_of(&mut self, name: &str, allowed: &[&str], required: bool) {
        self.field(name, Kind::String, required);
        if let Some(Value::String(value)) = self.doc.get(name) {
            if !allowed.contains(&value.as_str()) {
                let path = self.path(name);
                self.errors.push(FieldError::new(
                    path,
                    format!("must be one of: {}", allowed.join(", ")),
                ));
            }
        }
    }

    /// Checks the nested object's own fields with `check`.
    fn object(&mut self, name: &str, required: bool, check: impl FnOnce(&mut Shape<'_>)) {
        self.field(name, Kind::Object, required);
        if let Some(Value::Object(inner)) = self.doc.get(name) {
            let prefix = self.path(name);
            let mut nested = Shape {
                doc: inner,
                prefix,
                errors: &mut *self.errors,
            };
            check(&mut nested);
        }
    }

    fn discriminator(&self, name: &str) -> Option<&'a str> {
        self.doc.get(name).and_then(Value::as_str)
    }
}

/// Checks a raw configuration document for `strategy_type`. An empty result
/// means the document can be typed and submitted.
pub fn validate(strategy_type: StrategyType, document: &Value) -> Vec<FieldError> {
    let Value::Object(doc) = document else {
        return vec![FieldError::new("config", "must be an object")];
    };

    let mut errors = Vec::new();
    let mut shape = Shape {
        doc,
        prefix: String::new(),
        errors: &mut errors,
    };
    match strategy_type {
        StrategyType::Warmup => warmup_shape(&mut shape),
        StrategyType::PositionCheck => position_check_shape(&mut shape),
        StrategyType::ProfileNurture => profile_nurture_shape(&mut shape),
    }
    if !errors.is_empty() {
        return errors;
    }

    match StrategyConfig::from_document(strategy_type, document.clone()) {
        Ok(StrategyConfig::Warmup(cfg)) => warmup_rules(&cfg, &mut errors),
        Ok(StrategyConfig::PositionCheck(cfg)) => position_check_rules(&cfg, &mut errors),
        Ok(StrategyConfig::ProfileNurture(cfg)) => profile_nurture_rules(&cfg, &mut errors),
        Err(e) => errors.push(FieldError::new("config", e.to_string())),
    }
    errors
}

// --- STRUCTURE ---

fn proportions_shape(shape: &mut Shape<'_>) {
    shape.field("direct_visits", Kind::Integer, true);
    shape.field("search_visits", Kind::Integer, true);
}

fn warmup_shape(shape: &mut Shape<'_>) {
    shape.one_of("type", &["direct", "search", "mixed"], true);
    let mixed = shape.discriminator("type") == Some("mixed");
    shape.object("proportions", mixed, proportions_shape);
    shape.field("min_sites", Kind::Integer, false);
    shape.field("max_sites", Kind::Integer, false);
    shape.field("session_timeout", Kind::Integer, false);
    shape.field("yandex_domain", Kind::String, false);
    shape.one_of("device_type", &["desktop", "mobile"], false);
}

fn position_check_shape(shape: &mut Shape<'_>) {
    shape.one_of("check_frequency", &["daily", "weekly", "monthly", "custom"], true);
    let custom = shape.discriminator("check_frequency") == Some("custom");
    shape.field("custom_schedule", Kind::String, custom);
    shape.field("yandex_domain", Kind::String, false);
    shape.one_of("device_type", &["desktop", "mobile"], false);
    shape.field("max_pages", Kind::Integer, false);
    shape.object("behavior", false, |b| {
        b.field("random_delays", Kind::Bool, false);
        b.field("scroll_pages", Kind::Bool, false);
        b.field("human_like_clicks", Kind::Bool, false);
    });
}

fn queries_source_shape(shape: &mut Shape<'_>) {
    shape.one_of(
        "type",
        &["manual_input", "file_upload", "url_endpoint", "url_import", "google_docs", "google_sheets"],
        true,
    );
    shape.field("source_url", Kind::String, false);
    shape.field("data_content", Kind::String, false);
    shape.field("refresh_on_each_cycle", Kind::Bool, false);
}

fn profile_nurture_shape(shape: &mut Shape<'_>) {
    shape.one_of("nurture_type", &["search_based", "direct_visits", "mixed_nurture"], true);
    let nurture_type = shape.discriminator("nurture_type");
    let needs_search = matches!(nurture_type, Some("search_based" | "mixed_nurture"));
    let needs_sites = matches!(nurture_type, Some("direct_visits" | "mixed_nurture"));

    shape.object("target_cookies", false, |t| {
        t.field("min", Kind::Integer, true);
        t.field("max", Kind::Integer, true);
    });
    shape.object("session_config", false, |s| {
        s.field("timeout_per_site", Kind::Integer, false);
        s.field("min_timeout", Kind::Integer, false);
        s.field("max_timeout", Kind::Integer, false);
    });
    shape.field("search_engines", Kind::Array, needs_search);
    shape.object("queries_source", false, queries_source_shape);
    shape.object("behavior", false, |b| {
        for flag in [
            "return_to_search",
            "close_browser_after_cycle",
            "emulate_human_actions",
            "scroll_pages",
            "random_clicks",
        ] {
            b.field(flag, Kind::Bool, false);
        }
    });
    shape.object("proportions", nurture_type == Some("mixed_nurture"), proportions_shape);
    shape.object("direct_sites_source", needs_sites, queries_source_shape);
    shape.field("min_profiles_limit", Kind::Integer, false);
    shape.field("max_profiles_limit", Kind::Integer, false);

    // Sub-structures that belong to a different nurture type
    let conflicts: &[&str] = match nurture_type {
        Some("search_based") => &["direct_sites_source", "proportions"],
        Some("direct_visits") => &["search_engines", "proportions"],
        _ => &[],
    };
    for name in conflicts {
        if shape.has(name) {
            let path = shape.path(name);
            let message = format!(
                "cannot be combined with nurture_type {}",
                nurture_type.unwrap_or_default()
            );
            shape.errors.push(FieldError::new(path, message));
        }
    }
}

// --- SEMANTIC RULES ---

fn in_range(errors: &mut Vec<FieldError>, field: &str, value: i64, (lo, hi): (i64, i64)) {
    if value < lo || value > hi {
        errors.push(FieldError::new(field, format!("must be between {lo} and {hi}")));
    }
}

fn positive(errors: &mut Vec<FieldError>, field: &str, value: i64) {
    if value < 1 {
        errors.push(FieldError::new(field, "must be positive"));
    }
}

fn ordered(errors: &mut Vec<FieldError>, min_field: &str, min: i64, max_field: &str, max: i64) {
    if min > max {
        errors.push(FieldError::new(
            min_field,
            format!("must not exceed {max_field}"),
        ));
    }
}

fn warmup_rules(cfg: &WarmupConfig, errors: &mut Vec<FieldError>) {
    in_range(errors, "min_sites", cfg.min_sites, WARMUP_SITES_RANGE);
    in_range(errors, "max_sites", cfg.max_sites, WARMUP_SITES_RANGE);
    ordered(errors, "min_sites", cfg.min_sites, "max_sites", cfg.max_sites);
    in_range(errors, "session_timeout", cfg.session_timeout, SESSION_TIMEOUT_RANGE);
    if cfg.yandex_domain.trim().is_empty() {
        errors.push(FieldError::new("yandex_domain", "must not be empty"));
    }
    if cfg.warmup_type == WarmupType::Mixed {
        if let Some(p) = &cfg.proportions {
            positive(errors, "proportions.direct_visits", p.direct_visits);
            positive(errors, "proportions.search_visits", p.search_visits);
        }
    }
}

fn position_check_rules(cfg: &PositionCheckConfig, errors: &mut Vec<FieldError>) {
    if cfg.check_frequency == CheckFrequency::Custom
        && cfg.custom_schedule.as_deref().is_none_or(|s| s.trim().is_empty())
    {
        errors.push(FieldError::new("custom_schedule", "is required for custom frequency"));
    }
    positive(errors, "max_pages", cfg.max_pages);
    if cfg.yandex_domain.trim().is_empty() {
        errors.push(FieldError::new("yandex_domain", "must not be empty"));
    }
}

fn source_rules(source: &QueriesSource, field: &str, errors: &mut Vec<FieldError>) {
    let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
    match source.source_type {
        QuerySourceType::ManualInput | QuerySourceType::FileUpload if blank(&source.data_content) => {
            errors.push(FieldError::new(format!("{field}.data_content"), "must not be empty"));
        }
        QuerySourceType::UrlEndpoint | QuerySourceType::GoogleDocs | QuerySourceType::GoogleSheets
            if blank(&source.source_url) =>
        {
            errors.push(FieldError::new(format!("{field}.source_url"), "is required"));
        }
        _ => {}
    }
}

fn profile_nurture_rules(cfg: &ProfileNurtureConfig, errors: &mut Vec<FieldError>) {
    positive(errors, "target_cookies.min", cfg.target_cookies.min);
    positive(errors, "target_cookies.max", cfg.target_cookies.max);
    ordered(errors, "target_cookies.min", cfg.target_cookies.min, "target_cookies.max", cfg.target_cookies.max);

    let session = &cfg.session_config;
    in_range(errors, "session_config.timeout_per_site", session.timeout_per_site, SESSION_TIMEOUT_RANGE);
    positive(errors, "session_config.min_timeout", session.min_timeout);
    positive(errors, "session_config.max_timeout", session.max_timeout);
    ordered(errors, "session_config.min_timeout", session.min_timeout, "session_config.max_timeout", session.max_timeout);

    if let Some(engines) = &cfg.search_engines {
        if engines.is_empty() && cfg.nurture_type != NurtureType::DirectVisits {
            errors.push(FieldError::new("search_engines", "must list at least one search engine"));
        }
        for engine in engines {
            if !SEARCH_ENGINES.contains(&engine.as_str()) {
                errors.push(FieldError::new("search_engines", format!("unknown search engine {engine}")));
            }
        }
    }

    if let Some(p) = &cfg.proportions {
        in_range(errors, "proportions.search_visits", p.search_visits, (1, NURTURE_PROPORTIONS_TOTAL));
        in_range(errors, "proportions.direct_visits", p.direct_visits, (1, NURTURE_PROPORTIONS_TOTAL));
        if p.total() != Some(NURTURE_PROPORTIONS_TOTAL) {
            errors.push(FieldError::new(
                "proportions",
                format!("must add up to {NURTURE_PROPORTIONS_TOTAL}"),
            ));
        }
    }

    if let Some(sites) = &cfg.direct_sites_source {
        source_rules(sites, "direct_sites_source", errors);
    }

    in_range(errors, "min_profiles_limit", cfg.min_profiles_limit, PROFILES_LIMIT_RANGE);
    in_range(errors, "max_profiles_limit", cfg.max_profiles_limit, PROFILES_LIMIT_RANGE);
    ordered(errors, "min_profiles_limit", cfg.min_profiles_limit, "max_profiles_limit", cfg.max_profiles_limit);
}
