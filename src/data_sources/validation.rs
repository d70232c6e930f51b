use url::Url;

use crate::error::FieldError;
use crate::strategy::strategy_constants::{GOOGLE_DOCS_MARKER, GOOGLE_SHEETS_MARKER};
use crate::strategy::types::{DataSourceType, NewDataSource};

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Exactly one of `source_url` / `data_content` must be populated, and it
/// must be the one the source type calls for.
pub fn validate_source(source: &NewDataSource) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let url = source.source_url.as_deref();
    let content = source.data_content.as_deref();

    if url.is_some() && content.is_some() {
        errors.push(FieldError::new(
            "source",
            "source_url and data_content cannot both be set",
        ));
        return errors;
    }

    if source.source_type.is_import() {
        if content.is_some() {
            errors.push(FieldError::new(
                "data_content",
                format!("is not allowed for {} sources", source.source_type),
            ));
        }
        if is_blank(url) {
            errors.push(FieldError::new("source_url", "must not be empty"));
            return errors;
        }
        if let Some(url) = url {
            check_import_url(source.source_type, url.trim(), &mut errors);
        }
    } else {
        if url.is_some() {
            errors.push(FieldError::new(
                "source_url",
                format!("is not allowed for {} sources", source.source_type),
            ));
        }
        if is_blank(content) {
            errors.push(FieldError::new("data_content", "must not be empty"));
        }
    }
    errors
}

fn check_import_url(source_type: DataSourceType, url: &str, errors: &mut Vec<FieldError>) {
    if Url::parse(url).is_err() {
        errors.push(FieldError::new("source_url", "must be a valid URL"));
        return;
    }
    let marker = match source_type {
        DataSourceType::GoogleSheets => Some((GOOGLE_SHEETS_MARKER, "must be a Google Sheets link")),
        DataSourceType::GoogleDocs => Some((GOOGLE_DOCS_MARKER, "must be a Google Docs link")),
        _ => None,
    };
    if let Some((marker, message)) = marker {
        if !url.contains(marker) {
            errors.push(FieldError::new("source_url", message));
        }
    }
}
