use serde::Serialize;

use crate::strategy::strategy_constants::MIN_RECOMMENDED_ITEMS;

/// Normalized newline-delimited content plus its item count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedItems {
    pub items_count: usize,
    pub data_content: String,
}

/// Review statistics shown before a source is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcePreview {
    pub count: usize,
    pub sample: Vec<String>,
    pub is_empty: bool,
    pub is_below_threshold: bool,
}

/// Free text, one item per line. Content is kept as typed; only non-blank
/// lines are counted.
pub fn from_manual_text(text: &str) -> ParsedItems {
    ParsedItems {
        items_count: text.lines().filter(|l| !l.trim().is_empty()).count(),
        data_content: text.to_string(),
    }
}

/// First comma-separated column of each row, trimmed, blanks dropped.
pub fn from_delimited_file(text: &str) -> ParsedItems {
    let items: Vec<&str> = text
        .lines()
        .map(|row| row.split(',').next().unwrap_or_default().trim())
        .filter(|cell| !cell.is_empty())
        .collect();
    ParsedItems {
        items_count: items.len(),
        data_content: items.join("\n"),
    }
}

/// Wraps a flat list from an import adapter as newline-delimited content.
pub fn from_items<S: AsRef<str>>(items: &[S]) -> ParsedItems {
    let items: Vec<&str> = items
        .iter()
        .map(|i| i.as_ref().trim())
        .filter(|i| !i.is_empty())
        .collect();
    ParsedItems {
        items_count: items.len(),
        data_content: items.join("\n"),
    }
}

pub fn preview(document: &str, sample_size: usize) -> SourcePreview {
    let lines: Vec<&str> = document
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    SourcePreview {
        count: lines.len(),
        sample: lines.iter().take(sample_size).map(|l| l.to_string()).collect(),
        is_empty: lines.is_empty(),
        is_below_threshold: lines.len() < MIN_RECOMMENDED_ITEMS,
    }
}
