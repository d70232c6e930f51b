// --- SEARCH ENGINES ---
/// Engine domains a profile-nurture strategy may search through
pub const SEARCH_ENGINES: [&str; 8] = [
    "yandex.ru",
    "yandex.by",
    "yandex.kz",
    "yandex.tr",
    "yandex.ua",
    "mail.ru",
    "dzen.ru",
    "ya.ru",
];
pub const DEFAULT_YANDEX_DOMAIN: &str = "yandex.ru";

// --- WARMUP LIMITS ---
pub const WARMUP_SITES_RANGE: (i64, i64) = (1, 20);
pub const SESSION_TIMEOUT_RANGE: (i64, i64) = (5, 120); // seconds

// --- PROFILE NURTURE LIMITS ---
pub const PROFILES_LIMIT_RANGE: (i64, i64) = (1, 10_000);
pub const NURTURE_PROPORTIONS_TOTAL: i64 = 100; // search_visits + direct_visits

// --- DATA SOURCE PREVIEW ---
/// Below this many items a source is flagged as thin, never rejected
pub const MIN_RECOMMENDED_ITEMS: usize = 10;
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

// --- GOOGLE IMPORT URL MARKERS ---
pub const GOOGLE_SHEETS_MARKER: &str = "docs.google.com/spreadsheets";
pub const GOOGLE_DOCS_MARKER: &str = "docs.google.com/document";
