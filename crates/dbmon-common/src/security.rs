use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Table and column names must match `^[A-Za-z_][A-Za-z0-9_]*$` before they
/// are allowed anywhere near an adapter request.
pub fn is_safe_identifier(value: &str) -> bool {
    IDENT_RE.is_match(value)
}

/// Resource ceilings applied by validators, the sampler, and the worker
/// pool.
#[derive(Debug, Clone)]
pub struct Limits {
    pub min_poll_seconds: i64,
    pub max_poll_seconds: i64,
    pub max_window_seconds: i64,
    pub max_query_duration: Duration,
    pub max_concurrent_calls: usize,
    pub max_sample_rows: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_poll_seconds: 5,
            max_poll_seconds: 3600,
            max_window_seconds: 86_400,
            max_query_duration: Duration::from_secs(5),
            max_concurrent_calls: 8,
            max_sample_rows: 1000,
        }
    }
}

/// Table allowlist; an empty list allows every table.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    pub tables: Vec<String>,
}

impl Allowlist {
    pub fn allows_table(&self, table: &str) -> bool {
        self.tables.is_empty() || self.tables.iter().any(|t| t == table)
    }
}
