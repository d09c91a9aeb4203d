/// Errors crossing the adapter boundary.
///
/// RPC error messages are surfaced verbatim: they end up in
/// `rules.last_error` and operators need the data source's own words.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("no adapter configured for {0}")]
    NotConfigured(String),

    #[error("no adapters configured")]
    NoAdapters,

    #[error("{message}")]
    Rpc { code: i64, message: String },

    #[error("unsupported aggregate: {0}")]
    UnsupportedAgg(String),

    #[error("adapter transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("adapter process error: {0}")]
    Process(#[from] std::io::Error),

    #[error("adapter returned malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("adapter config error: {0}")]
    Config(String),

    #[error("adapter response missing result")]
    EmptyResponse,
}
