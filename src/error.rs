/// Failure taxonomy for the enrichment pipeline.
///
/// The three kinds drive retry and persistence policy:
///
/// - `Config`: credentials missing or unusable. Never retried, and the
///   matcher must not write a rejection row for it.
/// - `Temporary`: the catalog is rate-limiting, serving 5xx, or returning
///   non-JSON bodies. Retried once at the call site; must never be recorded
///   as a durable "not found", or the cooldown check would pin a false
///   negative.
/// - `Fatal`: any other failure (unexpected HTTP status, store errors,
///   contract violations). Not retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnrichError {
    #[error("discogs not configured: {0}")]
    Config(String),
    #[error("discogs temporarily unavailable: {0}")]
    Temporary(String),
    #[error("{0}")]
    Fatal(String),
}

impl EnrichError {
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Operator-facing reason tag for non-durable rejections.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "not_configured",
            Self::Temporary(_) => "temporarily_unavailable",
            Self::Fatal(_) => "error",
        }
    }
}

impl From<rusqlite::Error> for EnrichError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Fatal(format!("store error: {err}"))
    }
}
