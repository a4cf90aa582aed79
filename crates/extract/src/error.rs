/// Why a single chunk could not be extracted.
///
/// None of these abort a run: the driver records the kind and moves on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    /// Connection refused, timeout, 5xx. Worth retrying with backoff.
    #[error("transient service error: {0}")]
    Transient(String),

    /// The service answered, but not with a payload matching the schema.
    #[error("malformed output: {reason}")]
    MalformedOutput { reason: String, raw: String },

    /// Retries exhausted, or the service rejected the request outright.
    #[error("service unreachable after {attempts} attempt(s): {last_error}")]
    Unreachable { attempts: usize, last_error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Malformed,
    Unreachable,
}

impl ExtractionError {
    pub fn malformed(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::MalformedOutput {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::MalformedOutput { .. } => ErrorKind::Malformed,
            Self::Unreachable { .. } => ErrorKind::Unreachable,
        }
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Unreachable => "unreachable",
        }
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return classify_status(status.as_u16(), err.to_string());
        }
        // Timeouts, refused connections and broken response bodies all
        // look the same from here: the service may recover.
        ExtractionError::Transient(err.to_string())
    }
}

/// Server-side trouble and throttling are transient; any other rejection
/// (unknown model, bad route) will not improve by asking again.
pub fn classify_status(status: u16, message: String) -> ExtractionError {
    match status {
        408 | 429 | 500..=599 => ExtractionError::Transient(format!("HTTP {}: {}", status, message)),
        _ => ExtractionError::Unreachable {
            attempts: 1,
            last_error: format!("HTTP {}: {}", status, message),
        },
    }
}
