use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The item or page is not applicable and should vanish without a trace.
    #[error("{0}")]
    Ignore(String),

    /// The item was intentionally not applied.
    #[error("{0}")]
    Skip(String),

    /// The item could not be processed.
    #[error("{0}")]
    Fail(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown {kind} plugin: {id}")]
    Plugin { kind: &'static str, id: String },

    #[error("API error: {message}")]
    Api { message: String },
}

impl SyncError {
    pub fn ignore(message: impl Into<String>) -> Self {
        SyncError::Ignore(message.into())
    }

    pub fn skip(message: impl Into<String>) -> Self {
        SyncError::Skip(message.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        SyncError::Fail(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::Storage {
            message: message.into(),
        }
    }

    /// True for the Ignore/Skip/Fail signals raised deliberately by fetchers and resources.
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            SyncError::Ignore(_) | SyncError::Skip(_) | SyncError::Fail(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_signals_are_recognised() {
        assert!(SyncError::skip("locked").is_classified());
        assert!(SyncError::ignore("n/a").is_classified());
        assert!(SyncError::fail("bad").is_classified());
        assert!(!SyncError::Config("x".into()).is_classified());
        assert_eq!(SyncError::fail("bad row").to_string(), "bad row");
    }
}
