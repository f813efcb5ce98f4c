#[derive(Debug, thiserror::Error)]
pub enum AbrError {
    #[error("manifest parse error: {reason}")]
    Parse { reason: String },

    #[error("resource not found: {resource}")]
    ResourceNotFound { resource: String },

    #[error("transient fetch error for `{segment}`: {reason}")]
    TransientFetch { segment: String, reason: String },

    #[error("segment `{segment}` dropped after {attempts} attempts: {source}")]
    RetriesExhausted {
        segment: String,
        attempts: u32,
        #[source]
        source: Box<AbrError>,
    },

    #[error("invalid quality override {index}: ladder has {len} levels")]
    InvalidOverride { index: usize, len: usize },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("playback session is closed")]
    SessionClosed,

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl AbrError {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
        }
    }

    pub fn transient(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransientFetch {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether a fetch that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientFetch { .. } | Self::Io { .. } => true,
            Self::Parse { .. }
            | Self::ResourceNotFound { .. }
            | Self::RetriesExhausted { .. }
            | Self::InvalidOverride { .. }
            | Self::Cancelled
            | Self::Configuration { .. }
            | Self::SessionClosed => false,
        }
    }

    /// Whether the failure means the referenced resource will never be available.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            Self::ResourceNotFound { .. } => true,
            Self::RetriesExhausted { source, .. } => source.is_end_of_stream(),
            _ => false,
        }
    }
}

pub type Result<T, E = AbrError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(AbrError::transient("seg-1.ts", "connection reset").is_retryable());
        assert!(!AbrError::not_found("seg-1.ts").is_retryable());
        assert!(!AbrError::parse("no variants").is_retryable());
        assert!(!AbrError::Cancelled.is_retryable());
    }

    #[test]
    fn exhausted_not_found_is_end_of_stream() {
        let err = AbrError::RetriesExhausted {
            segment: "seg-9.ts".to_string(),
            attempts: 1,
            source: Box::new(AbrError::not_found("seg-9.ts")),
        };
        assert!(err.is_end_of_stream());

        let err = AbrError::RetriesExhausted {
            segment: "seg-9.ts".to_string(),
            attempts: 3,
            source: Box::new(AbrError::transient("seg-9.ts", "timeout")),
        };
        assert!(!err.is_end_of_stream());
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
