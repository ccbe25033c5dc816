/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The backend does not provide this capability.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// A backend returned listing keys that are not strictly increasing.
    #[error("keys are out of order: marker {marker:?}, last {previous:?}, current {current:?}")]
    OutOfOrder {
        marker: String,
        previous: String,
        current: String,
    },

    /// The retry policy gave up on a continuation page.
    #[error("listing gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    /// A per-shard endpoint template cannot produce distinct endpoints.
    #[error("can not generate different endpoints using {template:?}: {reason}")]
    EndpointTemplate { template: String, reason: String },

    /// An error raised by one shard of a sharded store.
    #[error("shard {index}: {source}")]
    Shard {
        index: usize,
        #[source]
        source: Box<StoreError>,
    },

    /// Requested byte range lies outside the object.
    #[error("invalid range: offset {offset} beyond object size {size}")]
    InvalidRange { offset: u64, size: u64 },

    /// The multipart upload ID is unknown to the backend.
    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    /// A completed multipart upload referenced a missing or mismatched part.
    #[error("invalid part {num} for upload {upload_id}")]
    InvalidPart { upload_id: String, num: u32 },

    /// Configuration or construction error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was abandoned through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Opaque backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Wrap an error with the index of the shard that produced it.
    pub fn in_shard(self, index: usize) -> Self {
        Self::Shard {
            index,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through shard wrappers.
    pub fn root(&self) -> &StoreError {
        match self {
            Self::Shard { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self.root(), Self::NotSupported(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_wrapper_is_transparent_to_predicates() {
        let err = StoreError::NotSupported("copy").in_shard(2);
        assert!(err.is_not_supported());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "shard 2: operation not supported: copy");
    }

    #[test]
    fn out_of_order_message_names_keys() {
        let err = StoreError::OutOfOrder {
            marker: String::new(),
            previous: "b".into(),
            current: "a".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"b\""));
        assert!(msg.contains("\"a\""));
    }
}
