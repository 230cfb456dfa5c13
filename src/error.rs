//! Error types for the Service Ingress Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// The addressed object does not exist in the API server
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// An object with the same name already exists
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// A queue key could not be split into namespace and name
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    /// The local object cache could not answer a lookup
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    /// Map a kube error for `kind`/`key`, keeping 404 and 409 distinguishable
    pub fn from_kube(err: kube::Error, kind: &'static str, key: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Error::NotFound {
                kind,
                key: key.into(),
            },
            kube::Error::Api(api_err) if api_err.code == 409 => Error::AlreadyExists {
                kind,
                key: key.into(),
            },
            other => Error::Kube(other),
        }
    }

    /// Whether this error means the object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether this error means the object is already present
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    /// Whether retrying the same key can succeed
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Error::InvalidKey(_) | Error::Config(_))
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::Kube(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn not_found_is_distinguishable() {
        let err = Error::from_kube(api_error(404), "Ingress", "default/web");
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert_eq!(err.to_string(), "Ingress not found: default/web");
    }

    #[test]
    fn conflict_maps_to_already_exists() {
        let err = Error::from_kube(api_error(409), "Ingress", "default/web");
        assert!(err.is_already_exists());
    }

    #[test]
    fn invalid_keys_are_not_retried() {
        assert!(!Error::InvalidKey("a/b/c".to_string()).is_retriable());
        assert!(Error::cache("not synced").is_retriable());
    }

    #[test]
    fn other_api_errors_stay_kube_errors() {
        let err = Error::from_kube(api_error(500), "Ingress", "default/web");
        assert!(matches!(err, Error::Kube(_)));
    }
}
