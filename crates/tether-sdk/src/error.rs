use thiserror::Error;

/// Malformed service registration. Fatal at startup: the plugin must not
/// begin serving until the declaration is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("service `{service}`: endpoint must start with `/`: {endpoint}")]
    InvalidEndpoint { service: String, endpoint: String },

    #[error("service `{service}`: method must be GET or POST: {method}")]
    UnsupportedMethod { service: String, method: String },

    #[error("service `{0}` is already registered")]
    DuplicateService(String),

    #[error("service `{service}`: endpoint {endpoint} is reserved for the plugin lifecycle")]
    ReservedEndpoint { service: String, endpoint: String },

    #[error("service `{service}`: {method} {endpoint} is already served by `{existing}`")]
    DuplicateEndpoint {
        service: String,
        endpoint: String,
        method: String,
        existing: String,
    },
}
