//! Configuration error types with contextual constructors.

/// Errors raised while loading or validating router configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("failed to read configuration file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for '{field}': {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("missing required configuration: {0}")]
    Missing(String),
}

impl ConfigurationError {
    pub fn file_read_error(path: impl Into<String>, source: std::io::Error) -> Self {
        ConfigurationError::FileRead {
            path: path.into(),
            source,
        }
    }

    pub fn parse_error(path: impl Into<String>, source: serde_yaml::Error) -> Self {
        ConfigurationError::Parse {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
