use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Request to {url} failed: {reason}")]
    TransportFailure { url: String, reason: String },

    #[error("Response from {url} could not be parsed: {reason}")]
    ParseFailure { url: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigurationFailure(String),

    #[error("MQTT bus disconnected: {0}")]
    BusDisconnection(String),

    #[error("MQTT publish failed: {0}")]
    PublishFailed(#[from] rumqttc::ClientError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    SerdeYamlError(#[from] serde_yaml::Error),
}

impl BridgeError {
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransportFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::ParseFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
