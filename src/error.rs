use thiserror::Error;

/// Result type for WeBack operations
pub type Result<T> = std::result::Result<T, WebackError>;

/// Reasons the WeBack auth server gives for refusing a login
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// The `application` name is not recognized (it is case sensitive)
    #[error("application is not recognized, check the application name")]
    UnknownApplication,

    /// The account does not exist for this region
    #[error("user does not exist, check the login and the area code")]
    UnknownUser,

    /// The password was rejected
    #[error("wrong password")]
    WrongPassword,

    /// Any other refusal reported by the server
    #[error("service refused the request: {0}")]
    Service(String),
}

impl AuthFailure {
    /// Classify the `msg` field of a failed API response
    pub fn from_msg(msg: &str) -> Self {
        match msg {
            "ServiceErrorException" => Self::UnknownApplication,
            "UserNotExist" => Self::UnknownUser,
            "PasswordInvalid" => Self::WrongPassword,
            other => Self::Service(other.to_string()),
        }
    }
}

/// Errors that can occur when talking to the WeBack cloud
#[derive(Error, Debug)]
pub enum WebackError {
    /// Login or an authenticated API call was refused
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthFailure),

    /// HTTP request still failing after every retry
    #[error("Transport error: {0}")]
    Transport(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be published after every retry
    #[error("Message not delivered after {attempts} attempts")]
    DeliveryFailed {
        /// Number of send attempts made
        attempts: u32,
    },

    /// Socket was closed while sending
    #[error("Connection closed")]
    ConnectionClosed,

    /// The socket did not reach the connected state in time
    #[error("Connection timeout")]
    Timeout,

    /// Server pushed a frame of a kind this library does not know
    #[error("Unknown message from server: {0}")]
    UnknownMessage(String),

    /// Map payload is malformed or truncated
    #[error("Map decode error: {0}")]
    Decode(String),

    /// Command rejected locally, nothing was sent
    #[error("Invalid command: {0}")]
    Validation(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
