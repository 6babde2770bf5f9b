use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl From<AgentError> for String {
    fn from(err: AgentError) -> Self {
        err.to_string()
    }
}
