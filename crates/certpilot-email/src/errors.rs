use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Mail configuration error: {0}")]
    Configuration(String),

    #[error("Failed to build message: {0}")]
    MessageBuild(String),

    #[error("Failed to send message: {0}")]
    Send(String),
}
