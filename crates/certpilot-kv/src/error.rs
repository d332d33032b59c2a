use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid value for key {key}: {details}")]
    InvalidValue { key: String, details: String },
}
