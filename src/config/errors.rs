use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Unable to read engine config file {0}: {1}")]
    UnableToRead(String, String),

    #[error("Unable to parse engine config file {0}: {1}")]
    InvalidFormat(String, String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
