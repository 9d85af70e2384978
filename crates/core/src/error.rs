use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An object or rule is missing the fields its identity key is built from.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("config error: {0}")]
    Config(String),
}
