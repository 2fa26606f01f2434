use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("nonce length must be non-zero")]
    EmptyNonce,
}
