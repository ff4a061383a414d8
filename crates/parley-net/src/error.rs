use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Handshake error: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Credential cannot be sent as a header")]
    InvalidCredential,
}
