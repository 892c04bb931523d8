use thiserror::Error;

/// Failures of the client protocol itself.
///
/// Local variants are raised before any network call and stay until the
/// precondition is fixed. The decryption variants end the call they occur
/// in; nothing is retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Wallet not connected")]
    WalletNotConnected,
    #[error("Encryption backend not initialized, call initialize() first")]
    UninitializedEncryptionBackend,
    #[error("Failed to initialize encryption backend: {0}")]
    BackendInitFailed(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Claim not available: {0}")]
    ClaimNotReady(String),
    #[error("Decryption session is {actual} but the step needs {expected}")]
    InvalidSessionState { expected: String, actual: String },
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("Decryption unavailable: {0}")]
    DecryptionUnavailable(String),
    #[error("Malformed plaintext: {0}")]
    MalformedPlaintext(String),
    #[error("Failed to fetch events: {0}")]
    FetchFailed(String),
}

/// Finds the protocol error behind an `anyhow` chain, if there is one.
pub fn protocol_error(e: &anyhow::Error) -> Option<&ProtocolError> {
    e.chain().find_map(|cause| cause.downcast_ref::<ProtocolError>())
}
