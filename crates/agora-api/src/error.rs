use agora_types::NormalizeError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The server answered `{ success: false, error }`.
    #[error("{0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    Payload(#[from] NormalizeError),

    #[error("File is too large ({size} bytes, limit is {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("No community selected")]
    NoActiveCommunity,
}
