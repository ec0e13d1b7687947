//! REST side of the chat client: paged direct conversation history and
//! attachment uploads.

pub mod client;
pub mod conversations;
pub mod error;
pub mod files;
pub mod loader;

pub use client::{ApiClient, ApiConfig, MAX_UPLOAD_BYTES};
pub use error::ApiError;
pub use loader::{ConversationLoader, LoadedPage};
