//! Real-time side of the Agora chat client: the Socket.IO connection, the
//! bindings that feed inbound events into the store, and the acknowledged
//! outbound commands.

pub mod ack;
pub mod auth;
pub mod bindings;
pub mod codec;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod notice;
pub mod outbound;
pub mod session;
pub mod typing;

pub use commands::{ChatCommands, SendMessageRequest};
pub use config::{GatewayConfig, ReconnectPolicy};
pub use connection::GatewayClient;
pub use error::GatewayError;
pub use notice::{Notice, NoticeLevel};
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use typing::TypingIndicator;
