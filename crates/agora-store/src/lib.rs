//! Client-side chat state: conversations, presence, typing and the direct
//! chat roster, behind a shared handle that broadcasts what changed.

pub mod handle;
pub mod state;

pub use handle::ChatStoreHandle;
pub use state::{ActiveChat, ChatStore, InsertOutcome, LoadStatus, StoreChange, TYPING_TIMEOUT};
