//! Shared data model and wire formats for the Agora community chat.

pub mod api;
pub mod events;
pub mod grouping;
pub mod models;
pub mod normalize;

pub use normalize::NormalizeError;
