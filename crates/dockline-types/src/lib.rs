//! Shared types for the Dockline realtime chat client.

mod chat;
mod frame;

pub use chat::*;
pub use frame::*;
