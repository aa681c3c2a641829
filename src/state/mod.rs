//! Shared real-time state: sessions, rooms and typing presence.

pub mod registry;
pub mod typing;

pub use registry::{ConnId, SessionRegistry};
pub use typing::TypingCoordinator;
