//! palaverd - Palaver chat daemon.
//!
//! Coordinates real-time delivery of chat messages and presence signals
//! among connected clients, and gates chat/group mutations (membership,
//! rename, deletion) behind ownership and password-based access rules.
//! Single-node by design; scaling out would need a shared presence
//! directory.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gate;
pub mod models;
pub mod network;
pub mod security;
pub mod state;
pub mod summarize;
