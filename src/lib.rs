//! Hidden-role minigame core: decides when a round has begun and which
//! participant seeks, and keeps every participant agreeing on it.

pub mod clock;
pub mod config;
/// Error types surfaced by the session layer, selection and configuration.
pub mod error;
pub mod scheduler;
/// Coordinator, selection, notifications and the runtime loop.
pub mod services;
pub mod session;
/// Gate and seeker-assignment state machines.
pub mod state;
