/// Leader-driven seeker assignment.
pub mod coordinator;
/// Blackout and announcement consumers.
pub mod notifications;
/// Fixed-cadence loop wiring gate, coordinator and inputs.
pub mod runtime;
/// Seeker selection and the random source it draws from.
pub mod selection;
