//! Helpers for testing code built on the WTP engine. They are used by the engine's own tests, and
//!  exported so that layers on top of it can drive machines deterministically in their tests:
//!  outbound PDUs and indications are captured instead of sent, and timers are fired by hand
//!  instead of by the clock.

pub mod addr;
pub mod events;
pub mod tracking;
