//! Utilities for testing code that builds on peer replication: an in-memory socket for driving
//!  connections without a network, and a listener that turns callbacks into awaitable events.
//!
//! They are part of the crate's regular (non-#[cfg(test)]) code so that applications can use
//!  them in their own tests.

pub mod listener;
pub mod socket;
