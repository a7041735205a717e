//! Scheduler runner -- owns the registry and drives it from a clock thread.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, shared state, registration, and accessors
//! - `execution`: one tick's dispatch pass and hook invocation
//! - `clock`: the clock thread and its interval timer
//! - `lifecycle`: start / stop / close state machine

mod clock;
mod core;
mod execution;
mod lifecycle;

pub use self::core::Scheduler;
