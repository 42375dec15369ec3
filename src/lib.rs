//! Convergence and in-pod verification for operator-managed ActiveMQ Artemis
//! broker clusters.
//!
//! The building blocks are a bounded poll loop ([`retry`]), typed reads of
//! resource status ([`state`]) and a streaming pod-exec client ([`exec`]).
//! [`scenario`] strings them together into a full submit, converge, verify
//! and clean-up run.

pub mod exec;
pub mod resources;
pub mod retry;
pub mod scenario;
pub mod settings;
pub mod state;
pub mod store;
pub mod trace;
pub mod verify;

pub use artemis_verify_macros::test;
