//! EXABOT — exchange trade-action execution engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod exchange;
pub mod engine;
pub mod remote;
pub mod storage;
