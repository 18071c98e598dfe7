//! Storage Layer
//!
//! JSON config loading and read-only access to the structured store.

pub mod config;
pub mod gateway;
pub mod sql_guard;

pub use config::*;
pub use gateway::*;
