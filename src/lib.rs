//! Retail Copilot - Rust Backend Library
//!
//! Answers retail analytics questions by routing them through a bounded
//! execution graph that blends document retrieval, read-only SQL over the
//! Northwind database and LLM synthesis. It includes:
//! - Business logic services (document index, step modules, graph, batch runner)
//! - Storage layer (JSON config, read-only SQLite gateway)
//! - Data models and utilities

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use models::batch::{BatchQuestion, OutputRecord};
pub use models::settings::AppConfig;
pub use state::AppState;
pub use utils::error::{AppError, AppResult};
