//! ERP Access Core - organization hierarchy and effective permissions
//!
//! Branch/unit trees with materialized paths, role grants with per-unit
//! overrides, subscription gating of modules, and resolution of a user's
//! effective module permissions across all of their role assignments.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod migration;
pub mod repository;
pub mod service;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
