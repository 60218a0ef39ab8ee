//! Data models for backend-kit.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;

// Re-export commonly used types
pub use query::{DbValue, Fill, Query, Row};
