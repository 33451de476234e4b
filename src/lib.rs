// Episode Social Sync - real-time social state for an anime community feed

// Core types and primitives
pub mod core;

// Store, cache and external-source ports with their in-process adapters
pub mod infrastructure;

// Documents exchanged with the store
pub mod models;

// Toggle engine, episode chat and notification fan-out
pub mod services;

// Host surface
pub mod app_state;
pub mod config;
pub mod http;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
