//! Durable storage for calculations and their constituent operations.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
