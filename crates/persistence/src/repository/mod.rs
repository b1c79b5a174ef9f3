//! Repository implementations for database operations

pub mod trials;

pub use trials::*;
