//! Common utilities and types shared across meeting client components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types (identifiers, media kinds)
pub mod types;
