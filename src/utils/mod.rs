//! Shared helpers used across the harness.

pub mod text;

pub use text::truncate;
