/// Error type and JSON error rendering.
pub mod error;
