//! Core types and error handling shared by every Mosaic module.

pub mod error;

pub use error::{ErrorContext, MosaicError, ResolutionError, user_friendly_error};
