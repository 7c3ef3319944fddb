//! Stowage Processing Library
//!
//! Pre-upload validation and the default image pipeline consumed by the
//! storage adapters.

#[cfg(feature = "image")]
pub mod pipeline;
pub mod validator;

// Re-export commonly used types
#[cfg(feature = "image")]
pub use pipeline::{content_type_for_format, DefaultImagePipeline};
pub use validator::{sanitize_filename, UploadValidator, ValidationError};
