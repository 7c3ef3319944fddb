//! Domain models shared by every stowage crate.

pub mod access;
pub mod capabilities;
pub mod channel;
pub mod upload;
pub mod usage;

pub use access::{ObjectAcl, UrlOptions};
pub use capabilities::{Capabilities, STANDARD_IMAGE_FORMATS};
pub use channel::{Channel, ChannelConfig, ChannelStatus};
pub use upload::{PrecomputedThumbnail, ProcessingOptions, UploadRequest, UploadResult, UploadSource};
pub use usage::UsageEvent;
