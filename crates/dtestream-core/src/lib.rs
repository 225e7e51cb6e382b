//! Frame-addressable access to remote scientific data streams.
//!
//! A [`DteStreamSession`] resolves stream metadata once, then decodes frames lazily through
//! an external decoder process, rescaling each frame to physical units.

pub mod config;
pub mod error;
pub mod grid;
pub mod index;
pub mod memory;
pub mod metadata;
pub mod preview;
pub mod session;
pub mod video;

pub use config::{DatasetProfile, StreamerConfig};
pub use error::{StreamError, StreamResult};
pub use index::FrameIndex;
pub use metadata::{MetadataClient, MetadataSource, StreamDescriptor, StreamQuery};
pub use session::DteStreamSession;
pub use video::{DataFrame, EndReason, FfmpegSource};
