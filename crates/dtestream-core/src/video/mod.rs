pub mod decoder;
pub mod frame;
pub mod sample;
pub mod source;

pub use decoder::{DecoderSettings, EndReason, SeekableFrameDecoder};
pub use frame::DataFrame;
pub use sample::SampleFormat;
pub use source::{FfmpegSource, FrameByteSource, FrameStream, SpawnRequest};
