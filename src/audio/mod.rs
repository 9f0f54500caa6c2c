//! Audio conversion
//!
//! Wraps the external ffmpeg/ffprobe tools and turns an Audible container into
//! a ZIP of size-bounded MP3 chunks.

pub mod chunker;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod transcoder;

pub use chunker::{plan_segments, Segment};
pub use pipeline::{ConversionPipeline, ConversionSettings, ConversionSummary};
pub use progress::{ConversionProgress, ConversionStage, ProgressCallback};
pub use transcoder::{Transcoder, TranscoderTimeouts};
