//! Composition pipeline: scene materialization, transitions, rendering.

pub mod clip;
pub mod progress;
pub mod render;
pub mod transition;

use thiserror::Error;

use crate::codec::CodecError;
use crate::media::ResolveError;

pub use clip::{Clip, ClipMaterializer, Segment, SegmentKind};
pub use progress::{ProgressSender, ProgressUpdate};
pub use render::{RenderPipeline, RenderedArtifact};

/// Composition failure modes.
///
/// Resolver, materializer, and codec failures all surface through this one
/// type at the pipeline boundary; the coordinator records the display
/// string verbatim as the job's error message.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error(transparent)]
    Source(#[from] ResolveError),

    #[error("failed to create clip from {scene}: {cause}")]
    Decode { scene: String, cause: String },

    #[error("unsupported media kind: {0}")]
    UnsupportedMediaKind(String),

    #[error("render cancelled")]
    Cancelled,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("encode produced no artifact at {0}")]
    MissingArtifact(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
