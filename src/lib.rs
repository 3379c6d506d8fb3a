#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod player;
pub mod probe;
pub mod reencode;
pub mod resample;
pub mod session;
pub mod transcode;

pub use error::{GlimpseError, GlimpseResult};
pub use model::{Author, AuthorStoryGroup, MediaItem, MediaKind};
pub use player::{ClickZone, Flow, PlaybackCursor, StoryPlayer, ViewSink};
pub use session::{PlayerCommand, run_viewer};
pub use transcode::{
    CancelFlag, FfmpegBackend, MediaBackend, RemoteLocator, SourceAsset, TranscodeConstraints,
    TranscodeOutput, TranscodePipeline, TranscodeRequest, UploadSink,
};
