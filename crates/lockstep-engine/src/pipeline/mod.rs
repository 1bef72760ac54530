//! Pipeline stages: reader, decoders, render loop, and the audio callback.

pub mod audio;
pub mod output;
pub mod reader;
pub mod render;
pub mod video;

use lockstep_core::StreamKind;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub use audio::AudioDecodeStage;
pub use output::{AudioCallback, OutputStats};
pub use reader::ReaderStage;
pub use render::{FramePacer, Pace, PlaybackSummary, RenderExit, RenderLoop};
pub use video::VideoDecodeStage;

/// Identity of a pipeline thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Reader,
    VideoDecode,
    AudioDecode,
    Render,
}

impl Stage {
    /// Name given to the stage's thread.
    pub const fn thread_name(self) -> &'static str {
        match self {
            Self::Reader => "lockstep-reader",
            Self::VideoDecode => "lockstep-video",
            Self::AudioDecode => "lockstep-audio",
            Self::Render => "lockstep-render",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reader => "reader",
            Self::VideoDecode => "video decode",
            Self::AudioDecode => "audio decode",
            Self::Render => "render",
        };
        f.write_str(name)
    }
}

/// Why a stage loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// All input was processed and the end-of-stream sentinel forwarded.
    EndOfStream,
    /// A primitive the stage depends on was aborted.
    Aborted,
    /// A collaborator reported a fatal condition.
    Failed,
}

/// Events emitted by the pipeline threads.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    StageStarted(Stage),
    /// The stream's last unit has left its decode stage.
    EndOfStream(StreamKind),
    StageFailed { stage: Stage, error: String },
    StageFinished { stage: Stage, reason: ExitReason },
}

/// Progress flags shared by the stages and the render loop.
#[derive(Debug, Default)]
pub struct PipelineStatus {
    audio_drained: AtomicBool,
    video_drained: AtomicBool,
    failed: AtomicBool,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_drained(&self, kind: StreamKind) {
        let flag = match kind {
            StreamKind::Audio => &self.audio_drained,
            StreamKind::Video => &self.video_drained,
        };
        flag.store(true, Ordering::Release);
    }

    pub fn is_drained(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Audio => self.audio_drained.load(Ordering::Acquire),
            StreamKind::Video => self.video_drained.load(Ordering::Acquire),
        }
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        let status = PipelineStatus::new();
        assert!(!status.is_drained(StreamKind::Audio));
        status.mark_drained(StreamKind::Audio);
        assert!(status.is_drained(StreamKind::Audio));
        assert!(!status.is_drained(StreamKind::Video));
        assert!(!status.has_failed());
        status.mark_failed();
        assert!(status.has_failed());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Reader.thread_name(), "lockstep-reader");
        assert_eq!(Stage::AudioDecode.to_string(), "audio decode");
    }
}
