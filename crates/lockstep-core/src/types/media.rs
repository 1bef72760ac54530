//! Packet, frame, and sample-block types flowing through the pipeline.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media type of a stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a stream inside its container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compressed, timestamped unit of encoded media belonging to one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Stream this packet belongs to.
    pub stream: StreamId,
    /// Presentation timestamp in the stream's time base.
    pub pts: Option<i64>,
    /// Length in the stream's time base, when the container knows it.
    pub duration: Option<u64>,
    /// Decoded frames to discard from the start (encoder delay).
    pub trim_start: u32,
    /// Decoded frames to discard from the end (encoder padding).
    pub trim_end: u32,
    /// Opaque compressed payload.
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream: StreamId, pts: Option<i64>, data: impl Into<Bytes>) -> Self {
        Self {
            stream,
            pts,
            duration: None,
            trim_start: 0,
            trim_end: 0,
            data: data.into(),
        }
    }

    /// Attach the container's duration and gapless trim counts.
    pub fn with_timing(mut self, duration: u64, trim_start: u32, trim_end: u32) -> Self {
        self.duration = Some(duration);
        self.trim_start = trim_start;
        self.trim_end = trim_end;
        self
    }
}

/// A decoded picture in planar YUV 4:2:0.
///
/// The luma plane is `width * height` bytes; each chroma plane covers a
/// quarter of the picture (`chroma_width * chroma_height`).
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in the video stream's time base.
    pub pts: Option<i64>,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

impl VideoFrame {
    /// Allocate a black frame of the given size.
    pub fn black(width: u32, height: u32, pts: Option<i64>) -> Self {
        let (luma, chroma) = Self::plane_sizes(width, height);
        Self {
            width,
            height,
            pts,
            y: vec![16; luma],
            u: vec![128; chroma],
            v: vec![128; chroma],
        }
    }

    /// Sizes in bytes of the luma plane and of one chroma plane.
    pub const fn plane_sizes(width: u32, height: u32) -> (usize, usize) {
        let luma = width as usize * height as usize;
        let chroma = Self::chroma_dim(width) * Self::chroma_dim(height);
        (luma, chroma)
    }

    const fn chroma_dim(dim: u32) -> usize {
        (dim as usize).div_ceil(2)
    }

    pub const fn chroma_width(&self) -> usize {
        Self::chroma_dim(self.width)
    }

    pub const fn chroma_height(&self) -> usize {
        Self::chroma_dim(self.height)
    }

    /// Check that the plane buffers match the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        let (luma, chroma) = Self::plane_sizes(self.width, self.height);
        self.y.len() == luma && self.u.len() == chroma && self.v.len() == chroma
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .finish_non_exhaustive()
    }
}

/// A block of decoded audio, interleaved f32 samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Presentation timestamp in the audio stream's time base.
    pub pts: Option<i64>,
}

impl AudioBlock {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / usize::from(self.channels)
        }
    }
}

/// Queue payload: either a unit of data or the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem<T> {
    Data(T),
    EndOfStream,
}

impl<T> StreamItem<T> {
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(item) => Some(item),
            Self::EndOfStream => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_sizes() {
        assert_eq!(VideoFrame::plane_sizes(320, 240), (76_800, 19_200));
        // Odd dimensions round chroma up.
        assert_eq!(VideoFrame::plane_sizes(5, 3), (15, 6));
    }

    #[test]
    fn test_black_frame_well_formed() {
        let frame = VideoFrame::black(64, 48, Some(3));
        assert!(frame.is_well_formed());
        assert_eq!(frame.chroma_width(), 32);
        assert_eq!(frame.chroma_height(), 24);

        let mut broken = frame;
        broken.u.pop();
        assert!(!broken.is_well_formed());
    }

    #[test]
    fn test_audio_block_frames() {
        let block = AudioBlock {
            samples: vec![0.0; 2048],
            channels: 2,
            sample_rate: 48_000,
            pts: None,
        };
        assert_eq!(block.frames(), 1024);
    }

    #[test]
    fn test_packet_timing() {
        let packet = Packet::new(StreamId(1), Some(0), vec![1u8, 2]);
        assert_eq!((packet.duration, packet.trim_start, packet.trim_end), (None, 0, 0));

        let packet = packet.with_timing(1_152, 529, 0);
        assert_eq!(packet.duration, Some(1_152));
        assert_eq!(packet.trim_start, 529);
        assert_eq!(packet.data.as_ref(), &[1, 2]);
    }

    #[test]
    fn test_stream_item() {
        let item = StreamItem::Data(7);
        assert!(!item.is_end_of_stream());
        assert_eq!(item.into_data(), Some(7));
        assert_eq!(StreamItem::<u8>::EndOfStream.into_data(), None);
    }

    #[test]
    fn test_stream_kind_serde() {
        let json = serde_json::to_string(&StreamKind::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
    }
}
