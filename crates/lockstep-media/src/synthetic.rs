//! Deterministic test-pattern source: a sine tone plus moving color bars.
//!
//! Packets carry raw payloads (f32le samples for audio, the frame index for
//! video) so the pipeline can be exercised end to end without any codec.

use bytes::Bytes;
use lockstep_core::{AudioBlock, Error, Packet, Result, StreamId, TimeBase, VideoFrame};
use lockstep_engine::{AudioDecoder, AudioStream, Demuxer, MediaSource, VideoDecoder, VideoStream};
use std::collections::VecDeque;
use std::f32::consts::TAU;
use tracing::{debug, trace};

use crate::filter::S16Filter;

/// Stream id of the video track in every source this crate builds.
pub const VIDEO_STREAM: StreamId = StreamId(0);
/// Stream id of the audio track in every source this crate builds.
pub const AUDIO_STREAM: StreamId = StreamId(1);

/// Sample frames carried by one synthetic audio packet.
const AUDIO_PACKET_FRAMES: u64 = 1024;

/// Shape of the generated streams.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub duration_secs: f64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub tone_hz: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            fps: 25,
            width: 320,
            height: 240,
            sample_rate: 48_000,
            channels: 2,
            tone_hz: 440.0,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.duration_secs.is_finite() && self.duration_secs > 0.0) {
            return Err(Error::Config(format!(
                "duration must be positive, got {}",
                self.duration_secs
            )));
        }
        if self.fps == 0 || self.sample_rate == 0 || self.channels == 0 {
            return Err(Error::Config(
                "fps, sample rate and channels must be non-zero".into(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "invalid picture size {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Time base of the video stream: one tick per frame.
    pub const fn video_time_base(&self) -> TimeBase {
        TimeBase::new(1, self.fps)
    }

    /// Time base of the audio stream: one tick per sample frame.
    pub const fn audio_time_base(&self) -> TimeBase {
        TimeBase::new(1, self.sample_rate)
    }

    pub fn total_video_frames(&self) -> u64 {
        (self.duration_secs * f64::from(self.fps)).round() as u64
    }

    pub fn total_audio_frames(&self) -> u64 {
        (self.duration_secs * f64::from(self.sample_rate)).round() as u64
    }
}

/// Emits video and audio packets interleaved in presentation order.
pub struct SyntheticDemuxer {
    config: SyntheticConfig,
    video: Option<u64>,
    audio: Option<u64>,
}

impl SyntheticDemuxer {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            video: Some(0),
            audio: Some(0),
        }
    }

    /// Only the video track, for pairing with an audio file.
    pub fn video_only(config: SyntheticConfig) -> Self {
        Self {
            config,
            video: Some(0),
            audio: None,
        }
    }

    /// Index and presentation time of the next video frame, if any.
    fn next_video(&self) -> Option<(u64, i64)> {
        let index = self.video?;
        (index < self.config.total_video_frames())
            .then(|| (index, self.config.video_time_base().to_micros(index as i64)))
    }

    /// Position and presentation time of the next audio packet, if any.
    fn next_audio(&self) -> Option<(u64, i64)> {
        let position = self.audio?;
        (position < self.config.total_audio_frames())
            .then(|| (position, self.config.audio_time_base().to_micros(position as i64)))
    }

    fn video_packet(&mut self, index: u64) -> Packet {
        self.video = Some(index + 1);
        Packet::new(VIDEO_STREAM, Some(index as i64), pattern_payload(index))
    }

    fn audio_packet(&mut self, position: u64) -> Packet {
        let frames = AUDIO_PACKET_FRAMES.min(self.config.total_audio_frames() - position);
        let channels = usize::from(self.config.channels);
        let step = TAU * self.config.tone_hz / self.config.sample_rate as f32;

        let mut data = Vec::with_capacity(frames as usize * channels * 4);
        for frame in position..position + frames {
            // Phase wrapped per second keeps f32 precision over long runs.
            let phase = (frame % u64::from(self.config.sample_rate)) as f32 * step;
            let sample = 0.25 * phase.sin();
            for _ in 0..channels {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }

        self.audio = Some(position + frames);
        Packet::new(AUDIO_STREAM, Some(position as i64), data)
    }
}

impl Demuxer for SyntheticDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let packet = match (self.next_video(), self.next_audio()) {
            (Some((_, video)), Some((position, audio))) if audio < video => {
                Some(self.audio_packet(position))
            }
            (Some((index, _)), _) => Some(self.video_packet(index)),
            (None, Some((position, _))) => Some(self.audio_packet(position)),
            (None, None) => None,
        };
        if packet.is_none() {
            debug!("Synthetic source exhausted");
        }
        Ok(packet)
    }
}

/// Decodes interleaved f32le payloads.
pub struct PcmDecoder {
    sample_rate: u32,
    channels: u16,
    ready: VecDeque<AudioBlock>,
}

impl PcmDecoder {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            ready: VecDeque::new(),
        }
    }
}

impl AudioDecoder for PcmDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame_bytes = 4 * usize::from(self.channels);
        if packet.data.len() % frame_bytes != 0 {
            return Err(Error::Decode(format!(
                "{} bytes is not a whole number of {}-channel frames",
                packet.data.len(),
                self.channels
            )));
        }

        let samples = packet
            .data
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        self.ready.push_back(AudioBlock {
            samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
            pts: packet.pts,
        });
        Ok(())
    }

    fn receive_block(&mut self) -> Result<Option<AudioBlock>> {
        Ok(self.ready.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Renders the frame index payload as color bars with a sweeping white
/// column.
pub struct PatternDecoder {
    width: u32,
    height: u32,
    ready: Option<VideoFrame>,
}

/// Luma of the eight classic bars, white to black.
const BAR_LUMA: [u8; 8] = [235, 210, 170, 145, 106, 81, 41, 16];

impl PatternDecoder {
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ready: None,
        }
    }

    fn render(&self, index: u64, pts: Option<i64>) -> VideoFrame {
        let mut frame = VideoFrame::black(self.width, self.height, pts);
        let width = self.width as usize;
        if width == 0 {
            return frame;
        }
        let sweep = (index as usize * 4) % width;

        for (row, line) in frame.y.chunks_exact_mut(width).enumerate() {
            for (column, luma) in line.iter_mut().enumerate() {
                *luma = if column == sweep {
                    235
                } else if row % 16 == 0 {
                    128
                } else {
                    BAR_LUMA[column * BAR_LUMA.len() / width]
                };
            }
        }

        // Slowly rotate the chroma so consecutive frames differ in color.
        let hue = (index % 256) as u8;
        frame.u.fill(hue);
        frame.v.fill(255 - hue);
        frame
    }
}

impl VideoDecoder for PatternDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes: [u8; 8] = packet.data.as_ref().try_into().map_err(|_| {
            Error::Decode(format!(
                "pattern packet has {} bytes, expected 8",
                packet.data.len()
            ))
        })?;
        let index = u64::from_le_bytes(bytes);
        trace!("Rendering pattern frame {index}");
        self.ready = Some(self.render(index, packet.pts));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<VideoFrame>> {
        Ok(self.ready.take())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Build a complete synthetic source whose audio is converted to s16 at
/// `output_rate` (the tone's own rate when `None`).
pub fn synthetic_source(config: &SyntheticConfig, output_rate: Option<u32>) -> Result<MediaSource> {
    config.validate()?;
    let filter = S16Filter::new(
        config.sample_rate,
        output_rate.unwrap_or(config.sample_rate),
        config.channels,
    )?;
    debug!(
        "Synthetic source: {}s, {}x{} @ {} fps, {} Hz x{}",
        config.duration_secs,
        config.width,
        config.height,
        config.fps,
        config.sample_rate,
        config.channels
    );

    MediaSource::new(
        Box::new(SyntheticDemuxer::new(config.clone())),
        Some(pattern_stream(config)),
        Some(AudioStream {
            id: AUDIO_STREAM,
            decoder: Box::new(PcmDecoder::new(config.sample_rate, config.channels)),
            filter: Box::new(filter),
        }),
    )
}

/// The synthetic video track description.
pub fn pattern_stream(config: &SyntheticConfig) -> VideoStream {
    VideoStream {
        id: VIDEO_STREAM,
        time_base: config.video_time_base(),
        width: config.width,
        height: config.height,
        decoder: Box::new(PatternDecoder::new(config.width, config.height)),
    }
}

/// Payload of a synthetic video packet: the frame index, little endian.
pub fn pattern_payload(index: u64) -> Bytes {
    Bytes::copy_from_slice(&index.to_le_bytes())
}
