//! Seams to the external collaborators: demuxer, decoders, audio filter,
//! presentation sink, and audio device.

use lockstep_core::{
    AudioBlock, AudioSpec, Error, Packet, Result, StreamId, StreamKind, TimeBase, VideoFrame,
};

use crate::pipeline::AudioCallback;

/// Produces compressed packets in container order.
pub trait Demuxer: Send {
    /// Next packet, or `None` once the input is exhausted.
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}

/// Turns video packets into pictures.
///
/// Follows the send/receive model: every `send_packet` may make zero or
/// more frames available through `receive_frame`.
pub trait VideoDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Next decoded frame, or `None` when the decoder needs more input.
    fn receive_frame(&mut self) -> Result<Option<VideoFrame>>;

    /// Signal end of input so buffered frames can be drained.
    fn flush(&mut self) -> Result<()>;

    /// Release decoder resources. Called by the decode thread before it exits.
    fn close(&mut self) {}
}

/// Turns audio packets into interleaved f32 sample blocks.
pub trait AudioDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Next decoded block, or `None` when the decoder needs more input.
    fn receive_block(&mut self) -> Result<Option<AudioBlock>>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) {}
}

/// Converts decoded audio into the PCM layout the device plays.
///
/// Mirrors a source/sink filter graph: blocks go in with `push`, converted
/// bytes come out of `pull` until it returns `None`.
pub trait AudioFilter: Send {
    /// Layout of the bytes produced by `pull`.
    fn output_spec(&self) -> AudioSpec;

    fn push(&mut self, block: AudioBlock) -> Result<()>;

    fn pull(&mut self) -> Result<Option<Vec<u8>>>;

    /// Signal end of input so buffered samples can be drained.
    fn flush(&mut self) -> Result<()>;
}

/// External event observed by the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    Continue,
    Quit,
}

/// Presentation surface. Lives on the render thread.
pub trait VideoSink {
    /// Blit the three planes of a frame.
    fn present(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Process pending window/system events. Called once per render tick.
    fn pump_events(&mut self) -> SinkEvent {
        SinkEvent::Continue
    }
}

/// Pull-driven audio output.
pub trait AudioDevice {
    /// Open the device for `spec`. The device calls `callback` on its own
    /// thread, at its own cadence, once started.
    fn open(&mut self, spec: AudioSpec, callback: AudioCallback) -> Result<()>;

    /// Start pulling audio.
    fn start(&mut self) -> Result<()>;

    /// Stop the device. Once this returns the callback never runs again.
    fn close(&mut self);
}

/// The selected video stream of a source.
pub struct VideoStream {
    pub id: StreamId,
    pub time_base: TimeBase,
    pub width: u32,
    pub height: u32,
    pub decoder: Box<dyn VideoDecoder>,
}

/// The selected audio stream of a source.
pub struct AudioStream {
    pub id: StreamId,
    pub decoder: Box<dyn AudioDecoder>,
    pub filter: Box<dyn AudioFilter>,
}

/// An opened input: demuxer plus the two streams it will be played from.
pub struct MediaSource {
    pub demuxer: Box<dyn Demuxer>,
    pub video: VideoStream,
    pub audio: AudioStream,
}

impl MediaSource {
    /// Bundle a demuxer with its selected streams.
    ///
    /// Fails with `NoStream` when either stream is missing, so a source that
    /// cannot play never reaches thread startup.
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        video: Option<VideoStream>,
        audio: Option<AudioStream>,
    ) -> Result<Self> {
        let video = video.ok_or(Error::NoStream(StreamKind::Video))?;
        let audio = audio.ok_or(Error::NoStream(StreamKind::Audio))?;
        video.time_base.validate()?;
        audio.filter.output_spec().validate()?;
        if video.id == audio.id {
            return Err(Error::Config(format!(
                "audio and video both mapped to stream {}",
                video.id
            )));
        }
        Ok(Self {
            demuxer,
            video,
            audio,
        })
    }
}
