//! Audio from a media file via symphonia, paired with a synthetic picture.

use lockstep_core::{AudioBlock, Error, Packet, Result, StreamKind, TimeBase};
use lockstep_engine::{AudioDecoder, AudioStream, Demuxer, MediaSource};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use symphonia::core::{
    audio::{AudioBuffer, AudioBufferRef, Signal},
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    conv::IntoSample,
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, Track},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    sample::Sample,
};
use tracing::{debug, info, warn};

use crate::filter::S16Filter;
use crate::interleave::Interleave;
use crate::synthetic::{pattern_stream, SyntheticConfig, SyntheticDemuxer, AUDIO_STREAM};

/// The default audio track of a probed file.
pub struct FileAudioSource {
    pub demuxer: FileDemuxer,
    pub decoder: SymphoniaAudioDecoder,
    pub time_base: TimeBase,
    pub sample_rate: u32,
    pub channels: u16,
    /// Track length, when the container declares it.
    pub duration_secs: Option<f64>,
}

impl FileAudioSource {
    /// Probe `path` and prepare its first decodable audio track.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Demux(format!("Failed to probe {}: {e}", path.display())))?;
        let format = probed.format;

        let track = format
            .default_track()
            .filter(|t| is_audio_track(t))
            .or_else(|| format.tracks().iter().find(|t| is_audio_track(t)))
            .ok_or(Error::NoStream(StreamKind::Audio))?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Demux("audio track has no sample rate".into()))?;
        let time_base = params
            .time_base
            .map_or(TimeBase::new(1, sample_rate), |tb| {
                TimeBase::new(tb.numer, tb.denom)
            })
            .validate()?;
        let duration_secs = params
            .n_frames
            .map(|frames| frames as f64 / f64::from(sample_rate));

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {e}")))?;

        let mut demuxer = FileDemuxer { format, track_id };
        let mut decoder = SymphoniaAudioDecoder::new(decoder, track_id);
        let channels = match params.channels {
            Some(layout) => channel_count(layout.count()).ok_or_else(|| {
                Error::Demux(format!("unsupported channel count {}", layout.count()))
            })?,
            None => decoder.prime(&mut demuxer)?,
        };

        info!(
            "Opened {}: track {track_id}, {sample_rate} Hz, {channels} channels",
            path.display()
        );

        Ok(Self {
            demuxer,
            decoder,
            time_base,
            sample_rate,
            channels,
            duration_secs,
        })
    }
}

fn is_audio_track(track: &Track) -> bool {
    track.codec_params.codec != CODEC_TYPE_NULL && track.codec_params.sample_rate.is_some()
}

/// Channel count as carried by [`AudioBlock`]; zero is not a layout.
fn channel_count(count: usize) -> Option<u16> {
    u16::try_from(count).ok().filter(|&c| c > 0)
}

/// Packets of one track of a symphonia format reader.
pub struct FileDemuxer {
    format: Box<dyn FormatReader>,
    track_id: u32,
}

impl Demuxer for FileDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None); // End of stream
                }
                Err(SymphoniaError::IoError(e)) => return Err(Error::Io(e)),
                Err(SymphoniaError::ResetRequired) => {
                    return Err(Error::Fatal("track list changed mid-stream".into()));
                }
                Err(e) => return Err(Error::Demux(format!("Failed to read packet: {e}"))),
            };

            // Skip packets for other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            let pts = i64::try_from(packet.ts()).ok();
            return Ok(Some(
                Packet::new(AUDIO_STREAM, pts, packet.buf().to_vec()).with_timing(
                    packet.dur(),
                    packet.trim_start(),
                    packet.trim_end(),
                ),
            ));
        }
    }
}

/// Symphonia codec behind the send/receive decoder interface.
pub struct SymphoniaAudioDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    ready: VecDeque<AudioBlock>,
}

impl SymphoniaAudioDecoder {
    pub fn new(decoder: Box<dyn Decoder>, track_id: u32) -> Self {
        Self {
            decoder,
            track_id,
            ready: VecDeque::new(),
        }
    }

    /// Decode from `demuxer` until the first block comes out and return its
    /// channel count. The block stays queued for the next receive.
    pub fn prime(&mut self, demuxer: &mut FileDemuxer) -> Result<u16> {
        loop {
            if let Some(block) = self.ready.front() {
                return Ok(block.channels);
            }
            let packet = demuxer
                .read_packet()?
                .ok_or_else(|| Error::Demux("no decodable audio to learn the channel count".into()))?;
            match self.send_packet(&packet) {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => warn!("Skipping undecodable packet: {e}"),
                Err(e) => return Err(e),
            }
        }
    }
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let ts = packet.pts.and_then(|pts| u64::try_from(pts).ok()).unwrap_or(0);
        let mut encoded = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            ts,
            packet.duration.unwrap_or(0),
            &packet.data,
        );
        encoded.trim_start = packet.trim_start;
        encoded.trim_end = packet.trim_end;

        match self.decoder.decode(&encoded) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let channels = channel_count(spec.channels.count()).ok_or_else(|| {
                    Error::Decode(format!("unsupported channel count {}", spec.channels.count()))
                })?;
                self.ready.push_back(AudioBlock {
                    samples: audio_buffer_to_f32(&decoded),
                    channels,
                    sample_rate: spec.rate,
                    pts: packet.pts,
                });
                Ok(())
            }
            Err(SymphoniaError::DecodeError(e)) => Err(Error::Decode(e.to_string())),
            Err(SymphoniaError::IoError(e)) => Err(Error::Decode(format!("truncated packet: {e}"))),
            Err(e) => Err(Error::Fatal(format!("Decode failed: {e}"))),
        }
    }

    fn receive_block(&mut self) -> Result<Option<AudioBlock>> {
        Ok(self.ready.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        let result = self.decoder.finalize();
        if let Some(verified) = result.verify_ok {
            debug!("Decoder finalized, verification passed: {verified}");
        }
        Ok(())
    }

    fn close(&mut self) {
        self.decoder.reset();
        self.ready.clear();
    }
}

/// Convert a decoded buffer of any sample format to interleaved f32.
fn audio_buffer_to_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
    match buffer {
        AudioBufferRef::U8(buf) => interleave(&**buf),
        AudioBufferRef::U16(buf) => interleave(&**buf),
        AudioBufferRef::U24(buf) => interleave(&**buf),
        AudioBufferRef::U32(buf) => interleave(&**buf),
        AudioBufferRef::S8(buf) => interleave(&**buf),
        AudioBufferRef::S16(buf) => interleave(&**buf),
        AudioBufferRef::S24(buf) => interleave(&**buf),
        AudioBufferRef::S32(buf) => interleave(&**buf),
        AudioBufferRef::F32(buf) => interleave(&**buf),
        AudioBufferRef::F64(buf) => interleave(&**buf),
    }
}

fn interleave<S>(buffer: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample + IntoSample<f32>,
{
    let planes = buffer.planes();
    let planes = planes.planes();
    let frames = buffer.frames();
    let mut output = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            output.push(plane[frame].into_sample());
        }
    }
    output
}

/// Play the audio of `path` against the synthetic picture.
///
/// The picture runs for the file's declared length, or for
/// `video.duration_secs` when the container does not say.
pub fn file_source(
    path: impl AsRef<Path>,
    video: &SyntheticConfig,
    output_rate: Option<u32>,
) -> Result<MediaSource> {
    let audio = FileAudioSource::open(path)?;

    let mut video = video.clone();
    match audio.duration_secs {
        Some(duration) if duration > 0.0 => video.duration_secs = duration,
        _ => warn!(
            "Audio length unknown, showing {}s of picture",
            video.duration_secs
        ),
    }
    video.validate()?;

    let filter = S16Filter::new(
        audio.sample_rate,
        output_rate.unwrap_or(audio.sample_rate),
        audio.channels,
    )?;
    let demuxer = Interleave::new(
        Box::new(audio.demuxer),
        audio.time_base,
        Box::new(SyntheticDemuxer::video_only(video.clone())),
        video.video_time_base(),
    );

    MediaSource::new(
        Box::new(demuxer),
        Some(pattern_stream(&video)),
        Some(AudioStream {
            id: AUDIO_STREAM,
            decoder: Box::new(audio.decoder),
            filter: Box::new(filter),
        }),
    )
}
