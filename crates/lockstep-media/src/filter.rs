//! Audio filter: optional resampling, then f32 → interleaved s16 bytes.

use lockstep_core::{AudioBlock, AudioSpec, Error, Result};
use lockstep_engine::AudioFilter;
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use std::collections::VecDeque;
use tracing::debug;

/// Input frames per resampler chunk.
const CHUNK_FRAMES: usize = 1024;

/// Sample-rate converter over interleaved f32 audio.
struct Resampler {
    inner: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Deinterleaved input not yet processed.
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let inner = FftFixedIn::new(
            input_rate as usize,
            output_rate as usize,
            CHUNK_FRAMES,
            2,
            channels,
        )
        .map_err(|e| Error::Filter(format!("Failed to create resampler: {e}")))?;

        debug!("Resampler created: {input_rate}Hz -> {output_rate}Hz, {channels} channels");

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    /// Resample every complete chunk available after appending `input`.
    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        for frame in input.chunks_exact(self.channels) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..CHUNK_FRAMES).collect())
                .collect();
            let resampled = self.resample(&chunk)?;
            interleave_into(&mut output, &resampled, usize::MAX);
        }
        Ok(output)
    }

    /// Pad and convert whatever is left.
    fn flush(&mut self) -> Result<Vec<f32>> {
        let remaining = self.pending[0].len();
        if remaining == 0 {
            return Ok(Vec::new());
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut data = std::mem::take(channel);
                data.resize(CHUNK_FRAMES, 0.0);
                data
            })
            .collect();
        let resampled = self.resample(&chunk)?;

        // Only keep the part produced by real input.
        let frames = (remaining as u64 * u64::from(self.output_rate) / u64::from(self.input_rate))
            as usize;
        let mut output = Vec::with_capacity(frames * self.channels);
        interleave_into(&mut output, &resampled, frames);
        Ok(output)
    }

    fn resample(&mut self, chunk: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        self.inner
            .process(chunk, None)
            .map_err(|e| Error::Filter(format!("Resample failed: {e}")))
    }
}

fn interleave_into(output: &mut Vec<f32>, channels: &[Vec<f32>], max_frames: usize) {
    let frames = channels.first().map_or(0, Vec::len).min(max_frames);
    for frame in 0..frames {
        for channel in channels {
            output.push(channel[frame]);
        }
    }
}

/// Converts f32 blocks to interleaved signed 16-bit PCM, resampling first
/// when the output rate differs from the input rate.
pub struct S16Filter {
    input_rate: u32,
    channels: u16,
    spec: AudioSpec,
    resampler: Option<Resampler>,
    ready: VecDeque<Vec<u8>>,
}

impl S16Filter {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self> {
        let spec = AudioSpec::s16(output_rate, channels).validate()?;
        if input_rate == 0 {
            return Err(Error::Config("input sample rate must be non-zero".into()));
        }
        let resampler = if input_rate == output_rate {
            None
        } else {
            Some(Resampler::new(input_rate, output_rate, usize::from(channels))?)
        };
        Ok(Self {
            input_rate,
            channels,
            spec,
            resampler,
            ready: VecDeque::new(),
        })
    }

    pub const fn needs_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    fn emit(&mut self, samples: &[f32]) {
        if !samples.is_empty() {
            self.ready.push_back(to_s16_bytes(samples));
        }
    }
}

impl AudioFilter for S16Filter {
    fn output_spec(&self) -> AudioSpec {
        self.spec
    }

    fn push(&mut self, block: AudioBlock) -> Result<()> {
        if block.channels != self.channels || block.sample_rate != self.input_rate {
            return Err(Error::Filter(format!(
                "block is {} Hz x{}, filter expects {} Hz x{}",
                block.sample_rate, block.channels, self.input_rate, self.channels
            )));
        }

        match self.resampler.as_mut() {
            Some(resampler) => {
                let resampled = resampler.process(&block.samples)?;
                self.emit(&resampled);
            }
            None => self.emit(&block.samples),
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.ready.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(resampler) = self.resampler.as_mut() {
            let tail = resampler.flush()?;
            self.emit(&tail);
        }
        Ok(())
    }
}

/// Clamp to [-1, 1] and scale to native-endian i16.
pub fn to_s16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|sample| {
            let scaled = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            scaled.to_ne_bytes()
        })
        .collect()
}
