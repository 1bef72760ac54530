//! Audio output devices.

use crossbeam_channel::{bounded, select, tick, Sender};
use lockstep_core::{AudioSpec, Error, Result};
use lockstep_engine::{AudioCallback, AudioDevice};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// Plays into nothing at real-time speed.
///
/// A named thread pulls `frames_per_callback` sample frames every
/// `frames_per_callback / sample_rate` seconds, the same cadence a sound
/// card with that period size would have.
pub struct NullAudioDevice {
    frames_per_callback: u32,
    opened: Option<(AudioSpec, AudioCallback)>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl NullAudioDevice {
    pub const fn new(frames_per_callback: u32) -> Self {
        Self {
            frames_per_callback,
            opened: None,
            stop_tx: None,
            thread: None,
        }
    }

    fn period(&self, spec: AudioSpec) -> Duration {
        Duration::from_micros(
            u64::from(self.frames_per_callback) * 1_000_000 / u64::from(spec.sample_rate),
        )
    }
}

impl AudioDevice for NullAudioDevice {
    fn open(&mut self, spec: AudioSpec, callback: AudioCallback) -> Result<()> {
        let spec = spec.validate()?;
        if self.frames_per_callback == 0 {
            return Err(Error::AudioOutput("device period must be non-zero".into()));
        }
        debug!(
            "Null audio device opened: {} Hz, {} channels, {} frames per callback",
            spec.sample_rate, spec.channels, self.frames_per_callback
        );
        self.opened = Some((spec, callback));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (spec, mut callback) = self
            .opened
            .take()
            .ok_or_else(|| Error::AudioOutput("device started before open".into()))?;

        let period = self.period(spec);
        let mut scratch = vec![0u8; self.frames_per_callback as usize * spec.bytes_per_frame()];
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("lockstep-output".to_string())
            .spawn(move || {
                let ticker = tick(period);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => callback.fill(&mut scratch),
                    }
                }
                debug!("Null audio device stopped");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        info!("Null audio device started, period {period:?}");
        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop_tx = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
        self.opened = None;
    }
}

impl Drop for NullAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "cpal")]
pub use self::cpal_output::CpalAudioDevice;

#[cfg(feature = "cpal")]
mod cpal_output {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
    use lockstep_core::{AudioSpec, Error, Result};
    use lockstep_engine::{AudioCallback, AudioDevice};
    use tracing::{error, info};

    /// The system's default output device.
    pub struct CpalAudioDevice {
        frames_per_callback: u32,
        stream: Option<Stream>,
        device_name: String,
    }

    impl CpalAudioDevice {
        pub const fn new(frames_per_callback: u32) -> Self {
            Self {
                frames_per_callback,
                stream: None,
                device_name: String::new(),
            }
        }

        pub fn device_name(&self) -> &str {
            &self.device_name
        }
    }

    impl AudioDevice for CpalAudioDevice {
        fn open(&mut self, spec: AudioSpec, mut callback: AudioCallback) -> Result<()> {
            if spec.bytes_per_sample != 2 {
                return Err(Error::AudioOutput(format!(
                    "cpal output expects 16-bit samples, got {} bytes",
                    spec.bytes_per_sample
                )));
            }

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;
            self.device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            info!("Using audio output device: {}", self.device_name);

            let config = StreamConfig {
                channels: spec.channels,
                sample_rate: SampleRate(spec.sample_rate),
                buffer_size: BufferSize::Fixed(self.frames_per_callback),
            };

            let mut scratch = Vec::new();
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len() * 2, 0);
                        callback.fill(&mut scratch);
                        for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(2)) {
                            *sample = i16::from_ne_bytes([bytes[0], bytes[1]]);
                        }
                    },
                    |err| error!("Audio stream error: {err}"),
                    None,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))?;

            self.stream = Some(stream);
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            let stream = self
                .stream
                .as_ref()
                .ok_or_else(|| Error::AudioOutput("device started before open".into()))?;
            stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                if let Err(e) = stream.pause() {
                    error!("Failed to pause stream: {e}");
                }
            }
        }
    }
}
