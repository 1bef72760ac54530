//! Scripted collaborators for exercising the pipeline without real media.

#![allow(clippy::unwrap_used)]

use lockstep_core::{AudioBlock, AudioSpec, Error, Packet, Result, VideoFrame};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::pipeline::AudioCallback;
use crate::source::{
    AudioDecoder, AudioDevice, AudioFilter, Demuxer, SinkEvent, VideoDecoder, VideoSink,
};

/// Packet payload that makes the test decoders report a per-packet error.
pub const CORRUPT: u8 = 0xFF;
/// Packet payload that makes the test decoders report a fatal error.
pub const BROKEN: u8 = 0xFE;

pub struct ScriptedDemuxer {
    script: VecDeque<Result<Packet>>,
}

impl ScriptedDemuxer {
    pub fn new(script: Vec<Result<Packet>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl Demuxer for ScriptedDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        self.script.pop_front().transpose()
    }
}

fn check_payload(packet: &Packet) -> Result<()> {
    match packet.data.first() {
        Some(&CORRUPT) => Err(Error::Decode("corrupt packet".into())),
        Some(&BROKEN) => Err(Error::Fatal("decoder lost its device".into())),
        _ => Ok(()),
    }
}

/// Emits a tiny black frame per packet, one packet late, like a decoder
/// with a reorder delay.
#[derive(Default)]
pub struct DelayedVideoDecoder {
    held: Option<VideoFrame>,
    ready: VecDeque<VideoFrame>,
    pub closed: Arc<AtomicBool>,
}

impl VideoDecoder for DelayedVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        check_payload(packet)?;
        let frame = VideoFrame::black(4, 2, packet.pts);
        if let Some(previous) = self.held.replace(frame) {
            self.ready.push_back(previous);
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<VideoFrame>> {
        Ok(self.ready.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        self.ready.extend(self.held.take());
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One mono sample per payload byte.
#[derive(Default)]
pub struct ByteAudioDecoder {
    ready: VecDeque<AudioBlock>,
    pub closed: Arc<AtomicBool>,
}

impl AudioDecoder for ByteAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        check_payload(packet)?;
        self.ready.push_back(AudioBlock {
            samples: packet.data.iter().map(|b| f32::from(*b)).collect(),
            channels: 1,
            sample_rate: 8_000,
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

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Turns every sample back into one byte, 8 kHz mono.
#[derive(Default)]
pub struct ByteFilter {
    pending: VecDeque<Vec<u8>>,
}

impl AudioFilter for ByteFilter {
    fn output_spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: 8_000,
            channels: 1,
            bytes_per_sample: 1,
        }
    }

    fn push(&mut self, block: AudioBlock) -> Result<()> {
        self.pending
            .push_back(block.samples.iter().map(|s| *s as u8).collect());
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Records presented pts; optionally asks to quit after some frames.
#[derive(Default)]
pub struct RecordingSink {
    pub presented: Vec<Option<i64>>,
    pub quit_after: Option<usize>,
}

impl VideoSink for RecordingSink {
    fn present(&mut self, frame: &VideoFrame) -> Result<()> {
        self.presented.push(frame.pts);
        Ok(())
    }

    fn pump_events(&mut self) -> SinkEvent {
        match self.quit_after {
            Some(limit) if self.presented.len() >= limit => SinkEvent::Quit,
            _ => SinkEvent::Continue,
        }
    }
}

/// Calls the output callback from a plain thread every millisecond.
pub struct ThreadDevice {
    chunk: usize,
    callback: Arc<Mutex<Option<AudioCallback>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    pub fail_open: bool,
}

impl ThreadDevice {
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk,
            callback: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            fail_open: false,
        }
    }
}

impl AudioDevice for ThreadDevice {
    fn open(&mut self, _spec: AudioSpec, callback: AudioCallback) -> Result<()> {
        if self.fail_open {
            return Err(Error::AudioOutput("no such device".into()));
        }
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let callback = self.callback.clone();
        let chunk = self.chunk;
        self.thread = Some(std::thread::spawn(move || {
            let mut scratch = vec![0u8; chunk];
            while running.load(Ordering::SeqCst) {
                if let Some(callback) = callback.lock().as_mut() {
                    callback.fill(&mut scratch);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }));
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
        self.callback.lock().take();
    }
}
