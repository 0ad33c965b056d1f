//! Audio source seam: microphone access behind traits, with a cpal-backed
//! implementation. The cpal stream lives on its own owner thread (streams
//! are not freely movable across threads); the source handle talks to it
//! through a command channel and shares the ring buffer the capture
//! callback writes into.

pub mod ring_buffer;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::classify::AudioFormat;
use ring_buffer::RingBuffer;

/// The audio device disappeared or was released under the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceGone;

impl std::fmt::Display for SourceGone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "audio source unavailable")
    }
}

#[derive(Debug)]
pub enum AudioOpenError {
    /// The platform cannot report a usable input configuration.
    ConfigUnavailable,
    /// Device exists but the stream could not be built or started.
    BuildFailed(String),
}

impl std::fmt::Display for AudioOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioOpenError::ConfigUnavailable => write!(f, "audio configuration unavailable"),
            AudioOpenError::BuildFailed(msg) => write!(f, "audio stream build failed: {msg}"),
        }
    }
}

/// An opened microphone-backed source. Driven from the scheduler worker;
/// `release` may additionally be called from a controlling thread.
pub trait AudioSource: Send {
    /// Whether the source reached a usable state after opening.
    fn is_ready(&self) -> bool;

    /// Enter the active-recording state. Idempotent.
    fn start_capture(&mut self);

    /// Leave the active-recording state. Idempotent.
    fn stop_capture(&mut self);

    /// Stop capture and free the device. Idempotent; after release every
    /// `load_into` fails with `SourceGone`.
    fn release(&mut self);

    /// Copy the most recent samples into `frame`, oldest first.
    fn load_into(&mut self, frame: &mut [i16]) -> Result<usize, SourceGone>;
}

/// Opens audio sources for a required format.
pub trait AudioBackend: Send + Sync {
    /// Minimum capture buffer size in samples, or `None` when the platform
    /// cannot report a valid configuration for this format.
    fn minimum_buffer_size(&self, format: &AudioFormat) -> Option<usize>;

    fn open(
        &self,
        format: &AudioFormat,
        buffer_size: usize,
    ) -> Result<Box<dyn AudioSource>, AudioOpenError>;
}

/// Commands sent to the stream-owner thread.
enum StreamCmd {
    Play,
    Pause,
    Shutdown,
}

/// Default microphone backend built on cpal.
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn minimum_buffer_size(&self, format: &AudioFormat) -> Option<usize> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let device = host.default_input_device()?;
        let supported = device.default_input_config().ok()?;

        // Never go below 100ms worth of samples regardless of what the
        // device advertises; the tick loop reads trailing windows.
        let floor = format.sample_rate as usize / 10;
        match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } => Some((*min as usize).max(floor)),
            cpal::SupportedBufferSize::Unknown => Some(floor),
        }
    }

    fn open(
        &self,
        format: &AudioFormat,
        buffer_size: usize,
    ) -> Result<Box<dyn AudioSource>, AudioOpenError> {
        // Ring holds at least two seconds so a full classifier input frame
        // always fits behind the write cursor.
        let ring_capacity = buffer_size.max(format.sample_rate as usize * 2);
        let ring = Arc::new(Mutex::new(RingBuffer::new(ring_capacity)));

        let (cmd_tx, cmd_rx) = cb::unbounded::<StreamCmd>();
        let (built_tx, built_rx) = cb::bounded::<Result<(), String>>(1);

        let stream_format = *format;
        let stream_ring = Arc::clone(&ring);
        let owner = std::thread::Builder::new()
            .name("audio-stream".into())
            .spawn(move || run_stream_owner(stream_format, stream_ring, cmd_rx, built_tx))
            .map_err(|e| AudioOpenError::BuildFailed(format!("spawn failed: {e}")))?;

        let ready = match built_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "input stream build failed");
                false
            }
            Err(_) => {
                warn!("timed out waiting for input stream");
                false
            }
        };

        Ok(Box::new(CpalSource {
            ring,
            cmd_tx,
            owner: Some(owner),
            ready,
            capturing: false,
            released: false,
        }))
    }
}

/// Stream-owner loop: builds the cpal input stream on this thread and keeps
/// it alive until shutdown. The capture callback only writes to the ring.
fn run_stream_owner(
    format: AudioFormat,
    ring: Arc<Mutex<RingBuffer>>,
    cmd_rx: cb::Receiver<StreamCmd>,
    built_tx: cb::Sender<Result<(), String>>,
) {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = built_tx.send(Err("no audio input device available".to_string()));
            return;
        }
    };

    let stream_config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match device.build_input_stream(
        &stream_config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            // Audio callback: just write to the ring. No allocation, no blocking.
            let mut rb = ring.lock();
            rb.write(data);
        },
        |err| {
            error!(error = %err, "audio capture error");
        },
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = built_tx.send(Err(format!("failed to build input stream: {e}")));
            return;
        }
    };

    let _ = built_tx.send(Ok(()));
    info!("audio input stream built");

    for cmd in cmd_rx.iter() {
        match cmd {
            StreamCmd::Play => {
                if let Err(e) = stream.play() {
                    error!(error = %e, "failed to start audio stream");
                }
            }
            StreamCmd::Pause => {
                if let Err(e) = stream.pause() {
                    debug!(error = %e, "audio stream pause failed");
                }
            }
            StreamCmd::Shutdown => break,
        }
    }
    // Stream drops here, stopping capture.
    debug!("audio stream owner exiting");
}

struct CpalSource {
    ring: Arc<Mutex<RingBuffer>>,
    cmd_tx: cb::Sender<StreamCmd>,
    owner: Option<std::thread::JoinHandle<()>>,
    ready: bool,
    capturing: bool,
    released: bool,
}

impl AudioSource for CpalSource {
    fn is_ready(&self) -> bool {
        self.ready && !self.released
    }

    fn start_capture(&mut self) {
        if self.released || self.capturing {
            return;
        }
        self.capturing = true;
        let _ = self.cmd_tx.send(StreamCmd::Play);
    }

    fn stop_capture(&mut self) {
        if self.released || !self.capturing {
            return;
        }
        self.capturing = false;
        let _ = self.cmd_tx.send(StreamCmd::Pause);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.capturing = false;
        let _ = self.cmd_tx.send(StreamCmd::Shutdown);
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
        info!("audio source released");
    }

    fn load_into(&mut self, frame: &mut [i16]) -> Result<usize, SourceGone> {
        if self.released || !self.ready {
            return Err(SourceGone);
        }
        let rb = self.ring.lock();
        Ok(rb.latest_into(frame))
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.release();
    }
}
