//! Decoder backends and the adapter that hides which one is active.
//!
//! Two interchangeable backends sit behind [`DecoderBackend`]: the platform
//! (hardware) decoder and the openh264 software decoder. Backends report
//! pictures and asynchronous failures as [`BackendEvent`]s on a channel, so the
//! session sees one ordered stream of decoder output regardless of backend.

pub mod adapter;
pub mod platform;
pub mod software;

use tokio::sync::mpsc;

use crate::config::Geometry;
use crate::error::DecodeError;
use crate::stream::nal::{self, DEFAULT_AVC_CODEC};

pub use adapter::{AdapterState, DecoderAdapter, DecodeOutcome};

/// Configuration handed to a backend before the first picture
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// SPS and PPS, each behind a 4-byte start code
    pub description: Vec<u8>,
}

impl DecoderConfig {
    /// Build from the stored parameter sets at the current geometry.
    pub fn from_parameter_sets(sps: &[u8], pps: &[u8], geometry: Geometry) -> Self {
        Self {
            codec: nal::avc_codec_string(sps),
            coded_width: geometry.width,
            coded_height: geometry.height,
            description: nal::parameter_set_description(sps, pps),
        }
    }

    /// Codec derived from the SPS if one is known, without a description.
    pub fn for_geometry(sps: Option<&[u8]>, geometry: Geometry) -> Self {
        Self {
            codec: sps
                .map(nal::avc_codec_string)
                .unwrap_or_else(|| DEFAULT_AVC_CODEC.to_string()),
            coded_width: geometry.width,
            coded_height: geometry.height,
            description: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Key,
    Delta,
}

/// One unit of compressed video submitted to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub kind: ChunkType,
    /// Presentation timestamp in microseconds
    pub timestamp: u64,
    pub data: Vec<u8>,
}

impl EncodedChunk {
    pub fn key(data: Vec<u8>) -> Self {
        Self {
            kind: ChunkType::Key,
            timestamp: 0,
            data,
        }
    }

    pub fn delta(data: Vec<u8>) -> Self {
        Self {
            kind: ChunkType::Delta,
            timestamp: 0,
            data,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A decoder-owned picture that must be explicitly released.
pub trait NativeFrame: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// RGBA view of the picture, `width * height * 4` bytes
    fn rgba(&self) -> &[u8];
    /// Hand the picture back to the decoder.
    fn close(self: Box<Self>);
}

/// Picture produced by the software path
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decoded picture waiting for presentation. Exactly one representation per
/// frame; consuming [`DecodedFrame::close`] releases it exactly once.
pub enum DecodedFrame {
    Native(Box<dyn NativeFrame>),
    Rgba(RgbaFrame),
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        match self {
            DecodedFrame::Native(frame) => frame.width(),
            DecodedFrame::Rgba(frame) => frame.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            DecodedFrame::Native(frame) => frame.height(),
            DecodedFrame::Rgba(frame) => frame.height,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        match self {
            DecodedFrame::Native(frame) => frame.rgba(),
            DecodedFrame::Rgba(frame) => &frame.data,
        }
    }

    pub fn close(self) {
        match self {
            DecodedFrame::Native(frame) => frame.close(),
            DecodedFrame::Rgba(_) => {}
        }
    }
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            DecodedFrame::Native(_) => "native",
            DecodedFrame::Rgba(_) => "rgba",
        };
        write!(f, "DecodedFrame({} {}x{})", kind, self.width(), self.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hardware,
    Software,
}

#[derive(Debug)]
pub enum BackendEventKind {
    Frame(DecodedFrame),
    Error(String),
}

/// Output of one backend instance, tagged with the generation it was
/// created in so the adapter can discard output of replaced backends.
#[derive(Debug)]
pub struct BackendEvent {
    pub generation: u64,
    pub kind: BackendEventKind,
}

/// Where a backend delivers its pictures and asynchronous errors
#[derive(Debug, Clone)]
pub struct BackendOutput {
    generation: u64,
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl BackendOutput {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn frame(&self, frame: DecodedFrame) {
        let event = BackendEvent {
            generation: self.generation,
            kind: BackendEventKind::Frame(frame),
        };
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            // Session is gone; release the picture ourselves
            if let BackendEventKind::Frame(frame) = event.kind {
                frame.close();
            }
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        let _ = self.tx.send(BackendEvent {
            generation: self.generation,
            kind: BackendEventKind::Error(message.into()),
        });
    }
}

/// Common contract of the hardware and software decoders.
pub trait DecoderBackend {
    fn kind(&self) -> BackendKind;

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError>;

    fn decode(&mut self, chunk: EncodedChunk) -> Result<(), DecodeError>;

    /// Chunks submitted but not yet turned into pictures
    fn decode_queue_size(&self) -> usize {
        0
    }
}

/// Constructs backends. Construction failure is how a platform reports that a
/// decoder is not available.
pub trait BackendFactory {
    fn hardware(&self, output: BackendOutput) -> Result<Box<dyn DecoderBackend>, DecodeError>;

    fn software(&self, output: BackendOutput) -> Result<Box<dyn DecoderBackend>, DecodeError>;
}
