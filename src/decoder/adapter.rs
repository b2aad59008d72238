use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    BackendEvent, BackendEventKind, BackendFactory, BackendKind, BackendOutput, DecodedFrame,
    DecoderBackend, DecoderConfig, EncodedChunk,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Hardware,
    /// Terminal: there is no way back to the hardware decoder
    SoftwareOnly,
    /// No backend could be constructed
    Unavailable,
}

/// Result of handing work to the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Submitted,
    /// Hardware decoder not configured yet, chunk skipped
    Skipped,
    /// Software decoder rejected the chunk, chunk dropped
    Dropped,
    /// The hardware decoder failed; its chunk was dropped and the software
    /// decoder replaced it
    FailedOver,
    /// The hardware decoder failed and no software decoder could be built
    DecoderLost,
    /// Nothing to decode with
    Unavailable,
}

/// What a backend event amounted to
#[derive(Debug)]
pub enum BackendUpdate {
    Frame(DecodedFrame),
    Failover(DecodeOutcome),
    Ignored,
}

/// Single push interface over whichever backend is active. Swaps the hardware
/// decoder for the software one on the first failure.
pub struct DecoderAdapter {
    factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn DecoderBackend>>,
    state: AdapterState,
    configured: bool,
    generation: u64,
    events: mpsc::UnboundedSender<BackendEvent>,
    codec_errors: u64,
}

impl DecoderAdapter {
    pub fn new(factory: Box<dyn BackendFactory>, events: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self {
            factory,
            backend: None,
            state: AdapterState::Uninitialized,
            configured: false,
            generation: 0,
            events,
            codec_errors: 0,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn codec_errors(&self) -> u64 {
        self.codec_errors
    }

    pub fn decode_queue_size(&self) -> usize {
        self.backend.as_ref().map_or(0, |b| b.decode_queue_size())
    }

    fn output(&self) -> BackendOutput {
        BackendOutput::new(self.generation, self.events.clone())
    }

    /// Pick the initial backend. Hardware is tried first unless
    /// `force_software` is set.
    pub fn init(&mut self, force_software: bool) -> AdapterState {
        if self.state != AdapterState::Uninitialized {
            return self.state;
        }

        if force_software {
            info!("forcing software decoder");
        } else {
            match self.factory.hardware(self.output()) {
                Ok(backend) => {
                    info!("hardware decoder initialized");
                    self.backend = Some(backend);
                    self.state = AdapterState::Hardware;
                    return self.state;
                }
                Err(e) => warn!(error = %e, "hardware decoder unavailable, using software"),
            }
        }

        self.start_software();
        self.state
    }

    fn start_software(&mut self) {
        match self.factory.software(self.output()) {
            Ok(backend) => {
                info!("software decoder initialized");
                self.backend = Some(backend);
                self.state = AdapterState::SoftwareOnly;
            }
            Err(e) => {
                warn!(error = %e, "software decoder unavailable");
                self.backend = None;
                self.state = AdapterState::Unavailable;
            }
        }
    }

    /// Drop the hardware instance and continue on the software decoder.
    fn failover(&mut self, reason: &str) -> DecodeOutcome {
        warn!(reason, "hardware decoder failed, switching to software");
        self.codec_errors += 1;
        // The failed instance is dropped without further calls
        self.backend = None;
        self.generation += 1;
        self.configured = false;
        self.start_software();
        match self.state {
            AdapterState::SoftwareOnly => DecodeOutcome::FailedOver,
            _ => DecodeOutcome::DecoderLost,
        }
    }

    /// Configure the active backend and prime it with the parameter sets.
    pub fn configure(&mut self, config: &DecoderConfig) -> DecodeOutcome {
        let Some(backend) = self.backend.as_mut() else {
            return DecodeOutcome::Unavailable;
        };
        let kind = backend.kind();

        let mut result = backend.configure(config);
        if result.is_ok() && !config.description.is_empty() {
            result = backend.decode(EncodedChunk::key(config.description.clone()));
        }

        match (result, kind) {
            (Ok(()), _) => {
                debug!(codec = %config.codec, width = config.coded_width, height = config.coded_height, "decoder configured");
                self.configured = true;
                DecodeOutcome::Submitted
            }
            (Err(e), BackendKind::Hardware) => self.failover(&e.to_string()),
            (Err(e), BackendKind::Software) => {
                warn!(error = %e, "software decoder rejected configuration");
                self.codec_errors += 1;
                DecodeOutcome::Dropped
            }
        }
    }

    pub fn decode(&mut self, chunk: EncodedChunk) -> DecodeOutcome {
        let Some(backend) = self.backend.as_mut() else {
            return DecodeOutcome::Unavailable;
        };

        match backend.kind() {
            BackendKind::Hardware => {
                if !self.configured {
                    debug!(kind = ?chunk.kind, "hardware decoder not configured, skipping chunk");
                    return DecodeOutcome::Skipped;
                }
                match backend.decode(chunk) {
                    Ok(()) => DecodeOutcome::Submitted,
                    Err(e) => self.failover(&e.to_string()),
                }
            }
            BackendKind::Software => match backend.decode(chunk) {
                Ok(()) => DecodeOutcome::Submitted,
                Err(e) => {
                    debug!(error = %e, "software decoder dropped chunk");
                    self.codec_errors += 1;
                    DecodeOutcome::Dropped
                }
            },
        }
    }

    /// Digest a picture or asynchronous error reported by a backend.
    pub fn on_backend_event(&mut self, event: BackendEvent) -> BackendUpdate {
        if event.generation != self.generation {
            if let BackendEventKind::Frame(frame) = event.kind {
                frame.close();
            }
            return BackendUpdate::Ignored;
        }

        match event.kind {
            BackendEventKind::Frame(frame) => BackendUpdate::Frame(frame),
            BackendEventKind::Error(message) if self.state == AdapterState::Hardware => {
                BackendUpdate::Failover(self.failover(&message))
            }
            BackendEventKind::Error(message) => {
                warn!(error = %message, "software decoder error");
                self.codec_errors += 1;
                BackendUpdate::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Behaviour, Call, CountingFrame, MockFactory};
    use super::super::{BackendKind, ChunkType};
    use super::*;
    use crate::config::Geometry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn adapter(factory: &MockFactory) -> (DecoderAdapter, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DecoderAdapter::new(Box::new(factory.clone()), tx), rx)
    }

    fn bare_config() -> DecoderConfig {
        DecoderConfig::for_geometry(None, Geometry::new(640, 480))
    }

    #[test]
    fn test_prefers_hardware() {
        let factory = MockFactory::default();
        let (mut adapter, _rx) = adapter(&factory);
        assert_eq!(adapter.init(false), AdapterState::Hardware);
    }

    #[test]
    fn test_construction_failure_falls_back() {
        let factory = MockFactory {
            hardware: Behaviour {
                fail_construct: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut adapter, _rx) = adapter(&factory);
        assert_eq!(adapter.init(false), AdapterState::SoftwareOnly);
        assert_eq!(*factory.constructed.borrow(), vec![(BackendKind::Software, 0)]);
    }

    #[test]
    fn test_forced_software_skips_hardware() {
        let factory = MockFactory::default();
        let (mut adapter, _rx) = adapter(&factory);
        assert_eq!(adapter.init(true), AdapterState::SoftwareOnly);
        assert_eq!(*factory.constructed.borrow(), vec![(BackendKind::Software, 0)]);
    }

    #[test]
    fn test_no_decoder_at_all() {
        let unavailable = Behaviour {
            fail_construct: true,
            ..Default::default()
        };
        let factory = MockFactory {
            hardware: unavailable,
            software: unavailable,
            ..Default::default()
        };
        let (mut adapter, _rx) = adapter(&factory);
        assert_eq!(adapter.init(false), AdapterState::Unavailable);
        assert_eq!(
            adapter.decode(EncodedChunk::key(vec![1])),
            DecodeOutcome::Unavailable
        );
    }

    #[test]
    fn test_hardware_skips_until_configured() {
        let factory = MockFactory::default();
        let (mut adapter, _rx) = adapter(&factory);
        adapter.init(false);

        assert_eq!(adapter.decode(EncodedChunk::delta(vec![1])), DecodeOutcome::Skipped);
        assert!(factory.calls().is_empty());
    }

    #[test]
    fn test_configure_primes_with_description() {
        let factory = MockFactory::default();
        let (mut adapter, _rx) = adapter(&factory);
        adapter.init(false);

        let mut config = bare_config();
        config.description = vec![0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x68];
        assert_eq!(adapter.configure(&config), DecodeOutcome::Submitted);

        let calls = factory.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], Call::Configure(BackendKind::Hardware, 0, config.clone()));
        match &calls[1] {
            Call::Decode(BackendKind::Hardware, 0, chunk) => {
                assert_eq!(chunk.kind, ChunkType::Key);
                assert_eq!(chunk.data, config.description);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn test_decode_failure_moves_next_chunk_to_software() {
        let factory = MockFactory {
            hardware: Behaviour {
                fail_decode: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut adapter, _rx) = adapter(&factory);
        adapter.init(false);
        adapter.configure(&bare_config());

        let first = EncodedChunk::key(vec![1, 2, 3]);
        let second = EncodedChunk::delta(vec![4, 5, 6]);
        assert_eq!(adapter.decode(first.clone()), DecodeOutcome::FailedOver);
        assert_eq!(adapter.state(), AdapterState::SoftwareOnly);
        assert_eq!(adapter.decode(second.clone()), DecodeOutcome::Submitted);

        assert_eq!(
            factory.calls(),
            vec![
                Call::Configure(BackendKind::Hardware, 0, bare_config()),
                Call::Decode(BackendKind::Hardware, 0, first),
                Call::Decode(BackendKind::Software, 1, second),
            ]
        );
    }

    #[test]
    fn test_configure_failure_fails_over() {
        let factory = MockFactory {
            hardware: Behaviour {
                fail_configure: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut adapter, _rx) = adapter(&factory);
        adapter.init(false);

        assert_eq!(adapter.configure(&bare_config()), DecodeOutcome::FailedOver);
        assert_eq!(adapter.configure(&bare_config()), DecodeOutcome::Submitted);
        assert_eq!(
            factory.calls().last(),
            Some(&Call::Configure(BackendKind::Software, 1, bare_config()))
        );
    }

    #[test]
    fn test_failover_without_software_loses_decoder() {
        let factory = MockFactory {
            hardware: Behaviour {
                fail_decode: true,
                ..Default::default()
            },
            software: Behaviour {
                fail_construct: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut adapter, _rx) = adapter(&factory);
        adapter.init(false);
        adapter.configure(&bare_config());

        assert_eq!(adapter.decode(EncodedChunk::key(vec![1])), DecodeOutcome::DecoderLost);
        assert_eq!(adapter.state(), AdapterState::Unavailable);
        assert_eq!(adapter.decode(EncodedChunk::key(vec![1])), DecodeOutcome::Unavailable);
    }

    #[test]
    fn test_async_hardware_error_fails_over() {
        let factory = MockFactory::default();
        let (mut adapter, _rx) = adapter(&factory);
        adapter.init(false);

        let update = adapter.on_backend_event(BackendEvent {
            generation: 0,
            kind: BackendEventKind::Error("gpu reset".into()),
        });
        assert!(matches!(update, BackendUpdate::Failover(DecodeOutcome::FailedOver)));
        assert_eq!(adapter.state(), AdapterState::SoftwareOnly);
    }

    #[test]
    fn test_stale_frames_are_released() {
        let factory = MockFactory::default();
        let (mut adapter, _rx) = adapter(&factory);
        adapter.init(false);
        adapter.on_backend_event(BackendEvent {
            generation: 0,
            kind: BackendEventKind::Error("lost".into()),
        });

        let closed = Arc::new(AtomicUsize::new(0));
        let update = adapter.on_backend_event(BackendEvent {
            generation: 0,
            kind: BackendEventKind::Frame(CountingFrame::boxed(&closed, 2, 2)),
        });
        assert!(matches!(update, BackendUpdate::Ignored));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_frames_arrive_on_channel() {
        let factory = MockFactory {
            software: Behaviour {
                emit_frames: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut adapter, mut rx) = adapter(&factory);
        adapter.init(true);
        adapter.decode(EncodedChunk::key(vec![1]));

        let event = rx.try_recv().unwrap();
        match adapter.on_backend_event(event) {
            BackendUpdate::Frame(frame) => assert_eq!((frame.width(), frame.height()), (4, 4)),
            other => panic!("expected frame, got {:?}", other),
        }
    }
}
