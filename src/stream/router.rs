use tracing::{debug, info};

use super::nal::{self, NalType};
use crate::config::Geometry;
use crate::decoder::{DecodeOutcome, DecoderAdapter, DecoderConfig, EncodedChunk};

/// Legacy-path state machine. Holds the last SPS/PPS and turns each unit into
/// the matching adapter call.
#[derive(Debug, Default)]
pub struct NalRouter {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    split_units: bool,
}

impl NalRouter {
    pub fn new(split_units: bool) -> Self {
        Self {
            split_units,
            ..Default::default()
        }
    }

    /// Route one legacy buffer. Returns the outcome of every adapter call made.
    pub fn route(
        &mut self,
        data: &[u8],
        adapter: &mut DecoderAdapter,
        geometry: Geometry,
    ) -> Vec<DecodeOutcome> {
        let mut outcomes = Vec::new();
        if self.split_units && nal::starts_with_start_code(data) {
            for unit in nal::split_annexb(data) {
                self.route_unit(&unit, adapter, geometry, &mut outcomes);
            }
        } else {
            self.route_unit(data, adapter, geometry, &mut outcomes);
        }
        outcomes
    }

    fn route_unit(
        &mut self,
        unit: &[u8],
        adapter: &mut DecoderAdapter,
        geometry: Geometry,
        outcomes: &mut Vec<DecodeOutcome>,
    ) {
        let Some(kind) = nal::nal_type(unit) else {
            debug!(len = unit.len(), "NAL unit too short, ignoring");
            return;
        };

        match kind {
            NalType::Slice => outcomes.push(adapter.decode(EncodedChunk::delta(unit.to_vec()))),
            NalType::Idr => {
                debug!("IDR frame");
                let data = match &self.sps {
                    Some(sps) => [sps.as_slice(), unit].concat(),
                    None => unit.to_vec(),
                };
                outcomes.push(adapter.decode(EncodedChunk::key(data)));
            }
            NalType::Sps => self.sps = Some(unit.to_vec()),
            NalType::Pps => {
                let Some(sps) = &self.sps else {
                    debug!("PPS before any SPS, ignoring");
                    return;
                };
                let config = DecoderConfig::from_parameter_sets(sps, unit, geometry);
                self.pps = Some(unit.to_vec());
                info!(codec = %config.codec, width = geometry.width, height = geometry.height, "configuring decoder");

                let outcome = adapter.configure(&config);
                outcomes.push(outcome);
                if outcome == DecodeOutcome::FailedOver {
                    // Fresh software backend needs the parameter sets too
                    outcomes.push(adapter.configure(&config));
                }
            }
            NalType::Other(code) => debug!(code, "unknown NAL unit"),
        }
    }

    /// Configuration for the stored parameter sets at a new size. Without a
    /// PPS there is nothing to prime with, so only the codec is carried over.
    pub fn config_for(&self, geometry: Geometry) -> DecoderConfig {
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) => DecoderConfig::from_parameter_sets(sps, pps, geometry),
            (sps, _) => DecoderConfig::for_geometry(sps.as_deref(), geometry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::{Behaviour, Call, MockFactory};
    use crate::decoder::{BackendKind, ChunkType};
    use tokio::sync::mpsc;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x28, 0xac];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xee, 0x3c, 0x80];
    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
    const SLICE: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02];

    fn setup(factory: &MockFactory) -> DecoderAdapter {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut adapter = DecoderAdapter::new(Box::new(factory.clone()), tx);
        adapter.init(false);
        adapter
    }

    fn geometry() -> Geometry {
        Geometry::new(1280, 720)
    }

    #[test]
    fn test_sps_pps_idr_configures_once_then_decodes_key() {
        let factory = MockFactory::default();
        let mut adapter = setup(&factory);
        let mut router = NalRouter::new(false);

        router.route(SPS, &mut adapter, geometry());
        router.route(PPS, &mut adapter, geometry());
        router.route(IDR, &mut adapter, geometry());

        let calls = factory.calls();
        let configures: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, Call::Configure(..)))
            .collect();
        assert_eq!(configures.len(), 1);
        match configures[0] {
            Call::Configure(_, _, config) => {
                assert_eq!(config.codec, "avc1.640028");
                assert_eq!(config.description, [SPS, PPS].concat());
                assert_eq!((config.coded_width, config.coded_height), (1280, 720));
            }
            _ => unreachable!(),
        }

        // Priming decode of the description, then the IDR behind the SPS
        let decodes: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Decode(_, _, chunk) => Some(chunk.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(decodes.len(), 2);
        assert_eq!(decodes[1].kind, ChunkType::Key);
        assert_eq!(decodes[1].data, [SPS, IDR].concat());
    }

    #[test]
    fn test_slice_is_delta() {
        let factory = MockFactory::default();
        let mut adapter = setup(&factory);
        let mut router = NalRouter::new(false);
        router.route(SPS, &mut adapter, geometry());
        router.route(PPS, &mut adapter, geometry());
        router.route(SLICE, &mut adapter, geometry());

        match factory.calls().last() {
            Some(Call::Decode(_, _, chunk)) => {
                assert_eq!(chunk.kind, ChunkType::Delta);
                assert_eq!(chunk.data, SLICE);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_idr_without_sps_is_sent_alone() {
        let factory = MockFactory::default();
        let mut adapter = setup(&factory);
        adapter.configure(&DecoderConfig::for_geometry(None, geometry()));
        let mut router = NalRouter::new(false);

        router.route(IDR, &mut adapter, geometry());
        match factory.calls().last() {
            Some(Call::Decode(_, _, chunk)) => assert_eq!(chunk.data, IDR),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pps_without_sps_and_unknown_units_are_ignored() {
        let factory = MockFactory::default();
        let mut adapter = setup(&factory);
        let mut router = NalRouter::new(false);

        assert!(router.route(PPS, &mut adapter, geometry()).is_empty());
        assert!(router.route(&[0, 0, 0, 1, 0x06, 0x05], &mut adapter, geometry()).is_empty());
        assert!(router.route(&[0, 0], &mut adapter, geometry()).is_empty());
        assert!(factory.calls().is_empty());
    }

    #[test]
    fn test_configure_failover_reconfigures_software() {
        let factory = MockFactory {
            hardware: Behaviour {
                fail_configure: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut adapter = setup(&factory);
        let mut router = NalRouter::new(false);

        router.route(SPS, &mut adapter, geometry());
        let outcomes = router.route(PPS, &mut adapter, geometry());
        assert_eq!(outcomes, vec![DecodeOutcome::FailedOver, DecodeOutcome::Submitted]);

        let calls = factory.calls();
        assert!(matches!(calls[1], Call::Configure(BackendKind::Software, 1, _)));
        assert!(matches!(calls[2], Call::Decode(BackendKind::Software, 1, _)));
    }

    #[test]
    fn test_split_concatenated_units() {
        let factory = MockFactory::default();
        let mut adapter = setup(&factory);
        let mut router = NalRouter::new(true);

        let buf = [SPS, PPS, IDR].concat();
        router.route(&buf, &mut adapter, geometry());

        let calls = factory.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[0], Call::Configure(..)));
        assert_eq!(calls[2], Call::Decode(BackendKind::Hardware, 0, EncodedChunk::key([SPS, IDR].concat())));
    }

    #[test]
    fn test_config_for_new_geometry() {
        let factory = MockFactory::default();
        let mut adapter = setup(&factory);
        let mut router = NalRouter::new(false);
        assert_eq!(router.config_for(Geometry::new(800, 480)).codec, nal::DEFAULT_AVC_CODEC);

        router.route(SPS, &mut adapter, geometry());
        router.route(PPS, &mut adapter, geometry());
        let config = router.config_for(Geometry::new(800, 480));
        assert_eq!(config.codec, "avc1.640028");
        assert_eq!((config.coded_width, config.coded_height), (800, 480));
    }
}
