//! Direct-mode messages: codec configuration and frame data already framed by
//! the sender, decoded without NAL routing.

use std::borrow::Cow;

use tracing::{debug, info, warn};

use super::classifier::StreamMetadataHeader;
use super::nal::{self, NalType};
use crate::config::Geometry;
use crate::decoder::{DecodeOutcome, DecoderAdapter, DecoderConfig, EncodedChunk};
use crate::protocol::{MEDIA_MESSAGE_CODEC_CONFIG, MEDIA_MESSAGE_DATA};

pub const DIRECT_AVC_CODEC: &str = "avc1.640028";
pub const DIRECT_HEVC_CODEC: &str = "hev1.1.6.L93.B0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    Avc,
    Hevc,
}

impl CodecFamily {
    /// Annex-B framed configuration means H.264, anything else H.265.
    pub fn detect(config: &[u8]) -> Self {
        if nal::contains_start_code(config) {
            CodecFamily::Avc
        } else {
            CodecFamily::Hevc
        }
    }

    /// Short name reported in telemetry
    pub fn name(self) -> &'static str {
        match self {
            CodecFamily::Avc => "avc",
            CodecFamily::Hevc => "hevc",
        }
    }

    pub fn codec_string(self) -> &'static str {
        match self {
            CodecFamily::Avc => DIRECT_AVC_CODEC,
            CodecFamily::Hevc => DIRECT_HEVC_CODEC,
        }
    }
}

#[derive(Debug, Default)]
pub struct DirectHandler {
    codec: Option<CodecFamily>,
    config: Option<DecoderConfig>,
}

impl DirectHandler {
    pub fn codec(&self) -> Option<CodecFamily> {
        self.codec
    }

    /// Last codec configuration rebuilt for a new coded size
    pub fn config_for(&self, geometry: Geometry) -> Option<DecoderConfig> {
        self.config.as_ref().map(|config| DecoderConfig {
            coded_width: geometry.width,
            coded_height: geometry.height,
            ..config.clone()
        })
    }

    /// Handle one direct message. `None` means the message was not one this
    /// handler understands and was dropped.
    pub fn handle(
        &mut self,
        header: &StreamMetadataHeader,
        payload: &[u8],
        adapter: &mut DecoderAdapter,
        geometry: Geometry,
    ) -> Option<Vec<DecodeOutcome>> {
        match header.media_message_id() {
            Some(MEDIA_MESSAGE_CODEC_CONFIG) => Some(self.codec_config(payload, adapter, geometry)),
            Some(MEDIA_MESSAGE_DATA) => {
                let timestamp = header
                    .timestamp()
                    .map(|ts| ts.max(0.0) as u64)
                    .unwrap_or_else(wall_clock_micros);
                let family = self.codec.unwrap_or(CodecFamily::Avc);
                let chunk = frame_chunk(payload, family).with_timestamp(timestamp);
                Some(vec![adapter.decode(chunk)])
            }
            other => {
                warn!(media_message_id = ?other, "unknown media message id, dropping");
                None
            }
        }
    }

    fn codec_config(
        &mut self,
        payload: &[u8],
        adapter: &mut DecoderAdapter,
        geometry: Geometry,
    ) -> Vec<DecodeOutcome> {
        let family = CodecFamily::detect(payload);
        info!(codec = ?family, "received codec config");
        self.codec = Some(family);

        let config = DecoderConfig {
            codec: family.codec_string().to_string(),
            coded_width: geometry.width,
            coded_height: geometry.height,
            description: payload.to_vec(),
        };

        let outcome = adapter.configure(&config);
        let mut outcomes = vec![outcome];
        if outcome == DecodeOutcome::FailedOver {
            outcomes.push(adapter.configure(&config));
        }
        self.config = Some(config);
        outcomes
    }
}

/// Frame data is a keyframe when it carries an IDR picture or fresh parameter
/// sets. HEVC data without start codes is length-prefixed, which puts the
/// first header byte at the same offset.
fn frame_chunk(payload: &[u8], family: CodecFamily) -> EncodedChunk {
    let is_key = match family {
        CodecFamily::Avc => nal::unit_types(payload)
            .into_iter()
            .any(|t| matches!(t, NalType::Idr | NalType::Sps)),
        CodecFamily::Hevc => {
            let units = if nal::contains_start_code(payload) {
                nal::split_annexb(payload)
            } else {
                vec![Cow::Borrowed(payload)]
            };
            units.iter().any(|unit| {
                unit.get(nal::NAL_TYPE_OFFSET)
                    .is_some_and(|&header| nal::is_hevc_key(nal::hevc_type(header)))
            })
        }
    };
    debug!(len = payload.len(), is_key, "direct frame data");
    if is_key {
        EncodedChunk::key(payload.to_vec())
    } else {
        EncodedChunk::delta(payload.to_vec())
    }
}

fn wall_clock_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}
