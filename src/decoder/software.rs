//! openh264 software decoder producing RGBA pictures.

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use tracing::debug;

use super::{
    BackendKind, BackendOutput, DecodedFrame, DecoderBackend, DecoderConfig, EncodedChunk,
    RgbaFrame,
};
use crate::error::DecodeError;

pub struct OpenH264Backend {
    decoder: Decoder,
    output: BackendOutput,
    configured: Option<DecoderConfig>,
}

impl OpenH264Backend {
    pub fn new(output: BackendOutput) -> Result<Self, DecodeError> {
        let decoder = Decoder::new().map_err(|e| DecodeError::Unavailable(e.to_string()))?;
        Ok(Self {
            decoder,
            output,
            configured: None,
        })
    }
}

impl DecoderBackend for OpenH264Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError> {
        if !config.codec.starts_with("avc1.") {
            return Err(DecodeError::Configure(format!(
                "codec {} is not supported by the software decoder",
                config.codec
            )));
        }
        // Fresh decoder so stale parameter sets do not leak into the new stream
        self.decoder = Decoder::new().map_err(|e| DecodeError::Configure(e.to_string()))?;
        self.configured = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<(), DecodeError> {
        let picture = self
            .decoder
            .decode(&chunk.data)
            .map_err(|e| DecodeError::Decode(e.to_string()))?;

        let Some(yuv) = picture else {
            // Parameter sets and partial access units produce nothing
            return Ok(());
        };

        let (width, height) = yuv.dimensions();
        let mut data = vec![0u8; width * height * 4];
        yuv.write_rgba8(&mut data);
        debug!(width, height, "software decoder produced picture");

        self.output.frame(DecodedFrame::Rgba(RgbaFrame {
            data,
            width: width as u32,
            height: height as u32,
        }));
        Ok(())
    }
}
