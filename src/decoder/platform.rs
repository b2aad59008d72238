//! Backend construction for the host platform.

use super::software::OpenH264Backend;
use super::{BackendFactory, BackendOutput, DecoderBackend};
use crate::error::DecodeError;

/// Backends available on this host. There is no platform hardware decoder
/// binding yet, so the hardware slot always reports unavailability and the
/// adapter starts on openh264.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformBackends;

impl BackendFactory for PlatformBackends {
    fn hardware(&self, _output: BackendOutput) -> Result<Box<dyn DecoderBackend>, DecodeError> {
        Err(DecodeError::Unavailable(
            "no hardware video decoder on this platform".to_string(),
        ))
    }

    fn software(&self, output: BackendOutput) -> Result<Box<dyn DecoderBackend>, DecodeError> {
        Ok(Box::new(OpenH264Backend::new(output)?))
    }
}
