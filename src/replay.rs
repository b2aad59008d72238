//! Feed a recorded Annex-B stream through the session as if it came off the
//! socket.

use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::pipeline::SessionHandle;
use crate::stream::nal::{self, NalType};

/// Read a `.h264` file and split it into start-code-prefixed units.
pub fn load_units(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read recording {}", path.display()))?;
    let units: Vec<Vec<u8>> = nal::split_annexb(&data)
        .into_iter()
        .map(Cow::into_owned)
        .collect();
    if units.is_empty() {
        anyhow::bail!("{} contains no Annex-B NAL units", path.display());
    }
    info!(path = %path.display(), units = units.len(), "loaded recording");
    Ok(units)
}

fn is_picture(unit: &[u8]) -> bool {
    matches!(nal::nal_type(unit), Some(NalType::Slice | NalType::Idr))
}

/// Send every unit to the session, pausing after each picture to hold `fps`.
/// Returns the number of pictures sent.
pub async fn feed(handle: &SessionHandle, units: Vec<Vec<u8>>, fps: u32) -> usize {
    let frame_interval = Duration::from_secs(1) / fps.max(1);
    let mut pictures = 0;
    for unit in units {
        let picture = is_picture(&unit);
        if !handle.binary(unit) {
            break;
        }
        if picture {
            pictures += 1;
            tokio::time::sleep(frame_interval).await;
        }
    }
    pictures
}
