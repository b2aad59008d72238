//! Direct-mode vs legacy detection for inbound binary messages.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ClassifyError;

/// Size of the big-endian metadata length prefix
pub const HEADER_SIZE: usize = 4;
/// Smallest buffer that can hold a direct-mode message
pub const MIN_DIRECT_LEN: usize = 8;
/// Metadata lengths must be strictly below this
pub const MAX_METADATA_LEN: u32 = 1000;

/// Parsed `[u32-be len][json]` prefix of a direct-mode message
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadataHeader {
    pub metadata_len: u32,
    pub metadata: Map<String, Value>,
}

impl StreamMetadataHeader {
    pub fn raw_format(&self) -> Option<&Value> {
        self.metadata.get("rawFormat")
    }

    pub fn media_message_id(&self) -> Option<u64> {
        self.metadata.get("mediaMessageId").and_then(Value::as_u64)
    }

    /// Sender timestamp, if present
    pub fn timestamp(&self) -> Option<f64> {
        self.metadata.get("timestamp").and_then(Value::as_f64)
    }
}

/// Parse a buffer as a direct-mode message, returning the header and a view of
/// the codec payload that follows it.
pub fn parse_direct(buf: &[u8]) -> Result<(StreamMetadataHeader, &[u8]), ClassifyError> {
    if buf.len() < MIN_DIRECT_LEN {
        return Err(ClassifyError::TooShort(buf.len()));
    }

    let metadata_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if metadata_len == 0 || metadata_len >= MAX_METADATA_LEN {
        return Err(ClassifyError::BadMetadataLength(metadata_len));
    }

    let end = HEADER_SIZE + metadata_len as usize;
    if buf.len() < end {
        return Err(ClassifyError::Truncated {
            needed: end,
            have: buf.len(),
        });
    }

    let text = std::str::from_utf8(&buf[HEADER_SIZE..end]).map_err(|_| ClassifyError::NotUtf8)?;
    let metadata = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => return Err(ClassifyError::NotJson(format!("found {}", other))),
        Err(e) => return Err(ClassifyError::NotJson(e.to_string())),
    };

    for key in ["rawFormat", "mediaMessageId"] {
        if !metadata.contains_key(key) {
            return Err(ClassifyError::MissingKey(key));
        }
    }

    Ok((
        StreamMetadataHeader {
            metadata_len,
            metadata,
        },
        &buf[end..],
    ))
}

/// Routing decision for one binary message
#[derive(Debug, PartialEq)]
pub enum Classified<'a> {
    Direct {
        header: StreamMetadataHeader,
        payload: &'a [u8],
        /// This message is the one that switched the stream into direct mode
        newly_latched: bool,
    },
    Legacy(&'a [u8]),
    /// Malformed while in direct mode; the message is discarded
    Dropped(ClassifyError),
}

/// Sticky direct-mode detector.
///
/// The first recognised direct message latches direct mode. While latched,
/// messages that fail to parse are dropped; `unlatch_after` consecutive
/// failures release the latch and the failing message goes down the legacy
/// path. Buffers too short to be direct are always legacy and never count.
#[derive(Debug)]
pub struct StreamClassifier {
    latched: bool,
    consecutive_failures: u32,
    unlatch_after: u32,
}

impl StreamClassifier {
    pub fn new(unlatch_after: u32) -> Self {
        Self {
            latched: false,
            consecutive_failures: 0,
            unlatch_after: unlatch_after.max(1),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.latched
    }

    /// Forget direct mode entirely.
    pub fn reset(&mut self) {
        self.latched = false;
        self.consecutive_failures = 0;
    }

    pub fn classify<'a>(&mut self, buf: &'a [u8]) -> Classified<'a> {
        if buf.len() < MIN_DIRECT_LEN {
            return Classified::Legacy(buf);
        }

        match parse_direct(buf) {
            Ok((header, payload)) => {
                let newly_latched = !self.latched;
                if newly_latched {
                    info!(raw_format = ?header.raw_format(), "direct stream mode detected");
                }
                self.latched = true;
                self.consecutive_failures = 0;
                Classified::Direct {
                    header,
                    payload,
                    newly_latched,
                }
            }
            Err(e) if self.latched => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.unlatch_after {
                    warn!(
                        failures = self.consecutive_failures,
                        "leaving direct stream mode after repeated malformed messages"
                    );
                    self.reset();
                    Classified::Legacy(buf)
                } else {
                    debug!(error = %e, "dropping malformed direct message");
                    Classified::Dropped(e)
                }
            }
            Err(_) => Classified::Legacy(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn direct_message(metadata: &Value, payload: &[u8]) -> Vec<u8> {
        let meta = serde_json::to_vec(metadata).unwrap();
        let mut buf = (meta.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&meta);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_detects_and_latches() {
        let mut classifier = StreamClassifier::new(3);
        let buf = direct_message(&json!({"rawFormat": "h264", "mediaMessageId": 35}), &[9, 9, 9]);

        match classifier.classify(&buf) {
            Classified::Direct {
                header,
                payload,
                newly_latched,
            } => {
                assert!(newly_latched);
                assert_eq!(header.media_message_id(), Some(35));
                assert_eq!(payload, &[9, 9, 9]);
            }
            other => panic!("expected direct, got {:?}", other),
        }
        assert!(classifier.is_direct());

        match classifier.classify(&buf) {
            Classified::Direct { newly_latched, .. } => assert!(!newly_latched),
            other => panic!("expected direct, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_keys_is_legacy() {
        let mut classifier = StreamClassifier::new(3);
        let buf = direct_message(&json!({"rawFormat": "h264"}), &[1]);
        assert_eq!(classifier.classify(&buf), Classified::Legacy(&buf));
        assert!(!classifier.is_direct());
    }

    #[test]
    fn test_legacy_nal_is_legacy() {
        let mut classifier = StreamClassifier::new(3);
        let nal = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33];
        assert_eq!(classifier.classify(&nal), Classified::Legacy(&nal));
    }

    #[test]
    fn test_metadata_length_bounds() {
        let mut buf = 1000u32.to_be_bytes().to_vec();
        buf.resize(1100, b' ');
        assert_eq!(
            parse_direct(&buf).unwrap_err(),
            ClassifyError::BadMetadataLength(1000)
        );

        let mut buf = 50u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"{}{}");
        assert_eq!(
            parse_direct(&buf).unwrap_err(),
            ClassifyError::Truncated { needed: 54, have: 8 }
        );
    }

    #[test]
    fn test_unlatch_after_consecutive_failures() {
        let mut classifier = StreamClassifier::new(3);
        let good = direct_message(&json!({"rawFormat": 1, "mediaMessageId": 36}), &[]);
        let bad = [0, 0, 0, 1, 0x41, 0x9a, 0x00, 0x10, 0x20];

        assert!(matches!(classifier.classify(&good), Classified::Direct { .. }));
        assert!(matches!(classifier.classify(&bad), Classified::Dropped(_)));
        assert!(matches!(classifier.classify(&bad), Classified::Dropped(_)));
        // A good message in between resets the count
        assert!(matches!(classifier.classify(&good), Classified::Direct { .. }));
        assert!(matches!(classifier.classify(&bad), Classified::Dropped(_)));
        assert!(matches!(classifier.classify(&bad), Classified::Dropped(_)));
        assert_eq!(classifier.classify(&bad), Classified::Legacy(&bad));
        assert!(!classifier.is_direct());
    }

    #[test]
    fn test_short_buffers_while_latched() {
        let mut classifier = StreamClassifier::new(1);
        let good = direct_message(&json!({"rawFormat": 1, "mediaMessageId": 36}), &[]);
        classifier.classify(&good);

        assert_eq!(classifier.classify(&[1, 2, 3]), Classified::Legacy(&[1, 2, 3]));
        assert!(classifier.is_direct());
    }

    #[test]
    fn test_raw_format_missing_from_hand_built_header() {
        let header = StreamMetadataHeader {
            metadata_len: 0,
            metadata: Map::new(),
        };
        assert_eq!(header.raw_format(), None);
        assert_eq!(header.media_message_id(), None);
    }

    proptest! {
        #[test]
        fn prop_short_buffers_are_legacy(buf in proptest::collection::vec(any::<u8>(), 0..8)) {
            let mut classifier = StreamClassifier::new(3);
            prop_assert_eq!(classifier.classify(&buf), Classified::Legacy(&buf));
        }

        #[test]
        fn prop_metadata_round_trips(
            raw_format in "[a-zA-Z0-9_]{0,40}",
            media_id in any::<u32>(),
            timestamp in proptest::option::of(0u32..u32::MAX),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut metadata = json!({"rawFormat": raw_format, "mediaMessageId": media_id});
            if let Some(ts) = timestamp {
                metadata["timestamp"] = json!(ts);
            }
            let buf = direct_message(&metadata, &payload);

            let mut classifier = StreamClassifier::new(3);
            match classifier.classify(&buf) {
                Classified::Direct { header, payload: body, .. } => {
                    prop_assert_eq!(Value::Object(header.metadata.clone()), metadata);
                    prop_assert_eq!(header.raw_format(), Some(&json!(raw_format)));
                    prop_assert_eq!(header.media_message_id(), Some(media_id as u64));
                    prop_assert_eq!(body, &payload[..]);
                }
                other => prop_assert!(false, "expected direct, got {:?}", other),
            }
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(buf in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut classifier = StreamClassifier::new(3);
            let _ = classifier.classify(&buf);
        }
    }
}
