//! The fixed-size JSON frame codec.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Every frame on the wire is exactly this many bytes.
pub const FRAME_LEN: usize = 1024;

/// Errors surfaced by the codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// The serialized record would not fit in a frame.
    #[error("message of {0} bytes does not fit in a {FRAME_LEN}-byte frame")]
    FrameTooLarge(usize),

    /// The frame was blank, not UTF-8, or not valid JSON. Recoverable: the
    /// caller logs and drops it.
    #[error("frame is blank or does not decode")]
    DataNotPresent,

    /// The record could not be serialized in the first place.
    #[error("failed to serialize message")]
    Serialize(#[from] serde_json::Error),
}

/// Encode a record as UTF-8 JSON right-padded with spaces to [`FRAME_LEN`].
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, WireError> {
    let mut bytes = serde_json::to_vec(message)?;
    if bytes.len() > FRAME_LEN {
        return Err(WireError::FrameTooLarge(bytes.len()));
    }
    bytes.resize(FRAME_LEN, b' ');
    Ok(bytes)
}

/// Decode one padded frame back into a record.
///
/// Blank and malformed frames both map to [`WireError::DataNotPresent`]; a
/// peer that sends garbage costs us one dropped message, never a failure.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, WireError> {
    let text = std::str::from_utf8(frame).map_err(|_| WireError::DataNotPresent)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(WireError::DataNotPresent);
    }
    serde_json::from_str(trimmed).map_err(|e| {
        warn!(error = %e, "dropping undecodable frame");
        WireError::DataNotPresent
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ControllerCommand;

    #[test]
    fn frames_are_exactly_padded() {
        let command =
            ControllerCommand { is_down: true, is_byzantine: false, is_permanent: false };
        let frame = encode_frame(&command).unwrap();
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(frame[FRAME_LEN - 1], b' ');

        let decoded: ControllerCommand = decode_frame(&frame).unwrap();
        assert!(decoded.is_down);
        assert!(!decoded.is_permanent);
    }

    #[test]
    fn blank_frame_is_data_not_present() {
        let blank = vec![b' '; FRAME_LEN];
        let err = decode_frame::<ControllerCommand>(&blank).unwrap_err();
        assert!(matches!(err, WireError::DataNotPresent));
    }

    #[test]
    fn malformed_json_is_data_not_present() {
        let mut frame = b"{\"is_down\": tru".to_vec();
        frame.resize(FRAME_LEN, b' ');
        let err = decode_frame::<ControllerCommand>(&frame).unwrap_err();
        assert!(matches!(err, WireError::DataNotPresent));
    }

    #[test]
    fn oversized_record_is_rejected() {
        let big = vec!["x".repeat(64); 64];
        let err = encode_frame(&big).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(_)));
    }
}
