//! Versioned binary envelope for checkpoint payloads.
//!
//! The envelope is bincode: a schema version followed by a JSON body. JSON
//! inside keeps the state patchable and inspectable by the same serde
//! machinery the rest of the engine uses; the version field allows
//! forward-compatible migrations of the body shape.

use crate::error::{CheckpointError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Current payload schema version.
pub const PAYLOAD_SCHEMA_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    schema_version: u16,
    body: Vec<u8>,
}

/// Encode a payload body into the versioned envelope.
pub fn encode_payload<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        schema_version: PAYLOAD_SCHEMA_VERSION,
        body: serde_json::to_vec(body)?,
    };
    Ok(bincode::serialize(&envelope)?)
}

/// Decode a payload envelope, rejecting versions newer than this engine.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: Envelope = bincode::deserialize(bytes)?;
    if envelope.schema_version > PAYLOAD_SCHEMA_VERSION {
        return Err(CheckpointError::UnsupportedVersion(envelope.schema_version));
    }
    Ok(serde_json::from_slice(&envelope.body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Body {
        state: serde_json::Value,
        resumes: Vec<serde_json::Value>,
    }

    #[test]
    fn round_trip() {
        let body = Body {
            state: serde_json::json!({"plan": {"goal": "fix"}, "batch_index": 1}),
            resumes: vec![serde_json::json!({"approved": true})],
        };
        let bytes = encode_payload(&body).unwrap();
        let back: Body = decode_payload(&bytes).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn rejects_future_version() {
        let envelope = Envelope {
            schema_version: PAYLOAD_SCHEMA_VERSION + 1,
            body: b"{}".to_vec(),
        };
        let bytes = bincode::serialize(&envelope).unwrap();
        let err = decode_payload::<serde_json::Value>(&bytes).unwrap_err();
        assert!(matches!(err, CheckpointError::UnsupportedVersion(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_payload::<serde_json::Value>(&[0xde, 0xad]).is_err());
    }
}
