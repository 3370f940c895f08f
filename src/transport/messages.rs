//! Wire messages for the session protocol.
//!
//! All bodies are JSON mappings discriminated by a `type` field. Decoding is
//! a tagged-union step at the transport boundary: the discriminator is
//! parsed first and unknown types are rejected as protocol errors instead of
//! being duck-typed downstream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SwarmError;

/// Marker value carried by server-originated broadcasts on the session-wide
/// control channel.
///
/// The control topic carries both inbound admin commands and outbound
/// broadcasts of the same shape, and the server is subscribed to its own
/// publish topic. Making provenance explicit lets the inbound decoder drop
/// self-delivered broadcasts instead of re-processing them as commands.
const SERVER_ORIGIN: &str = "server";

/// Participant → server control messages on `session/S/control/P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientControl {
    /// The participant has configured the active question and is ready.
    Ready,
    /// The participant is leaving the session.
    Leave,
}

/// Facilitator/administrator → server commands on `session/S/control`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AdminCommand {
    /// Select the active question for the session.
    Setup {
        /// Collection the question belongs to.
        collection_id: String,
        /// Question inside that collection.
        question_id: String,
    },
    /// Begin the answering countdown.
    Start {
        /// Countdown length in seconds.
        duration: u32,
    },
    /// End the active period.
    Stop {
        /// `""` for a plain stop, `"trajectories"` to also derive
        /// trajectory files from the raw log.
        #[serde(default)]
        mode: String,
    },
}

/// Server → all participants broadcasts on `session/S/control`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Broadcast {
    /// The active question changed; participants must re-establish
    /// readiness.
    Setup {
        /// Newly selected collection.
        collection_id: String,
        /// Newly selected question.
        question_id: String,
    },
    /// The countdown has begun.
    Start {
        /// Countdown length in seconds.
        duration: u32,
    },
    /// Sent once the session is running and a participant (re-)readies:
    /// carries everything needed to catch up mid-session.
    Started {
        /// Target end of the active period, epoch milliseconds.
        #[serde(rename = "targetDate")]
        target_date: i64,
        /// Latest raw sample per participant id, as logged.
        positions: BTreeMap<String, String>,
    },
    /// The active period has ended.
    Stop {
        /// The stop mode the administrator requested.
        #[serde(default)]
        mode: String,
    },
}

impl Broadcast {
    /// Serializes the broadcast, stamping it with the server origin marker.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Protocol`] if serialization fails (not expected for
    /// these shapes).
    pub fn to_payload(&self) -> Result<Vec<u8>, SwarmError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("origin".into(), Value::String(SERVER_ORIGIN.into()));
        }
        Ok(serde_json::to_vec(&value)?)
    }
}

/// The payload of a participant position update on `session/S/updates/P`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateData {
    /// Raw per-answer weight vector as reported by the client.
    pub position: Vec<f64>,
    /// Client wall-clock timestamp, epoch milliseconds.
    #[serde(rename = "timeStamp")]
    pub time_stamp: f64,
}

/// Envelope for position updates: `{"data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// The update payload.
    pub data: UpdateData,
}

/// Decodes a participant control message.
///
/// # Errors
///
/// [`SwarmError::Protocol`] for malformed JSON or an unknown `type`.
pub fn decode_client_control(payload: &[u8]) -> Result<ClientControl, SwarmError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Decodes a position update envelope.
///
/// Updates missing `position` or `timeStamp` fail to decode and are dropped
/// by the caller, matching the ignore-if-absent contract.
///
/// # Errors
///
/// [`SwarmError::Protocol`] for malformed JSON or missing fields.
pub fn decode_update(payload: &[u8]) -> Result<UpdateData, SwarmError> {
    let envelope: ClientUpdate = serde_json::from_slice(payload)?;
    Ok(envelope.data)
}

/// Decodes a session-wide control message into an admin command.
///
/// Returns `Ok(None)` for self-delivered server broadcasts (identified by
/// the origin marker), which must be silently skipped rather than treated as
/// commands.
///
/// # Errors
///
/// [`SwarmError::Protocol`] for malformed JSON or an unknown `type`.
pub fn decode_admin(payload: &[u8]) -> Result<Option<AdminCommand>, SwarmError> {
    let value: Value = serde_json::from_slice(payload)?;
    if value.get("origin").and_then(Value::as_str) == Some(SERVER_ORIGIN) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_control_wire_shape() {
        let ready: ClientControl = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(ready, ClientControl::Ready);
        let leave: ClientControl = serde_json::from_str(r#"{"type":"leave"}"#).unwrap();
        assert_eq!(leave, ClientControl::Leave);
    }

    #[test]
    fn unknown_type_is_a_protocol_error() {
        let err = decode_client_control(br#"{"type":"dance"}"#).unwrap_err();
        assert!(matches!(err, SwarmError::Protocol { .. }));
    }

    #[test]
    fn admin_setup_wire_shape() {
        let cmd = decode_admin(
            br#"{"type":"setup","collection_id":"c1","question_id":"q1"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            cmd,
            AdminCommand::Setup {
                collection_id: "c1".into(),
                question_id: "q1".into()
            }
        );
    }

    #[test]
    fn admin_stop_mode_defaults_to_empty() {
        let cmd = decode_admin(br#"{"type":"stop"}"#).unwrap().unwrap();
        assert_eq!(cmd, AdminCommand::Stop { mode: String::new() });
    }

    #[test]
    fn server_broadcasts_are_skipped_on_decode() {
        let payload = Broadcast::Start { duration: 30 }.to_payload().unwrap();
        assert_eq!(decode_admin(&payload).unwrap(), None);
    }

    #[test]
    fn client_start_without_origin_is_a_command() {
        let cmd = decode_admin(br#"{"type":"start","duration":30}"#)
            .unwrap()
            .unwrap();
        assert_eq!(cmd, AdminCommand::Start { duration: 30 });
    }

    #[test]
    fn started_broadcast_uses_camel_case_target_date() {
        let mut positions = BTreeMap::new();
        positions.insert("2".to_string(), "1000,0.2,0.8".to_string());
        let payload = Broadcast::Started {
            target_date: 1234,
            positions,
        }
        .to_payload()
        .unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["type"], "started");
        assert_eq!(value["targetDate"], 1234);
        assert_eq!(value["origin"], "server");
        assert_eq!(value["positions"]["2"], "1000,0.2,0.8");
    }

    #[test]
    fn update_wire_shape() {
        let data =
            decode_update(br#"{"data":{"position":[0.2,0.3],"timeStamp":1700000000000}}"#)
                .unwrap();
        assert_eq!(data.position, vec![0.2, 0.3]);
        assert_eq!(data.time_stamp, 1_700_000_000_000.0);
    }

    #[test]
    fn update_missing_timestamp_is_rejected() {
        assert!(decode_update(br#"{"data":{"position":[0.2]}}"#).is_err());
    }

    #[test]
    fn update_missing_position_is_rejected() {
        assert!(decode_update(br#"{"data":{"timeStamp":12}}"#).is_err());
    }
}
