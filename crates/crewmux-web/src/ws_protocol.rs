use serde::{Deserialize, Serialize};

use crewmux_protocol::SessionName;

/// Client-to-gateway control messages sent as JSON text frames.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WsClientMessage {
    /// Watch a session's terminal. Replaces any previous subscription this
    /// connection held.
    Subscribe {
        session_name: SessionName,
        #[serde(default)]
        last_seq: Option<u64>,
    },
    Unsubscribe {
        session_name: SessionName,
    },
    /// Keystrokes for the watched session, base64-encoded.
    Input {
        session_name: SessionName,
        data: String,
    },
}

/// Gateway-to-client control messages sent as JSON text frames.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    /// Subscription is live; `initial_terminal_state` is the rendered screen
    /// at the moment of joining, deltas follow as binary frames.
    Subscribed {
        session_name: SessionName,
        catchup_count: usize,
        initial_terminal_state: String,
    },
    /// The session exists but its agent is still starting; the gateway will
    /// retry after `retry_ms`.
    Pending {
        session_name: SessionName,
        retry_ms: u64,
    },
    Unsubscribed {
        session_name: SessionName,
    },
    /// Terminal state for a subscribe naming a session the daemon does not
    /// know. Transport and daemon failures use `Error` instead.
    SessionNotFound {
        session_name: SessionName,
    },
    Error {
        message: String,
        session_name: Option<SessionName>,
    },
    /// A daemon event (session exit, task assignment and so on).
    Event(crewmux_protocol::Event),
}

/// Binary output frame header.
/// Binary WebSocket frames are structured as:
///   [name_len: u8][session_name: bytes][pty_data: bytes]
/// so a client can demux output if it re-subscribes across sessions.
pub fn encode_binary_frame(session_name: &str, data: &[u8]) -> Vec<u8> {
    let name_bytes = session_name.as_bytes();
    let name_len = name_bytes.len().min(255) as u8;
    let mut frame = Vec::with_capacity(1 + name_len as usize + data.len());
    frame.push(name_len);
    frame.extend_from_slice(&name_bytes[..name_len as usize]);
    frame.extend_from_slice(data);
    frame
}

/// Decode a binary frame into (session_name, data).
pub fn decode_binary_frame(frame: &[u8]) -> Option<(&str, &[u8])> {
    if frame.is_empty() {
        return None;
    }
    let name_len = frame[0] as usize;
    if frame.len() < 1 + name_len {
        return None;
    }
    let session_name = std::str::from_utf8(&frame[1..1 + name_len]).ok()?;
    let data = &frame[1 + name_len..];
    Some((session_name, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frame_roundtrip() {
        let frame = encode_binary_frame("dev-1", b"ls -la\r\n");
        let (name, data) = decode_binary_frame(&frame).unwrap();
        assert_eq!(name, "dev-1");
        assert_eq!(data, b"ls -la\r\n");
    }

    #[test]
    fn binary_frame_empty_data() {
        let frame = encode_binary_frame("pm", &[]);
        let (name, data) = decode_binary_frame(&frame).unwrap();
        assert_eq!(name, "pm");
        assert!(data.is_empty());
    }

    #[test]
    fn decode_rejects_truncated_frames() {
        assert!(decode_binary_frame(&[]).is_none());
        assert!(decode_binary_frame(&[10, b'a', b'b']).is_none());
    }

    #[test]
    fn unknown_session_gets_its_own_event_type() {
        let msg = WsServerMessage::SessionNotFound {
            session_name: "ghost".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"session_not_found""#));
        assert!(json.contains(r#""session_name":"ghost""#));
    }

    #[test]
    fn subscribe_message_roundtrip() {
        let msg = WsClientMessage::Subscribe {
            session_name: "dev-1".to_string(),
            last_seq: Some(42),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""action":"subscribe""#));
        let parsed: WsClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            WsClientMessage::Subscribe {
                session_name,
                last_seq,
            } => {
                assert_eq!(session_name, "dev-1");
                assert_eq!(last_seq, Some(42));
            }
            _ => panic!("wrong variant"),
        }
    }
}
