//! Frame types for the Nexus relay protocol
//!
//! Every frame is a JSON object tagged by a `type` field. Payload field
//! names are camelCase on the wire to match the browser client. Frames are
//! grouped by direction: what a client may send, what an agent may send,
//! and what the hub pushes to each.

use serde::{Deserialize, Serialize};

/// First frame on a freshly opened duplex link, identifying the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hello {
    /// A browser client presenting a bearer token
    Client { token: String },
    /// An agent presenting the shared worker credential
    Agent {
        #[serde(alias = "apiKey")]
        credential: String,
    },
}

/// Frames a client may send after the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Finalise registration; triggers the initial `agent_list` push
    Register,

    /// Create a persistent session owned by the named agent
    CreateSession {
        id: String,
        worker_name: String,
        worker_key: String,
        display_name: String,
    },

    /// Close a session everywhere: store, agent PTY, and every viewer
    CloseSession { session_id: String },

    /// Change a session's display name
    RenameSession {
        session_id: String,
        display_name: String,
    },

    /// Attach to a session's room, declaring a viewport
    JoinSession {
        session_id: String,
        cols: u16,
        rows: u16,
    },

    /// Detach from a session's room
    LeaveSession { session_id: String },

    /// Request the current session list (reply goes to the requester only)
    GetSessionList,

    /// Request a session's output tail for hydration
    GetSessionOutput { session_id: String },

    /// Raw PTY input bytes (keystrokes or pasted text)
    Execute {
        worker_id: String,
        session_id: String,
        command: String,
    },

    /// Report this viewer's viewport for a session
    Resize {
        worker_id: String,
        session_id: String,
        cols: u16,
        rows: u16,
    },
}

impl ClientFrame {
    /// Wire-level name of this frame, for audit records and role errors
    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::Register => "register",
            ClientFrame::CreateSession { .. } => "create_session",
            ClientFrame::CloseSession { .. } => "close_session",
            ClientFrame::RenameSession { .. } => "rename_session",
            ClientFrame::JoinSession { .. } => "join_session",
            ClientFrame::LeaveSession { .. } => "leave_session",
            ClientFrame::GetSessionList => "get_session_list",
            ClientFrame::GetSessionOutput { .. } => "get_session_output",
            ClientFrame::Execute { .. } => "execute",
            ClientFrame::Resize { .. } => "resize",
        }
    }
}

/// Frames an agent may send after the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentFrame {
    /// Announce the agent's display name; completes registration
    Register { name: String },

    /// Liveness beacon, sent every heartbeat interval
    Heartbeat,

    /// Raw PTY output for a session
    Output { session_id: String, output: String },

    /// The session's shell process exited
    SessionShellExited {
        session_id: String,
        exit_code: Option<i32>,
        signal: Option<String>,
    },
}

impl AgentFrame {
    /// Wire-level name of this frame
    pub fn name(&self) -> &'static str {
        match self {
            AgentFrame::Register { .. } => "register",
            AgentFrame::Heartbeat => "heartbeat",
            AgentFrame::Output { .. } => "output",
            AgentFrame::SessionShellExited { .. } => "session_shell_exited",
        }
    }
}

/// Connectivity status of a known agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// One entry of an `agent_list` push
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    /// Last heartbeat, epoch millis
    pub last_seen: u64,
}

/// One entry of a `session_list` push
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub worker_name: String,
    pub worker_key: String,
    pub display_name: String,
    /// Creation time, epoch millis
    pub created_at: u64,
    /// Last input/output activity, epoch millis
    pub last_active_at: u64,
}

/// Frames the hub pushes to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HubToClient {
    /// Current agent catalogue; broadcast to every client on change
    AgentList { agents: Vec<AgentInfo> },

    /// Current session catalogue
    SessionList { sessions: Vec<SessionInfo> },

    /// A session was closed and removed
    SessionClosed { session_id: String },

    /// Live PTY output, fanned out to the session's room
    Output {
        worker_id: String,
        session_id: String,
        data: String,
    },

    /// A session's stored output tail (hydration reply)
    SessionOutput { session_id: String, data: String },

    /// A request-scoped error surfaced to the originating client
    Error { message: String },
}

/// Frames the hub pushes to agents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HubToAgent {
    /// Deliver PTY input for a session
    Execute {
        client_id: String,
        session_id: String,
        command: String,
    },

    /// Apply reconciled PTY dimensions for a session
    Resize {
        client_id: String,
        session_id: String,
        cols: u16,
        rows: u16,
    },

    /// Terminate a session's PTY and never respawn it
    KillSession { session_id: String },

    /// A client went away; drop its viewport records
    ClientDisconnect { client_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode_frame, encode_frame, ProtocolError};

    #[test]
    fn test_hello_client_roundtrip() {
        let json = r#"{"type":"client","token":"abc"}"#;
        let hello: Hello = decode_frame(json).unwrap();
        match hello {
            Hello::Client { token } => assert_eq!(token, "abc"),
            _ => panic!("Expected client hello"),
        }
    }

    #[test]
    fn test_hello_agent_accepts_api_key_alias() {
        let json = r#"{"type":"agent","apiKey":"secret"}"#;
        let hello: Hello = decode_frame(json).unwrap();
        match hello {
            Hello::Agent { credential } => assert_eq!(credential, "secret"),
            _ => panic!("Expected agent hello"),
        }
    }

    #[test]
    fn test_client_frame_camel_case_fields() {
        let json = r#"{"type":"create_session","id":"s-1","workerName":"host1",
                       "workerKey":"worker1","displayName":"tty"}"#;
        let frame: ClientFrame = decode_frame(json).unwrap();
        match frame {
            ClientFrame::CreateSession {
                id,
                worker_name,
                worker_key,
                display_name,
            } => {
                assert_eq!(id, "s-1");
                assert_eq!(worker_name, "host1");
                assert_eq!(worker_key, "worker1");
                assert_eq!(display_name, "tty");
            }
            _ => panic!("Expected create_session"),
        }
    }

    #[test]
    fn test_client_frame_join_session() {
        let json = r#"{"type":"join_session","sessionId":"s-1","cols":80,"rows":24}"#;
        let frame: ClientFrame = decode_frame(json).unwrap();
        match frame {
            ClientFrame::JoinSession {
                session_id,
                cols,
                rows,
            } => {
                assert_eq!(session_id, "s-1");
                assert_eq!(cols, 80);
                assert_eq!(rows, 24);
            }
            _ => panic!("Expected join_session"),
        }
    }

    #[test]
    fn test_unknown_frame_is_explicit_error() {
        let json = r#"{"type":"launch_missiles","target":"moon"}"#;
        let result: Result<ClientFrame, _> = decode_frame(json);
        match result {
            Err(ProtocolError::UnknownFrame(kind)) => assert_eq!(kind, "launch_missiles"),
            other => panic!("Expected UnknownFrame, got {:?}", other.map(|f| f.name())),
        }
    }

    #[test]
    fn test_agent_frame_rejected_as_client_frame() {
        // Role separation: an output frame must not parse as a client frame.
        let json = r#"{"type":"output","sessionId":"s-1","output":"hello"}"#;
        let result: Result<ClientFrame, _> = decode_frame(json);
        assert!(matches!(result, Err(ProtocolError::UnknownFrame(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result: Result<ClientFrame, _> = decode_frame("not json at all");
        assert!(matches!(result, Err(ProtocolError::MalformedJson(_))));
    }

    #[test]
    fn test_hub_to_client_output_encoding() {
        let frame = HubToClient::Output {
            worker_id: "worker1".to_string(),
            session_id: "s-1".to_string(),
            data: "hello\n".to_string(),
        };
        let text = encode_frame(&frame).unwrap();
        assert!(text.contains(r#""type":"output""#));
        assert!(text.contains(r#""workerId":"worker1""#));
        assert!(text.contains(r#""sessionId":"s-1""#));
    }

    #[test]
    fn test_hub_to_agent_kill_session_roundtrip() {
        let frame = HubToAgent::KillSession {
            session_id: "s-9".to_string(),
        };
        let text = encode_frame(&frame).unwrap();
        let decoded: HubToAgent = decode_frame(&text).unwrap();
        match decoded {
            HubToAgent::KillSession { session_id } => assert_eq!(session_id, "s-9"),
            _ => panic!("Expected kill_session"),
        }
    }

    #[test]
    fn test_agent_status_serializes_lowercase() {
        let info = AgentInfo {
            id: "worker1".to_string(),
            name: "Worker1".to_string(),
            status: AgentStatus::Offline,
            last_seen: 123,
        };
        let text = serde_json::to_string(&info).unwrap();
        assert!(text.contains(r#""status":"offline""#));
        assert!(text.contains(r#""lastSeen":123"#));
    }
}
