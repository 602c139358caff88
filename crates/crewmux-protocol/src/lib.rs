pub mod paths;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable name identifying one agent session. Survives supervisor restarts.
pub type SessionName = String;

/// Role an agent plays inside a crew.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    ProjectManager,
    Developer,
    Qa,
    Devops,
    Generalist,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::ProjectManager => "project_manager",
            AgentRole::Developer => "developer",
            AgentRole::Qa => "qa",
            AgentRole::Devops => "devops",
            AgentRole::Generalist => "generalist",
        }
    }
}

/// Coarse session status, derived from process liveness plus a readiness probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Inactive,
    Activating,
    Active,
}

/// Last self-reported working state of an agent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkingStatus {
    Idle,
    InProgress,
}

/// How the agent program handles pasted input. Cautious runtimes get much
/// smaller input chunks to stay under their bulk-paste detection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    Standard,
    CautiousPaste,
}

/// Lifecycle state of a tracked task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    PendingAssignment,
    Assigned,
    Active,
    Blocked,
    Completed,
}

/// Unit for a schedule's delay interval.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Seconds,
    Minutes,
    Hours,
}

impl DelayUnit {
    pub fn to_duration(self, amount: u64) -> std::time::Duration {
        let secs = match self {
            DelayUnit::Seconds => amount,
            DelayUnit::Minutes => amount.saturating_mul(60),
            DelayUnit::Hours => amount.saturating_mul(3600),
        };
        std::time::Duration::from_secs(secs)
    }
}

/// Structured outcome for session control operations. Not-found and
/// process-unreachable come back as `success: false`, never as a panic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a health check against one session.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthReport {
    pub session_name: SessionName,
    pub running: bool,
    pub status: AgentStatus,
    pub working_status: WorkingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_epoch_ms: Option<u64>,
}

/// Summary info for session listings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionInfo {
    pub session_name: SessionName,
    pub role: AgentRole,
    pub runtime: RuntimeKind,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_label: Option<String>,
    pub working_status: WorkingStatus,
    pub created_at_epoch_ms: u64,
    pub exited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// One task under supervision, persisted in the tracker record.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackedTask {
    pub id: String,
    pub project_id: String,
    pub task_file_path: PathBuf,
    pub task_name: String,
    pub target_role: AgentRole,
    pub assigned_session: SessionName,
    pub assigned_at_epoch_ms: u64,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

/// A timer-driven prompt injection, persisted in the schedule record.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScheduledMessage {
    pub id: String,
    pub name: String,
    pub target_session: SessionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_project: Option<String>,
    pub message: String,
    pub delay_amount: u64,
    pub delay_unit: DelayUnit,
    pub is_recurring: bool,
    pub is_active: bool,
}

/// A running (or historical) project and the schedules it owns.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActiveProject {
    pub project_id: String,
    pub pm_session: SessionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_schedule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_schedule_id: Option<String>,
    pub started_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at_epoch_ms: Option<u64>,
}

impl ActiveProject {
    pub fn is_running(&self) -> bool {
        self.stopped_at_epoch_ms.is_none()
    }
}

/// Client-to-daemon requests, sent as JSON lines over the unix socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    // Session registry
    CreateSession {
        session_name: SessionName,
        role: AgentRole,
        exec: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        window_label: Option<String>,
        #[serde(default)]
        runtime: RuntimeKind,
    },
    CheckHealth {
        session_name: SessionName,
        #[serde(default)]
        probe_timeout_ms: Option<u64>,
    },
    TerminateSession {
        session_name: SessionName,
    },
    SendMessage {
        session_name: SessionName,
        text: String,
    },
    SendKey {
        session_name: SessionName,
        key: String,
    },
    /// Raw bytes written to the session's input as-is, without chunking or a
    /// trailing carriage return. Used by the streaming gateway.
    SendInput {
        session_name: SessionName,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    SessionList,
    ScreenContents {
        session_name: SessionName,
    },
    ReportStatus {
        session_name: SessionName,
        working_status: WorkingStatus,
    },

    // Task lifecycle
    AssignTask {
        project_id: String,
        project_dir: PathBuf,
        milestone: String,
        file_name: String,
        task_name: String,
        target_role: AgentRole,
        session_name: SessionName,
    },
    UpdateTaskStatus {
        task_id: String,
        status: TaskStatus,
        #[serde(default)]
        block_reason: Option<String>,
    },
    ListTasks,
    RunRecovery,

    // Scheduled messages
    ScheduleMessage {
        name: String,
        target_session: SessionName,
        #[serde(default)]
        target_project: Option<String>,
        message: String,
        delay_amount: u64,
        delay_unit: DelayUnit,
        #[serde(default)]
        is_recurring: bool,
    },
    CancelSchedule {
        id: String,
    },
    ListSchedules,
    StartProject {
        project_id: String,
        pm_session: SessionName,
    },
    StopProject {
        project_id: String,
    },

    // Streaming
    Subscribe {
        session_name: SessionName,
        #[serde(default)]
        last_seq: Option<u64>,
    },
    Unsubscribe {
        session_name: SessionName,
    },
}

/// Daemon-to-client responses.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
        code: ErrorCode,
    },
    Event(Event),
}

impl Response {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Response::Ok { data }
    }
}

/// Events streamed to subscribers.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Output {
        session_name: SessionName,
        seq: u64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    SessionCreated {
        session_name: SessionName,
        role: AgentRole,
    },
    SessionExited {
        session_name: SessionName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    TaskAssigned {
        task_id: String,
        session_name: SessionName,
    },
    TaskCompleted {
        task_id: String,
    },
    TaskRecovered {
        task_id: String,
        session_name: SessionName,
    },
}

/// Error codes for structured failure handling.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    TaskNotFound,
    Conflict,
    Timeout,
    InvalidRequest,
    ServerError,
}

/// Base64 encoding for byte arrays in JSON.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tag_format() {
        let req = Request::SessionList;
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"cmd":"session_list"}"#);
    }

    #[test]
    fn create_session_defaults() {
        let json = r#"{"cmd":"create_session","session_name":"dev-1","role":"developer","exec":"agent"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match req {
            Request::CreateSession {
                session_name,
                runtime,
                cwd,
                args,
                ..
            } => {
                assert_eq!(session_name, "dev-1");
                assert_eq!(runtime, RuntimeKind::Standard);
                assert!(cwd.is_none());
                assert!(args.is_empty());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn output_event_uses_base64() {
        let event = Event::Output {
            session_name: "dev-1".to_string(),
            seq: 7,
            data: b"ls -la\n".to_vec(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("ls -la"));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        match parsed {
            Event::Output { seq, data, .. } => {
                assert_eq!(seq, 7);
                assert_eq!(data, b"ls -la\n");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn response_error_roundtrip() {
        let resp = Response::Error {
            message: "session not found: dev-9".to_string(),
            code: ErrorCode::SessionNotFound,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("session_not_found"));
        let parsed: Response = serde_json::from_str(&json).unwrap();
        match parsed {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::SessionNotFound),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn delay_unit_durations() {
        assert_eq!(
            DelayUnit::Seconds.to_duration(30),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            DelayUnit::Minutes.to_duration(15),
            std::time::Duration::from_secs(900)
        );
        assert_eq!(
            DelayUnit::Hours.to_duration(2),
            std::time::Duration::from_secs(7200)
        );
    }

    #[test]
    fn action_result_shapes() {
        let ok = ActionResult::ok("created");
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = ActionResult::failure("session not found");
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("session not found"));
    }

    #[test]
    fn active_project_running_flag() {
        let mut project = ActiveProject {
            project_id: "p1".to_string(),
            pm_session: "pm-1".to_string(),
            check_in_schedule_id: Some("s1".to_string()),
            commit_schedule_id: Some("s2".to_string()),
            started_at_epoch_ms: 1_700_000_000_000,
            stopped_at_epoch_ms: None,
        };
        assert!(project.is_running());
        project.stopped_at_epoch_ms = Some(1_700_000_100_000);
        assert!(!project.is_running());
    }

    #[test]
    fn tracked_task_roundtrip() {
        let task = TrackedTask {
            id: "t-1".to_string(),
            project_id: "p1".to_string(),
            task_file_path: PathBuf::from("/work/p1/m1/in_progress/fix-login.md"),
            task_name: "fix-login".to_string(),
            target_role: AgentRole::Developer,
            assigned_session: "dev-1".to_string(),
            assigned_at_epoch_ms: 1_700_000_000_000,
            status: TaskStatus::Assigned,
            block_reason: None,
        };
        let json = serde_json::to_string(&task).unwrap();
        let parsed: TrackedTask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, TaskStatus::Assigned);
        assert_eq!(parsed.target_role, AgentRole::Developer);
    }
}
