use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crewmux_protocol::{
    ActionResult, AgentRole, AgentStatus, Event, HealthReport, RuntimeKind, SessionInfo,
    SessionName, WorkingStatus,
};

use crate::broker::EventBroker;
use crate::error::CrewmuxError;
use crate::input::{chunk_limit, chunk_text, key_bytes};
use crate::output::{LiveBuffer, OutputChunk};
use crate::probe::ProbeRegistry;
use crate::screen::ScreenBuffer;

const DEFAULT_BUFFER_CHUNKS: usize = 10_000;

/// Configuration for creating a new agent session.
pub struct CreateSessionConfig {
    pub session_name: SessionName,
    pub role: AgentRole,
    pub exec: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub window_label: Option<String>,
    pub runtime: RuntimeKind,
    pub cols: u16,
    pub rows: u16,
}

impl CreateSessionConfig {
    pub fn new(session_name: impl Into<String>, role: AgentRole, exec: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            role,
            exec: exec.into(),
            args: Vec::new(),
            cwd: None,
            window_label: None,
            runtime: RuntimeKind::Standard,
            cols: 120,
            rows: 40,
        }
    }
}

/// Registry-wide tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Retained output chunks per session.
    pub buffer_chunks: usize,
    /// Poll interval while waiting for a readiness probe to match.
    pub probe_poll: Duration,
    /// Probe window used when a health check does not specify one.
    pub default_probe_timeout: Duration,
    /// How long to wait after the graceful shutdown signal before killing.
    pub termination_grace: Duration,
    /// Pause between chunk writes to one session.
    pub inter_chunk_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: DEFAULT_BUFFER_CHUNKS,
            probe_poll: Duration::from_millis(100),
            default_probe_timeout: Duration::from_secs(1),
            termination_grace: Duration::from_secs(5),
            inter_chunk_delay: Duration::from_millis(crate::input::INTER_CHUNK_DELAY_MS),
        }
    }
}

/// Instantaneous liveness view of one agent, as used by the recovery pass.
#[derive(Debug, Clone)]
pub struct AgentLiveness {
    pub status: AgentStatus,
    pub working_status: WorkingStatus,
    pub last_report: SystemTime,
}

/// Delivery and liveness seam consumed by the task and schedule engines.
/// Implemented by `SessionRegistry`; tests substitute fakes.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn agent_liveness(&self, session_name: &str) -> Option<AgentLiveness>;
    async fn send_message(&self, session_name: &str, text: &str) -> ActionResult;
}

enum InputCommand {
    /// Message text: chunked, paced, and terminated with a carriage return.
    Text(String),
    /// Raw bytes written as-is (named keys, shutdown signals).
    Raw(Vec<u8>),
}

struct SessionEntry {
    role: AgentRole,
    runtime: RuntimeKind,
    cwd: PathBuf,
    window_label: Option<String>,
    created_at: SystemTime,
    live: LiveBuffer,
    screen: ScreenBuffer,
    exited: bool,
    exit_code: Option<i32>,
    last_activity: SystemTime,
    working_status: WorkingStatus,
    last_report: SystemTime,
    input_tx: mpsc::Sender<InputCommand>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    // Keeps the PTY open; dropping the master would hang up the session.
    _master: Box<dyn MasterPty + Send>,
}

impl SessionEntry {
    fn to_info(&self, session_name: &str) -> SessionInfo {
        SessionInfo {
            session_name: session_name.to_string(),
            role: self.role,
            runtime: self.runtime,
            cwd: self.cwd.clone(),
            window_label: self.window_label.clone(),
            working_status: self.working_status,
            created_at_epoch_ms: epoch_ms(self.created_at),
            exited: self.exited,
            exit_code: self.exit_code,
        }
    }
}

/// Owns the mapping from agent identity to live PTY session.
///
/// All methods take `&self`; locking is internal and never held across PTY
/// I/O. Each session has a single input writer task, so two callers can never
/// interleave keystrokes within one session, while writes to different
/// sessions proceed in parallel.
pub struct SessionRegistry {
    config: RegistryConfig,
    sessions: RwLock<HashMap<SessionName, Arc<Mutex<SessionEntry>>>>,
    broker: EventBroker,
    probes: RwLock<ProbeRegistry>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            broker: EventBroker::new(),
            probes: RwLock::new(ProbeRegistry::new()),
        })
    }

    pub async fn register_probe(
        &self,
        role: AgentRole,
        probe: Arc<dyn crate::probe::ReadinessProbe>,
    ) {
        self.probes.write().await.register(role, probe);
    }

    /// Create a session, spawning the agent program in a fresh PTY.
    ///
    /// Idempotent: if a live session with this name already exists, reports
    /// success without spawning a second process. A dead entry under the same
    /// name is replaced. OS-level spawn failure is an error for this call.
    pub async fn create_session(
        self: &Arc<Self>,
        config: CreateSessionConfig,
    ) -> Result<ActionResult, CrewmuxError> {
        let name = config.session_name.clone();

        if let Some(entry) = self.entry(&name).await {
            if !entry.lock().await.exited {
                debug!(session = %name, "create requested for existing live session");
                return Ok(ActionResult::ok(format!("session {name} already exists")));
            }
            self.remove_entry(&name).await;
        }

        let cwd = config
            .cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")));

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CrewmuxError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.exec);
        cmd.args(&config.args);
        cmd.cwd(&cwd);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CrewmuxError::Pty(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CrewmuxError::Pty(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CrewmuxError::Pty(e.to_string()))?;
        let killer = child.clone_killer();

        self.broker.register(&name).await;

        let (input_tx, input_rx) = mpsc::channel::<InputCommand>(64);
        spawn_input_writer(
            name.clone(),
            writer,
            input_rx,
            chunk_limit(config.runtime),
            self.config.inter_chunk_delay,
        );

        let now = SystemTime::now();
        let entry = SessionEntry {
            role: config.role,
            runtime: config.runtime,
            cwd,
            window_label: config.window_label,
            created_at: now,
            live: LiveBuffer::new(self.config.buffer_chunks),
            screen: ScreenBuffer::new(config.cols, config.rows),
            exited: false,
            exit_code: None,
            last_activity: now,
            working_status: WorkingStatus::Idle,
            last_report: now,
            input_tx,
            killer,
            _master: pair.master,
        };

        self.sessions
            .write()
            .await
            .insert(name.clone(), Arc::new(Mutex::new(entry)));

        // Blocking PTY reads feed an async recorder which owns exit capture.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::task::spawn_blocking(move || pty_read_loop(reader, out_tx));

        let registry = Arc::clone(self);
        let session = name.clone();
        tokio::spawn(async move {
            while let Some(bytes) = out_rx.recv().await {
                registry.record_output(&session, bytes).await;
            }
            let status = tokio::task::spawn_blocking(move || child.wait()).await;
            let code = match status {
                Ok(Ok(st)) => Some(st.exit_code() as i32),
                _ => None,
            };
            registry.record_exit(&session, code).await;
        });

        info!(session = %name, role = config.role.as_str(), "session created");
        self.broker
            .broadcast(
                &name,
                Event::SessionCreated {
                    session_name: name.clone(),
                    role: config.role,
                },
            )
            .await;

        Ok(ActionResult::ok(format!("session {name} created")))
    }

    /// Health check: `running` reflects process liveness; `active` requires
    /// the role's readiness probe to match within the probe window.
    pub async fn check_health(
        &self,
        session_name: &str,
        probe_timeout: Option<Duration>,
    ) -> HealthReport {
        let timeout = probe_timeout.unwrap_or(self.config.default_probe_timeout);
        let deadline = Instant::now() + timeout;

        loop {
            let Some(entry) = self.entry(session_name).await else {
                return HealthReport {
                    session_name: session_name.to_string(),
                    running: false,
                    status: AgentStatus::Inactive,
                    working_status: WorkingStatus::Idle,
                    last_activity_epoch_ms: None,
                };
            };

            let (exited, role, working, last_activity, snapshot) = {
                let entry = entry.lock().await;
                (
                    entry.exited,
                    entry.role,
                    entry.working_status,
                    entry.last_activity,
                    entry.screen.snapshot(),
                )
            };

            if exited {
                return HealthReport {
                    session_name: session_name.to_string(),
                    running: false,
                    status: AgentStatus::Inactive,
                    working_status: working,
                    last_activity_epoch_ms: Some(epoch_ms(last_activity)),
                };
            }

            let probe = self.probes.read().await.probe_for(role);
            if probe.is_ready(&snapshot) {
                return HealthReport {
                    session_name: session_name.to_string(),
                    running: true,
                    status: AgentStatus::Active,
                    working_status: working,
                    last_activity_epoch_ms: Some(epoch_ms(last_activity)),
                };
            }

            if Instant::now() >= deadline {
                return HealthReport {
                    session_name: session_name.to_string(),
                    running: true,
                    status: AgentStatus::Activating,
                    working_status: working,
                    last_activity_epoch_ms: Some(epoch_ms(last_activity)),
                };
            }

            tokio::time::sleep(self.config.probe_poll).await;
        }
    }

    /// Terminate a session: interrupt and EOF first, then a grace window,
    /// then a forced kill. Never an immediate hard kill.
    pub async fn terminate_session(&self, session_name: &str) -> ActionResult {
        let Some(entry) = self.entry(session_name).await else {
            return ActionResult::failure(format!("session not found: {session_name}"));
        };

        {
            let entry = entry.lock().await;
            let _ = entry.input_tx.send(InputCommand::Raw(vec![0x03])).await;
            let _ = entry.input_tx.send(InputCommand::Raw(vec![0x04])).await;
        }

        let deadline = Instant::now() + self.config.termination_grace;
        let mut exited = false;
        while Instant::now() < deadline {
            if entry.lock().await.exited {
                exited = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if !exited {
            let mut entry = entry.lock().await;
            if let Err(err) = entry.killer.kill() {
                warn!(session = %session_name, error = %err, "forced kill failed");
            }
        }

        self.remove_entry(session_name).await;
        info!(session = %session_name, graceful = exited, "session terminated");
        ActionResult::ok(format!("session {session_name} terminated"))
    }

    /// Queue message text for delivery. The per-session writer task splits it
    /// into paste-safe chunks and finishes with a carriage return.
    pub async fn send_message_to_agent(&self, session_name: &str, text: &str) -> ActionResult {
        let Some(tx) = self.live_input_tx(session_name).await else {
            return ActionResult::failure(format!("session not found: {session_name}"));
        };
        match tx.send(InputCommand::Text(text.to_string())).await {
            Ok(()) => ActionResult::ok(format!("message queued for {session_name}")),
            Err(_) => ActionResult::failure(format!("input channel closed for {session_name}")),
        }
    }

    /// Queue a single named keystroke.
    pub async fn send_key_to_agent(&self, session_name: &str, key: &str) -> ActionResult {
        let Some(bytes) = key_bytes(key) else {
            return ActionResult::failure(format!("unknown key: {key}"));
        };
        let Some(tx) = self.live_input_tx(session_name).await else {
            return ActionResult::failure(format!("session not found: {session_name}"));
        };
        match tx.send(InputCommand::Raw(bytes.to_vec())).await {
            Ok(()) => ActionResult::ok(format!("key {key} queued for {session_name}")),
            Err(_) => ActionResult::failure(format!("input channel closed for {session_name}")),
        }
    }

    /// Queue raw bytes, bypassing chunking and the trailing carriage return.
    pub async fn send_raw_to_agent(&self, session_name: &str, data: Vec<u8>) -> ActionResult {
        let Some(tx) = self.live_input_tx(session_name).await else {
            return ActionResult::failure(format!("session not found: {session_name}"));
        };
        match tx.send(InputCommand::Raw(data)).await {
            Ok(()) => ActionResult::ok(format!("input queued for {session_name}")),
            Err(_) => ActionResult::failure(format!("input channel closed for {session_name}")),
        }
    }

    /// Record an agent's self-reported working state.
    pub async fn report_working_status(
        &self,
        session_name: &str,
        status: WorkingStatus,
    ) -> ActionResult {
        let Some(entry) = self.entry(session_name).await else {
            return ActionResult::failure(format!("session not found: {session_name}"));
        };
        let mut entry = entry.lock().await;
        entry.working_status = status;
        entry.last_report = SystemTime::now();
        ActionResult::ok(format!("status recorded for {session_name}"))
    }

    /// Catch-up chunks plus a live event receiver for one session.
    ///
    /// The receiver is registered before the catch-up snapshot is read, so a
    /// chunk recorded in between lands in both; it can never land in neither.
    /// Consumers drop the overlap by `seq`.
    pub async fn subscribe(
        &self,
        session_name: &str,
        last_seq: Option<u64>,
    ) -> Result<(Vec<OutputChunk>, broadcast::Receiver<Event>), CrewmuxError> {
        let entry = self
            .entry(session_name)
            .await
            .ok_or_else(|| CrewmuxError::SessionNotFound(session_name.to_string()))?;
        let rx = self.broker.subscribe(session_name).await?;
        let catchup = entry.lock().await.live.replay_from(last_seq);
        Ok((catchup, rx))
    }

    /// Rendered screen contents for a late joiner's initial state.
    pub async fn screen_contents(&self, session_name: &str) -> Result<String, CrewmuxError> {
        let entry = self
            .entry(session_name)
            .await
            .ok_or_else(|| CrewmuxError::SessionNotFound(session_name.to_string()))?;
        let snapshot = entry.lock().await.screen.snapshot();
        Ok(snapshot.render())
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos = Vec::with_capacity(sessions.len());
        for (name, entry) in sessions.iter() {
            infos.push(entry.lock().await.to_info(name));
        }
        infos.sort_by(|a, b| a.session_name.cmp(&b.session_name));
        infos
    }

    pub async fn session_exists(&self, session_name: &str) -> bool {
        self.sessions.read().await.contains_key(session_name)
    }

    async fn record_output(&self, session_name: &str, data: Vec<u8>) {
        let Some(entry) = self.entry(session_name).await else {
            return;
        };
        let chunk = {
            let mut entry = entry.lock().await;
            entry.screen.feed(&data);
            entry.last_activity = SystemTime::now();
            entry.live.push(data)
        };
        self.broker
            .broadcast(
                session_name,
                Event::Output {
                    session_name: session_name.to_string(),
                    seq: chunk.seq,
                    data: chunk.data,
                },
            )
            .await;
    }

    async fn record_exit(&self, session_name: &str, exit_code: Option<i32>) {
        let Some(entry) = self.entry(session_name).await else {
            return;
        };
        {
            let mut entry = entry.lock().await;
            entry.exited = true;
            entry.exit_code = exit_code;
        }
        info!(session = %session_name, exit_code = ?exit_code, "session exited");
        self.broker
            .broadcast(
                session_name,
                Event::SessionExited {
                    session_name: session_name.to_string(),
                    exit_code,
                },
            )
            .await;
    }

    async fn entry(&self, session_name: &str) -> Option<Arc<Mutex<SessionEntry>>> {
        self.sessions.read().await.get(session_name).cloned()
    }

    async fn remove_entry(&self, session_name: &str) {
        self.sessions.write().await.remove(session_name);
        self.broker.remove(session_name).await;
    }

    async fn live_input_tx(&self, session_name: &str) -> Option<mpsc::Sender<InputCommand>> {
        let entry = self.entry(session_name).await?;
        let entry = entry.lock().await;
        if entry.exited {
            return None;
        }
        Some(entry.input_tx.clone())
    }
}

#[async_trait]
impl SessionDirectory for SessionRegistry {
    async fn agent_liveness(&self, session_name: &str) -> Option<AgentLiveness> {
        let entry = self.entry(session_name).await?;
        let (exited, role, working, last_report, snapshot) = {
            let entry = entry.lock().await;
            (
                entry.exited,
                entry.role,
                entry.working_status,
                entry.last_report,
                entry.screen.snapshot(),
            )
        };

        let status = if exited {
            AgentStatus::Inactive
        } else if self.probes.read().await.probe_for(role).is_ready(&snapshot) {
            AgentStatus::Active
        } else {
            AgentStatus::Activating
        };

        Some(AgentLiveness {
            status,
            working_status: working,
            last_report,
        })
    }

    async fn send_message(&self, session_name: &str, text: &str) -> ActionResult {
        self.send_message_to_agent(session_name, text).await
    }
}

/// Per-session writer: the only code path that touches this PTY's input.
fn spawn_input_writer(
    session_name: SessionName,
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::Receiver<InputCommand>,
    limit: usize,
    delay: Duration,
) {
    tokio::task::spawn_blocking(move || {
        while let Some(cmd) = rx.blocking_recv() {
            let result = match cmd {
                InputCommand::Text(text) => write_message(&mut writer, &text, limit, delay),
                InputCommand::Raw(bytes) => writer.write_all(&bytes).and_then(|_| writer.flush()),
            };
            if let Err(err) = result {
                warn!(session = %session_name, error = %err, "pty write failed");
                break;
            }
        }
    });
}

fn write_message(
    writer: &mut Box<dyn Write + Send>,
    text: &str,
    limit: usize,
    delay: Duration,
) -> std::io::Result<()> {
    for chunk in chunk_text(text, limit) {
        writer.write_all(chunk.as_bytes())?;
        writer.flush()?;
        std::thread::sleep(delay);
    }
    writer.write_all(b"\r")?;
    writer.flush()
}

fn pty_read_loop(mut reader: Box<dyn std::io::Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = %err, "pty read ended");
                break;
            }
        }
    }
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_registry() -> Arc<SessionRegistry> {
        SessionRegistry::new(RegistryConfig {
            termination_grace: Duration::from_millis(300),
            default_probe_timeout: Duration::from_millis(200),
            probe_poll: Duration::from_millis(20),
            inter_chunk_delay: Duration::from_millis(1),
            ..RegistryConfig::default()
        })
    }

    fn cat_config(name: &str) -> CreateSessionConfig {
        // cat with no arguments stays alive until the PTY closes.
        CreateSessionConfig::new(name, AgentRole::Developer, "cat")
    }

    #[tokio::test]
    async fn create_is_idempotent_for_live_sessions() {
        let registry = quick_registry();

        let first = registry
            .create_session(cat_config("dev-1"))
            .await
            .expect("create");
        assert!(first.success);

        let second = registry
            .create_session(cat_config("dev-1"))
            .await
            .expect("second create");
        assert!(second.success);
        assert!(second
            .message
            .as_deref()
            .expect("message")
            .contains("already exists"));

        assert_eq!(registry.list_sessions().await.len(), 1);
        registry.terminate_session("dev-1").await;
    }

    #[tokio::test]
    async fn health_of_unknown_session_is_inactive() {
        let registry = quick_registry();
        let report = registry
            .check_health("nobody", Some(Duration::from_millis(10)))
            .await;
        assert!(!report.running);
        assert_eq!(report.status, AgentStatus::Inactive);
    }

    #[tokio::test]
    async fn running_session_without_banner_is_activating() {
        let registry = quick_registry();
        registry
            .create_session(cat_config("dev-2"))
            .await
            .expect("create");

        let report = registry
            .check_health("dev-2", Some(Duration::from_millis(100)))
            .await;
        assert!(report.running);
        assert_eq!(report.status, AgentStatus::Activating);

        registry.terminate_session("dev-2").await;
    }

    #[tokio::test]
    async fn banner_echo_drives_session_active() {
        let registry = quick_registry();
        registry
            .create_session(cat_config("dev-3"))
            .await
            .expect("create");

        // cat echoes its input back through the PTY, which lands on the
        // screen buffer and satisfies the default banner probe.
        registry.send_message_to_agent("dev-3", "? for shortcuts").await;

        let report = registry.check_health("dev-3", Some(Duration::from_secs(3))).await;
        assert!(report.running);
        assert_eq!(report.status, AgentStatus::Active);

        registry.terminate_session("dev-3").await;
    }

    #[tokio::test]
    async fn messages_to_unknown_sessions_fail_structurally() {
        let registry = quick_registry();
        let result = registry.send_message_to_agent("ghost", "hello").await;
        assert!(!result.success);
        assert!(result.error.expect("error").contains("not found"));

        let result = registry.send_key_to_agent("ghost", "enter").await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let registry = quick_registry();
        registry
            .create_session(cat_config("dev-4"))
            .await
            .expect("create");
        let result = registry.send_key_to_agent("dev-4", "warp").await;
        assert!(!result.success);
        registry.terminate_session("dev-4").await;
    }

    #[tokio::test]
    async fn terminate_then_recreate_under_same_name() {
        let registry = quick_registry();
        registry
            .create_session(cat_config("dev-5"))
            .await
            .expect("create");
        let result = registry.terminate_session("dev-5").await;
        assert!(result.success);
        assert!(!registry.session_exists("dev-5").await);

        let again = registry
            .create_session(cat_config("dev-5"))
            .await
            .expect("recreate");
        assert!(again.success);
        assert!(!again.message.expect("message").contains("already exists"));
        registry.terminate_session("dev-5").await;
    }

    #[tokio::test]
    async fn rejoining_subscriber_sees_the_next_seq_with_no_gap() {
        let registry = quick_registry();
        registry
            .create_session(cat_config("dev-7"))
            .await
            .expect("create");
        registry.send_message_to_agent("dev-7", "alpha").await;

        // Wait for the echo to be recorded.
        let newest = loop {
            let (catchup, _) = registry.subscribe("dev-7", None).await.expect("subscribe");
            if let Some(chunk) = catchup.last() {
                break chunk.seq;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        // Rejoin from the newest seen seq, then produce more output. The
        // receiver may replay chunks at or below the catch-up horizon; the
        // first chunk past it must be exactly the next seq.
        let (_, mut rx) = registry
            .subscribe("dev-7", Some(newest))
            .await
            .expect("resubscribe");
        registry.send_message_to_agent("dev-7", "bravo").await;

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut first_live = None;
        while Instant::now() < deadline {
            let Ok(Ok(event)) =
                tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
            else {
                continue;
            };
            if let Event::Output { seq, .. } = event {
                if seq > newest {
                    first_live = Some(seq);
                    break;
                }
            }
        }
        assert_eq!(first_live, Some(newest + 1));
        registry.terminate_session("dev-7").await;
    }

    #[tokio::test]
    async fn working_status_reports_feed_liveness() {
        let registry = quick_registry();
        registry
            .create_session(cat_config("dev-6"))
            .await
            .expect("create");

        registry
            .report_working_status("dev-6", WorkingStatus::InProgress)
            .await;
        let liveness = registry.agent_liveness("dev-6").await.expect("liveness");
        assert_eq!(liveness.working_status, WorkingStatus::InProgress);

        registry.terminate_session("dev-6").await;
        assert!(registry.agent_liveness("dev-6").await.is_none());
    }
}
