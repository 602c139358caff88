use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crewmux_protocol::{ActiveProject, DelayUnit, ScheduledMessage, SessionName};

use crate::error::CrewmuxError;
use crate::schedule_store::ScheduleStore;
use crate::session::SessionDirectory;

type SharedStore = Mutex<Box<dyn ScheduleStore>>;

/// Check-in cadence for a started project, minutes.
const CHECK_IN_MINUTES: u64 = 15;
/// Commit-reminder cadence for a started project, minutes.
const COMMIT_REMINDER_MINUTES: u64 = 30;

const CHECK_IN_TEMPLATE: &str = "Project {project_id} check-in: summarize progress since \
    the last check-in and flag anything blocked.";
const COMMIT_REMINDER_TEMPLATE: &str = "Project {project_id} reminder: make sure completed \
    work is committed and pushed.";

pub struct ScheduleSpec {
    pub name: String,
    pub target_session: SessionName,
    pub target_project: Option<String>,
    pub message: String,
    pub delay_amount: u64,
    pub delay_unit: DelayUnit,
    pub is_recurring: bool,
}

/// Timer-driven prompt injection.
///
/// Every active schedule owns one timer task; cancellation flips the
/// persisted `is_active` flag before the token fires, and the timer re-checks
/// that flag under the store lock before delivering, so a cancelled schedule
/// never delivers afterwards.
pub struct ScheduleEngine {
    directory: Arc<dyn SessionDirectory>,
    store: SharedStore,
    timers: Mutex<HashMap<String, CancellationToken>>,
}

impl ScheduleEngine {
    pub fn new(directory: Arc<dyn SessionDirectory>, store: Box<dyn ScheduleStore>) -> Arc<Self> {
        Arc::new(Self {
            directory,
            store: Mutex::new(store),
            timers: Mutex::new(HashMap::new()),
        })
    }

    pub async fn list_schedules(&self) -> Vec<ScheduledMessage> {
        self.store.lock().await.schedules().to_vec()
    }

    pub async fn list_projects(&self) -> Vec<ActiveProject> {
        self.store.lock().await.projects().to_vec()
    }

    /// Create, persist, and arm a new schedule.
    pub async fn schedule(
        self: &Arc<Self>,
        spec: ScheduleSpec,
    ) -> Result<ScheduledMessage, CrewmuxError> {
        let schedule = ScheduledMessage {
            id: uuid::Uuid::new_v4().to_string(),
            name: spec.name,
            target_session: spec.target_session,
            target_project: spec.target_project,
            message: spec.message,
            delay_amount: spec.delay_amount,
            delay_unit: spec.delay_unit,
            is_recurring: spec.is_recurring,
            is_active: true,
        };
        self.store
            .lock()
            .await
            .insert_schedule(schedule.clone())?;
        self.arm(schedule.clone()).await;
        info!(id = %schedule.id, name = %schedule.name, "schedule armed");
        Ok(schedule)
    }

    /// Deactivate a schedule. Idempotent: cancelling twice, or cancelling an
    /// id that was never created, is a no-op.
    pub async fn cancel(&self, id: &str) -> Result<(), CrewmuxError> {
        {
            let mut store = self.store.lock().await;
            match store.find_schedule_mut(id) {
                Some(schedule) if schedule.is_active => {
                    schedule.is_active = false;
                    store.persist()?;
                }
                Some(_) => {}
                None => {
                    debug!(id = %id, "cancel for unknown schedule ignored");
                    return Ok(());
                }
            }
        }
        if let Some(token) = self.timers.lock().await.remove(id) {
            token.cancel();
        }
        debug!(id = %id, "schedule cancelled");
        Ok(())
    }

    /// Re-arm every persisted active schedule. Ran once at daemon startup;
    /// elapsed wall time while the daemon was down is not credited, each
    /// schedule starts a fresh interval.
    pub async fn rearm_persisted(self: &Arc<Self>) -> usize {
        let active: Vec<ScheduledMessage> = self
            .store
            .lock()
            .await
            .schedules()
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        let count = active.len();
        for schedule in active {
            self.arm(schedule).await;
        }
        if count > 0 {
            info!(count, "persisted schedules re-armed");
        }
        count
    }

    /// Start a project: persist it and arm its check-in and commit-reminder
    /// schedules against the project manager session.
    pub async fn start_project(
        self: &Arc<Self>,
        project_id: &str,
        pm_session: &str,
    ) -> Result<ActiveProject, CrewmuxError> {
        if self.store.lock().await.running_project(project_id).is_some() {
            return Err(CrewmuxError::ProjectConflict(format!(
                "project {project_id} is already running"
            )));
        }

        let check_in = self
            .schedule(ScheduleSpec {
                name: format!("{project_id}-check-in"),
                target_session: pm_session.to_string(),
                target_project: Some(project_id.to_string()),
                message: CHECK_IN_TEMPLATE.to_string(),
                delay_amount: CHECK_IN_MINUTES,
                delay_unit: DelayUnit::Minutes,
                is_recurring: true,
            })
            .await?;
        let commit = self
            .schedule(ScheduleSpec {
                name: format!("{project_id}-commit-reminder"),
                target_session: pm_session.to_string(),
                target_project: Some(project_id.to_string()),
                message: COMMIT_REMINDER_TEMPLATE.to_string(),
                delay_amount: COMMIT_REMINDER_MINUTES,
                delay_unit: DelayUnit::Minutes,
                is_recurring: true,
            })
            .await?;

        let project = ActiveProject {
            project_id: project_id.to_string(),
            pm_session: pm_session.to_string(),
            check_in_schedule_id: Some(check_in.id),
            commit_schedule_id: Some(commit.id),
            started_at_epoch_ms: epoch_ms(),
            stopped_at_epoch_ms: None,
        };
        self.store.lock().await.insert_project(project.clone())?;
        info!(project_id, pm_session, "project started");
        Ok(project)
    }

    /// Stop a running project and cancel its schedules. Schedule cancellation
    /// is best-effort; the project is marked stopped regardless.
    pub async fn stop_project(&self, project_id: &str) -> Result<(), CrewmuxError> {
        let (check_in, commit) = {
            let mut store = self.store.lock().await;
            let Some(project) = store.find_project_mut(project_id) else {
                return Err(CrewmuxError::ProjectConflict(format!(
                    "project {project_id} is not running"
                )));
            };
            let ids = (
                project.check_in_schedule_id.take(),
                project.commit_schedule_id.take(),
            );
            project.stopped_at_epoch_ms = Some(epoch_ms());
            store.persist()?;
            ids
        };

        for id in [check_in, commit].into_iter().flatten() {
            if let Err(err) = self.cancel(&id).await {
                warn!(project_id, schedule_id = %id, error = %err, "schedule cancel failed");
            }
        }
        info!(project_id, "project stopped");
        Ok(())
    }

    async fn arm(self: &Arc<Self>, schedule: ScheduledMessage) {
        let token = CancellationToken::new();
        self.timers
            .lock()
            .await
            .insert(schedule.id.clone(), token.clone());

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let interval = schedule.delay_unit.to_duration(schedule.delay_amount);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if !engine.fire(&schedule).await {
                    break;
                }
                if !schedule.is_recurring {
                    break;
                }
            }
            engine.timers.lock().await.remove(&schedule.id);
        });
    }

    /// Deliver one occurrence. Returns false once the schedule is no longer
    /// active and the timer should stop.
    async fn fire(&self, schedule: &ScheduledMessage) -> bool {
        {
            let mut store = self.store.lock().await;
            match store.find_schedule_mut(&schedule.id) {
                Some(current) if current.is_active => {
                    if !schedule.is_recurring {
                        current.is_active = false;
                        if let Err(err) = store.persist() {
                            warn!(id = %schedule.id, error = %err, "schedule persist failed");
                        }
                    }
                }
                _ => return false,
            }
        }

        let text = render_message(schedule);
        let result = self
            .directory
            .send_message(&schedule.target_session, &text)
            .await;
        if result.success {
            debug!(id = %schedule.id, session = %schedule.target_session, "scheduled message delivered");
        } else {
            // Missed occurrences are dropped, not queued.
            warn!(
                id = %schedule.id,
                session = %schedule.target_session,
                error = ?result.error,
                "scheduled delivery failed"
            );
        }
        schedule.is_recurring
    }
}

fn render_message(schedule: &ScheduledMessage) -> String {
    match &schedule.target_project {
        Some(project_id) => schedule.message.replace("{project_id}", project_id),
        None => schedule.message.clone(),
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AgentLiveness;
    use async_trait::async_trait;
    use crewmux_protocol::ActionResult;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingDirectory {
        deliveries: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingDirectory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deliveries: StdMutex::new(Vec::new()),
            })
        }

        fn delivered(&self) -> Vec<(String, String)> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionDirectory for RecordingDirectory {
        async fn agent_liveness(&self, _session_name: &str) -> Option<AgentLiveness> {
            None
        }

        async fn send_message(&self, session_name: &str, text: &str) -> ActionResult {
            self.deliveries
                .lock()
                .unwrap()
                .push((session_name.to_string(), text.to_string()));
            ActionResult::ok("queued")
        }
    }

    fn engine_in(dir: &std::path::Path, directory: Arc<RecordingDirectory>) -> Arc<ScheduleEngine> {
        let store = crate::schedule_store::FsScheduleStore::load(dir.join("schedules.json")).unwrap();
        ScheduleEngine::new(directory, Box::new(store))
    }

    fn spec(name: &str, secs: u64, recurring: bool) -> ScheduleSpec {
        ScheduleSpec {
            name: name.to_string(),
            target_session: "pm-1".to_string(),
            target_project: None,
            message: "nudge".to_string(),
            delay_amount: secs,
            delay_unit: DelayUnit::Seconds,
            is_recurring: recurring,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_delivers_once_and_deactivates() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RecordingDirectory::new();
        let engine = engine_in(dir.path(), Arc::clone(&directory));

        let schedule = engine.schedule(spec("nudge", 5, false)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        let delivered = directory.delivered();
        assert_eq!(delivered, vec![("pm-1".to_string(), "nudge".to_string())]);

        let persisted = engine.list_schedules().await;
        assert_eq!(persisted.len(), 1);
        assert!(!persisted[0].is_active);
        assert_eq!(persisted[0].id, schedule.id);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_fires_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RecordingDirectory::new();
        let engine = engine_in(dir.path(), Arc::clone(&directory));

        engine.schedule(spec("heartbeat", 10, true)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(directory.delivered().len(), 3);
        assert!(engine.list_schedules().await[0].is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire_suppresses_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RecordingDirectory::new();
        let engine = engine_in(dir.path(), Arc::clone(&directory));

        let schedule = engine.schedule(spec("late", 60, false)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        engine.cancel(&schedule.id).await.unwrap();
        // Idempotent second cancel.
        engine.cancel(&schedule.id).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(directory.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_unknown_schedule_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path(), RecordingDirectory::new());
        engine.cancel("ghost").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_first_fire_stops_recurrence() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RecordingDirectory::new();
        let engine = engine_in(dir.path(), Arc::clone(&directory));

        let schedule = engine.schedule(spec("heartbeat", 10, true)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(directory.delivered().len(), 1);

        engine.cancel(&schedule.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(directory.delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restores_only_active_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RecordingDirectory::new();

        {
            let engine = engine_in(dir.path(), Arc::clone(&directory));
            engine.schedule(spec("keep", 5, true)).await.unwrap();
            let dropped = engine.schedule(spec("drop", 5, true)).await.unwrap();
            engine.cancel(&dropped.id).await.unwrap();
        }

        // Fresh engine over the same record, as after a daemon restart.
        let directory2 = RecordingDirectory::new();
        let engine = engine_in(dir.path(), Arc::clone(&directory2));
        let armed = engine.rearm_persisted().await;
        assert_eq!(armed, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(directory2.delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn project_start_arms_check_in_and_commit_reminder() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RecordingDirectory::new();
        let engine = engine_in(dir.path(), Arc::clone(&directory));

        let project = engine.start_project("p1", "pm-1").await.unwrap();
        assert!(project.check_in_schedule_id.is_some());
        assert!(project.commit_schedule_id.is_some());

        // A second start while running is a conflict.
        let again = engine.start_project("p1", "pm-2").await;
        assert!(matches!(again, Err(CrewmuxError::ProjectConflict(_))));

        // First check-in at 15 minutes, commit reminder not yet due.
        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        let delivered = directory.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1.contains("p1 check-in"));
    }

    #[tokio::test(start_paused = true)]
    async fn project_stop_cancels_its_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RecordingDirectory::new();
        let engine = engine_in(dir.path(), Arc::clone(&directory));

        let first = engine.start_project("p1", "pm-1").await.unwrap();
        engine.stop_project("p1").await.unwrap();

        // Stopped project can be started again, with a fresh pair of ids.
        let second = engine.start_project("p1", "pm-1").await.unwrap();
        assert_ne!(first.check_in_schedule_id, second.check_in_schedule_id);
        assert_ne!(first.commit_schedule_id, second.commit_schedule_id);
        engine.stop_project("p1").await.unwrap();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(directory.delivered().is_empty());

        let projects = engine.list_projects().await;
        assert_eq!(projects.len(), 2);
        assert!(projects.iter().all(|p| !p.is_running()));
    }

    #[test]
    fn template_substitutes_project_id() {
        let schedule = ScheduledMessage {
            id: "s1".to_string(),
            name: "check-in".to_string(),
            target_session: "pm-1".to_string(),
            target_project: Some("apollo".to_string()),
            message: "Project {project_id} check-in.".to_string(),
            delay_amount: 1,
            delay_unit: DelayUnit::Minutes,
            is_recurring: true,
            is_active: true,
        };
        assert_eq!(render_message(&schedule), "Project apollo check-in.");
    }
}
