use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crewmux_protocol::{
    AgentRole, AgentStatus, Event, SessionName, TaskStatus, TrackedTask, WorkingStatus,
};

use crate::error::CrewmuxError;
use crate::session::SessionDirectory;
use crate::task_store::{AssignmentBlock, TaskFolder, TaskLocation, TaskStore, TaskTracker};

const EVENT_CAPACITY: usize = 256;

/// Tuning for the recovery policy.
#[derive(Debug, Clone)]
pub struct TaskEngineConfig {
    /// How long an `(active, idle)` agent keeps its task after its last
    /// self-report before recovery reclaims it.
    pub idle_grace: Duration,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            idle_grace: Duration::from_secs(600),
        }
    }
}

/// Everything needed to hand a task to a session.
pub struct AssignTaskSpec {
    pub project_id: String,
    pub project_dir: PathBuf,
    pub milestone: String,
    pub file_name: String,
    pub task_name: String,
    pub target_role: AgentRole,
    pub session_name: SessionName,
}

/// Outcome summary of one recovery pass.
#[derive(serde::Serialize, Debug, Default, Clone)]
pub struct RecoveryReport {
    pub examined: usize,
    pub recovered: Vec<String>,
    pub reconciled_done: Vec<String>,
    pub reconciled_blocked: Vec<String>,
    pub dropped_missing: Vec<String>,
    pub errors: Vec<String>,
}

struct TrackedLocation {
    location: TaskLocation,
}

/// Task assignment, status bookkeeping, and stalled-task recovery.
///
/// The tracker lock serializes all read-modify-write sequences against the
/// persisted record; the separate recovery gate guarantees passes never
/// overlap even if two timers fire close together.
pub struct TaskEngine {
    store: Arc<dyn TaskStore>,
    directory: Arc<dyn SessionDirectory>,
    tracker: Mutex<TaskTracker>,
    recovery_gate: Mutex<()>,
    events: broadcast::Sender<Event>,
    config: TaskEngineConfig,
}

impl TaskEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        directory: Arc<dyn SessionDirectory>,
        tracker: TaskTracker,
        config: TaskEngineConfig,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            directory,
            tracker: Mutex::new(tracker),
            recovery_gate: Mutex::new(()),
            events,
            config,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn list_tasks(&self) -> Vec<TrackedTask> {
        self.tracker.lock().await.tasks().to_vec()
    }

    /// Assign an open task file to a session: move it to `in_progress`,
    /// append the assignment block, record it, and prompt the agent.
    pub async fn assign(&self, spec: AssignTaskSpec) -> Result<TrackedTask, CrewmuxError> {
        let location = TaskLocation {
            project_dir: spec.project_dir.clone(),
            milestone: spec.milestone.clone(),
            file_name: spec.file_name.clone(),
        };

        let mut tracker = self.tracker.lock().await;

        match self.store.locate(&location) {
            Some(TaskFolder::Open) => {}
            Some(folder) => {
                return Err(CrewmuxError::TaskConflict(format!(
                    "task file {} is already under {}",
                    spec.file_name,
                    folder.dir_name()
                )));
            }
            None => {
                return Err(CrewmuxError::TaskNotFound(format!(
                    "no task file {} in milestone {}",
                    spec.file_name, spec.milestone
                )));
            }
        }

        let in_progress = location.path_in(TaskFolder::InProgress);
        if tracker.contains_path(&in_progress) {
            return Err(CrewmuxError::TaskConflict(format!(
                "task file {} is already assigned",
                spec.file_name
            )));
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let assigned_at = epoch_ms(SystemTime::now());

        let path = self
            .store
            .relocate(&location, TaskFolder::Open, TaskFolder::InProgress)?;
        self.store.append_assignment(
            &path,
            &AssignmentBlock {
                task_id: task_id.clone(),
                session_name: spec.session_name.clone(),
                assigned_at_epoch_ms: assigned_at,
            },
        )?;

        let task = TrackedTask {
            id: task_id.clone(),
            project_id: spec.project_id,
            task_file_path: path,
            task_name: spec.task_name.clone(),
            target_role: spec.target_role,
            assigned_session: spec.session_name.clone(),
            assigned_at_epoch_ms: assigned_at,
            status: TaskStatus::Assigned,
            block_reason: None,
        };
        tracker.insert(task.clone())?;
        drop(tracker);

        info!(task_id = %task_id, session = %spec.session_name, task = %spec.task_name, "task assigned");
        let _ = self.events.send(Event::TaskAssigned {
            task_id: task_id.clone(),
            session_name: spec.session_name.clone(),
        });

        let kickoff = format!(
            "You have been assigned task '{}' ({}). The task file is at {}. \
             Report progress with report_status.",
            spec.task_name,
            task_id,
            task.task_file_path.display()
        );
        let delivery = self
            .directory
            .send_message(&spec.session_name, &kickoff)
            .await;
        if !delivery.success {
            warn!(
                task_id = %task_id,
                session = %spec.session_name,
                error = ?delivery.error,
                "kickoff prompt delivery failed"
            );
        }

        Ok(task)
    }

    /// Agent-initiated status update.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        block_reason: Option<String>,
    ) -> Result<(), CrewmuxError> {
        let mut tracker = self.tracker.lock().await;
        let task = tracker
            .find(task_id)
            .cloned()
            .ok_or_else(|| CrewmuxError::TaskNotFound(task_id.to_string()))?;

        match status {
            TaskStatus::Active => {
                if let Some(entry) = tracker.find_mut(task_id) {
                    entry.status = TaskStatus::Active;
                    entry.block_reason = None;
                }
                tracker.persist()?;
            }
            TaskStatus::Blocked => {
                if let Some(entry) = tracker.find_mut(task_id) {
                    entry.status = TaskStatus::Blocked;
                    entry.block_reason = block_reason;
                }
                tracker.persist()?;
                info!(task_id = %task_id, "task blocked");
            }
            TaskStatus::Completed => {
                if let Some(location) = tracked_location(&task) {
                    match self.store.relocate(
                        &location.location,
                        TaskFolder::InProgress,
                        TaskFolder::Done,
                    ) {
                        Ok(_) => {}
                        Err(err) => {
                            // The agent may have moved the file itself.
                            warn!(task_id = %task_id, error = %err, "completion move skipped");
                        }
                    }
                }
                tracker.remove(task_id)?;
                info!(task_id = %task_id, "task completed");
                let _ = self.events.send(Event::TaskCompleted {
                    task_id: task_id.to_string(),
                });
            }
            TaskStatus::Assigned | TaskStatus::PendingAssignment => {
                return Err(CrewmuxError::TaskConflict(format!(
                    "cannot self-report status {status:?}"
                )));
            }
        }
        Ok(())
    }

    /// One recovery pass over every assigned/active task.
    ///
    /// Manual moves are reconciled first; then tasks whose agent is not live
    /// are stripped, moved back to `open`, and dropped from tracking.
    /// Per-task failures are isolated; the pass always runs to completion.
    pub async fn recover_stalled(&self) -> RecoveryReport {
        let _pass = self.recovery_gate.lock().await;
        let mut report = RecoveryReport::default();

        let candidates: Vec<TrackedTask> = {
            let tracker = self.tracker.lock().await;
            tracker
                .tasks()
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Assigned | TaskStatus::Active))
                .cloned()
                .collect()
        };
        report.examined = candidates.len();

        for task in candidates {
            if let Err(err) = self.recover_one(&task, &mut report).await {
                warn!(task_id = %task.id, error = %err, "recovery step failed");
                report.errors.push(format!("{}: {err}", task.id));
            }
        }

        if !report.recovered.is_empty() {
            info!(count = report.recovered.len(), "tasks recovered to open");
        }
        report
    }

    async fn recover_one(
        &self,
        task: &TrackedTask,
        report: &mut RecoveryReport,
    ) -> Result<(), CrewmuxError> {
        let Some(tracked) = tracked_location(task) else {
            // Path does not fit the milestone layout; drop the record.
            self.tracker.lock().await.remove(&task.id)?;
            report.dropped_missing.push(task.id.clone());
            return Ok(());
        };
        let location = tracked.location;

        match self.store.locate(&location) {
            Some(TaskFolder::Done) => {
                // Someone finished it out-of-band; trust the filesystem.
                self.tracker.lock().await.remove(&task.id)?;
                report.reconciled_done.push(task.id.clone());
                let _ = self.events.send(Event::TaskCompleted {
                    task_id: task.id.clone(),
                });
                return Ok(());
            }
            Some(TaskFolder::Blocked) => {
                let mut tracker = self.tracker.lock().await;
                if let Some(entry) = tracker.find_mut(&task.id) {
                    entry.status = TaskStatus::Blocked;
                }
                tracker.persist()?;
                report.reconciled_blocked.push(task.id.clone());
                return Ok(());
            }
            Some(TaskFolder::Open) => {
                // Already back in open; just drop the stale record.
                self.tracker.lock().await.remove(&task.id)?;
                report.dropped_missing.push(task.id.clone());
                return Ok(());
            }
            Some(TaskFolder::InProgress) => {}
            None => {
                self.tracker.lock().await.remove(&task.id)?;
                report.dropped_missing.push(task.id.clone());
                return Ok(());
            }
        }

        if self.agent_is_live(&task.assigned_session).await {
            return Ok(());
        }

        let path = location.path_in(TaskFolder::InProgress);
        self.store.strip_assignment(&path)?;
        self.store
            .relocate(&location, TaskFolder::InProgress, TaskFolder::Open)?;
        self.tracker.lock().await.remove(&task.id)?;
        report.recovered.push(task.id.clone());
        info!(task_id = %task.id, session = %task.assigned_session, "stalled task recovered");
        let _ = self.events.send(Event::TaskRecovered {
            task_id: task.id.clone(),
            session_name: task.assigned_session.clone(),
        });
        Ok(())
    }

    /// Liveness for recovery: the agent holds its task while it is active and
    /// working, or active and idle within the idle-grace window.
    async fn agent_is_live(&self, session_name: &str) -> bool {
        let Some(liveness) = self.directory.agent_liveness(session_name).await else {
            return false;
        };
        if liveness.status != AgentStatus::Active {
            return false;
        }
        match liveness.working_status {
            WorkingStatus::InProgress => true,
            WorkingStatus::Idle => {
                let since_report = SystemTime::now()
                    .duration_since(liveness.last_report)
                    .unwrap_or_default();
                since_report <= self.config.idle_grace
            }
        }
    }
}

fn tracked_location(task: &TrackedTask) -> Option<TrackedLocation> {
    // task_file_path is <project_dir>/<milestone>/<folder>/<file_name>.
    let file_name = task.task_file_path.file_name()?.to_str()?.to_string();
    let folder_dir = task.task_file_path.parent()?;
    let milestone_dir = folder_dir.parent()?;
    let milestone = milestone_dir.file_name()?.to_str()?.to_string();
    let project_dir = milestone_dir.parent()?.to_path_buf();
    Some(TrackedLocation {
        location: TaskLocation {
            project_dir,
            milestone,
            file_name,
        },
    })
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
