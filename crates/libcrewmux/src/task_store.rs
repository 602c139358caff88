use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crewmux_protocol::TrackedTask;

use crate::error::CrewmuxError;

pub const TRACKER_VERSION: u32 = 1;

const BLOCK_BEGIN: &str = "<!-- crewmux:assignment";
const BLOCK_END: &str = "-->";

/// Workflow folder a task file can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFolder {
    Open,
    InProgress,
    Blocked,
    Done,
}

impl TaskFolder {
    pub fn dir_name(&self) -> &'static str {
        match self {
            TaskFolder::Open => "open",
            TaskFolder::InProgress => "in_progress",
            TaskFolder::Blocked => "blocked",
            TaskFolder::Done => "done",
        }
    }

    pub const ALL: [TaskFolder; 4] = [
        TaskFolder::Open,
        TaskFolder::InProgress,
        TaskFolder::Blocked,
        TaskFolder::Done,
    ];
}

/// Location of one task file within a project's milestone hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLocation {
    pub project_dir: PathBuf,
    pub milestone: String,
    pub file_name: String,
}

impl TaskLocation {
    pub fn path_in(&self, folder: TaskFolder) -> PathBuf {
        self.project_dir
            .join(&self.milestone)
            .join(folder.dir_name())
            .join(&self.file_name)
    }
}

/// Assignment metadata appended to a task file while it is in progress.
#[derive(Debug, Clone)]
pub struct AssignmentBlock {
    pub task_id: String,
    pub session_name: String,
    pub assigned_at_epoch_ms: u64,
}

impl AssignmentBlock {
    fn render(&self) -> String {
        format!(
            "\n{BLOCK_BEGIN}\ntask_id: {}\nsession: {}\nassigned_at_epoch_ms: {}\n{BLOCK_END}\n",
            self.task_id, self.session_name, self.assigned_at_epoch_ms
        )
    }
}

/// File-location operations over a project's task hierarchy.
///
/// The engine owns only where a task file sits and the assignment block at its
/// tail; the task body format belongs to whoever authored it.
pub trait TaskStore: Send + Sync {
    /// Which folder currently holds the file, probing all four.
    fn locate(&self, location: &TaskLocation) -> Option<TaskFolder>;

    /// Move the file between folders, creating the target folder if needed.
    fn relocate(
        &self,
        location: &TaskLocation,
        from: TaskFolder,
        to: TaskFolder,
    ) -> Result<PathBuf, CrewmuxError>;

    fn append_assignment(
        &self,
        path: &Path,
        block: &AssignmentBlock,
    ) -> Result<(), CrewmuxError>;

    /// Remove a previously appended assignment block, if present.
    fn strip_assignment(&self, path: &Path) -> Result<(), CrewmuxError>;
}

/// Plain-filesystem task store.
pub struct FsTaskStore;

impl TaskStore for FsTaskStore {
    fn locate(&self, location: &TaskLocation) -> Option<TaskFolder> {
        TaskFolder::ALL
            .into_iter()
            .find(|folder| location.path_in(*folder).is_file())
    }

    fn relocate(
        &self,
        location: &TaskLocation,
        from: TaskFolder,
        to: TaskFolder,
    ) -> Result<PathBuf, CrewmuxError> {
        let source = location.path_in(from);
        let target = location.path_in(to);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&source, &target)?;
        debug!(file = %location.file_name, from = from.dir_name(), to = to.dir_name(), "task relocated");
        Ok(target)
    }

    fn append_assignment(
        &self,
        path: &Path,
        block: &AssignmentBlock,
    ) -> Result<(), CrewmuxError> {
        let mut content = std::fs::read_to_string(path)?;
        content.push_str(&block.render());
        std::fs::write(path, content)?;
        Ok(())
    }

    fn strip_assignment(&self, path: &Path) -> Result<(), CrewmuxError> {
        let content = std::fs::read_to_string(path)?;
        let stripped = strip_assignment_block(&content);
        if stripped.len() != content.len() {
            std::fs::write(path, stripped)?;
        }
        Ok(())
    }
}

/// Remove the trailing assignment block from file content, leaving the task
/// body untouched.
pub fn strip_assignment_block(content: &str) -> String {
    let Some(start) = content.rfind(BLOCK_BEGIN) else {
        return content.to_string();
    };
    let Some(end_rel) = content[start..].find(BLOCK_END) else {
        return content.to_string();
    };
    let mut end = start + end_rel + BLOCK_END.len();
    if content[end..].starts_with('\n') {
        end += 1;
    }
    let mut head = content[..start].to_string();
    // Drop the separator newline the block added.
    if head.ends_with('\n') {
        head.pop();
    }
    head.push_str(&content[end..]);
    head
}

/// Flat persisted record of all in-progress tasks.
///
/// Rewritten whole on every mutation; never appended. The engine keeps the
/// working copy in memory behind its own lock.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TrackerRecord {
    pub version: u32,
    pub last_updated_epoch_ms: u64,
    pub tasks: Vec<TrackedTask>,
}

pub struct TaskTracker {
    path: PathBuf,
    record: TrackerRecord,
}

impl TaskTracker {
    /// Load the tracker record, or start empty when the file is absent.
    pub fn load(path: PathBuf) -> Result<Self, CrewmuxError> {
        let record = if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            TrackerRecord {
                version: TRACKER_VERSION,
                ..TrackerRecord::default()
            }
        };
        Ok(Self { path, record })
    }

    pub fn tasks(&self) -> &[TrackedTask] {
        &self.record.tasks
    }

    pub fn find(&self, task_id: &str) -> Option<&TrackedTask> {
        self.record.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn find_mut(&mut self, task_id: &str) -> Option<&mut TrackedTask> {
        self.record.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.record.tasks.iter().any(|t| t.task_file_path == path)
    }

    pub fn insert(&mut self, task: TrackedTask) -> Result<(), CrewmuxError> {
        self.record.tasks.push(task);
        self.persist()
    }

    pub fn remove(&mut self, task_id: &str) -> Result<Option<TrackedTask>, CrewmuxError> {
        let removed = self
            .record
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .map(|idx| self.record.tasks.remove(idx));
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn persist(&mut self) -> Result<(), CrewmuxError> {
        self.record.version = TRACKER_VERSION;
        self.record.last_updated_epoch_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.record)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
