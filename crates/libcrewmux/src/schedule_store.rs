use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crewmux_protocol::{ActiveProject, ScheduledMessage};

use crate::error::CrewmuxError;

pub const SCHEDULE_VERSION: u32 = 1;

/// Flat persisted record of schedules and projects.
///
/// Like the task tracker, the whole record is rewritten on every mutation so
/// a partially written append can never corrupt it.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScheduleRecord {
    pub version: u32,
    pub last_updated_epoch_ms: u64,
    pub schedules: Vec<ScheduledMessage>,
    pub projects: Vec<ActiveProject>,
}

/// Persistence seam for schedules and project records. The engine only ever
/// mutates through this interface; swapping the file-backed store for an
/// in-memory one does not touch the timer logic.
pub trait ScheduleStore: Send + Sync {
    fn schedules(&self) -> &[ScheduledMessage];
    fn projects(&self) -> &[ActiveProject];
    fn find_schedule_mut(&mut self, id: &str) -> Option<&mut ScheduledMessage>;
    fn running_project(&self, project_id: &str) -> Option<&ActiveProject>;
    fn find_project_mut(&mut self, project_id: &str) -> Option<&mut ActiveProject>;
    fn insert_schedule(&mut self, schedule: ScheduledMessage) -> Result<(), CrewmuxError>;
    fn insert_project(&mut self, project: ActiveProject) -> Result<(), CrewmuxError>;
    fn persist(&mut self) -> Result<(), CrewmuxError>;
}

/// File-backed schedule store.
pub struct FsScheduleStore {
    path: PathBuf,
    record: ScheduleRecord,
}

impl FsScheduleStore {
    /// Load the record, or start empty when the file is absent.
    pub fn load(path: PathBuf) -> Result<Self, CrewmuxError> {
        let record = if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            ScheduleRecord {
                version: SCHEDULE_VERSION,
                ..ScheduleRecord::default()
            }
        };
        Ok(Self { path, record })
    }
}

impl ScheduleStore for FsScheduleStore {
    fn schedules(&self) -> &[ScheduledMessage] {
        &self.record.schedules
    }

    fn projects(&self) -> &[ActiveProject] {
        &self.record.projects
    }

    fn find_schedule_mut(&mut self, id: &str) -> Option<&mut ScheduledMessage> {
        self.record.schedules.iter_mut().find(|s| s.id == id)
    }

    fn running_project(&self, project_id: &str) -> Option<&ActiveProject> {
        self.record
            .projects
            .iter()
            .find(|p| p.project_id == project_id && p.is_running())
    }

    fn find_project_mut(&mut self, project_id: &str) -> Option<&mut ActiveProject> {
        self.record
            .projects
            .iter_mut()
            .find(|p| p.project_id == project_id && p.is_running())
    }

    fn insert_schedule(&mut self, schedule: ScheduledMessage) -> Result<(), CrewmuxError> {
        self.record.schedules.push(schedule);
        self.persist()
    }

    fn insert_project(&mut self, project: ActiveProject) -> Result<(), CrewmuxError> {
        self.record.projects.push(project);
        self.persist()
    }

    fn persist(&mut self) -> Result<(), CrewmuxError> {
        self.record.version = SCHEDULE_VERSION;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crewmux_protocol::DelayUnit;

    fn schedule(id: &str, active: bool) -> ScheduledMessage {
        ScheduledMessage {
            id: id.to_string(),
            name: format!("sched-{id}"),
            target_session: "pm-1".to_string(),
            target_project: None,
            message: "status check".to_string(),
            delay_amount: 5,
            delay_unit: DelayUnit::Minutes,
            is_recurring: true,
            is_active: active,
        }
    }

    #[test]
    fn record_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedules.json");

        let mut store = FsScheduleStore::load(path.clone()).unwrap();
        store.insert_schedule(schedule("s1", true)).unwrap();
        store
            .insert_project(ActiveProject {
                project_id: "p1".to_string(),
                pm_session: "pm-1".to_string(),
                check_in_schedule_id: Some("s1".to_string()),
                commit_schedule_id: None,
                started_at_epoch_ms: 1,
                stopped_at_epoch_ms: None,
            })
            .unwrap();

        let reloaded = FsScheduleStore::load(path).unwrap();
        assert_eq!(reloaded.schedules().len(), 1);
        assert_eq!(reloaded.projects().len(), 1);
        assert!(reloaded.running_project("p1").is_some());
        assert_eq!(reloaded.schedules()[0].name, "sched-s1");
    }

    #[test]
    fn stopped_projects_are_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsScheduleStore::load(dir.path().join("schedules.json")).unwrap();
        store
            .insert_project(ActiveProject {
                project_id: "p1".to_string(),
                pm_session: "pm-1".to_string(),
                check_in_schedule_id: None,
                commit_schedule_id: None,
                started_at_epoch_ms: 1,
                stopped_at_epoch_ms: Some(2),
            })
            .unwrap();
        assert!(store.running_project("p1").is_none());
    }

    #[test]
    fn deactivation_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedules.json");
        {
            let mut store = FsScheduleStore::load(path.clone()).unwrap();
            store.insert_schedule(schedule("s1", true)).unwrap();
            store.find_schedule_mut("s1").unwrap().is_active = false;
            store.persist().unwrap();
        }
        let reloaded = FsScheduleStore::load(path).unwrap();
        assert!(!reloaded.schedules()[0].is_active);
    }
}
