pub mod broker;
pub mod error;
pub mod input;
pub mod output;
pub mod probe;
pub mod schedule;
pub mod schedule_store;
pub mod screen;
pub mod session;
pub mod task_store;
pub mod tasks;

pub use error::CrewmuxError;
pub use probe::{BannerProbe, ProbeRegistry, ReadinessProbe};
pub use schedule::{ScheduleEngine, ScheduleSpec};
pub use schedule_store::{FsScheduleStore, ScheduleStore};
pub use session::{
    AgentLiveness, CreateSessionConfig, RegistryConfig, SessionDirectory, SessionRegistry,
};
pub use task_store::{FsTaskStore, TaskStore, TaskTracker};
pub use tasks::{AssignTaskSpec, RecoveryReport, TaskEngine, TaskEngineConfig};
