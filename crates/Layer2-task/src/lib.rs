//! # agentbox-task
//!
//! Job lifecycle and execution plumbing for agentbox.
//!
//! ## Features
//!
//! - Job state machine with an append-only log
//! - Job table with per-job locking and change events
//! - Guarded shell execution (denylist, timeout, background PID registry)
//! - Container sandboxes with disjoint port allocation

pub mod container;
pub mod executor;
pub mod job;
pub mod log;
pub mod manager;
pub mod repository;
pub mod state;

// Job system
pub use job::{Job, JobId};
pub use manager::{JobEvent, JobManager};
pub use repository::{InMemoryJobRepository, JobRepository, JsonJobRepository};
pub use state::JobStatus;

// Log system
pub use log::{LogEntry, LogKind, LogSink, MemoryLogSink, NullLogSink};

// Execution
pub use executor::{
    BackgroundProcess, CommandExecutor, CommandOutput, CommandRequest, Execution, PolicyResult,
    ShellPolicy, TIMEOUT_EXIT_CODE,
};

// Container system
pub use container::{
    CleanupFailure, CleanupReport, ContainerInfo, ContainerRuntime, ContainerSpec,
    ContainerStatus, DockerRuntime, ExecOutput, PortAllocator, PortBinding, SandboxManager,
};
#[cfg(any(test, feature = "test-util"))]
pub use container::FakeRuntime;
