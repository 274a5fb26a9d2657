//! Local executor - runs shell commands on the host
//!
//! Features:
//! - Denylist check before anything is spawned
//! - Foreground execution with stdout/stderr capture and hard timeout
//! - Background execution with a PID registry (removed on exit)
//! - Process group termination on timeout and kill (Unix)

use super::shell_policy::ShellPolicy;
use agentbox_foundation::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Exit code reported for a command killed by the timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// A command to run
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub working_dir: PathBuf,
    /// `None` uses the executor default
    pub timeout: Option<Duration>,
    pub background: bool,
    pub env: Vec<(String, String)>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            timeout: None,
            background: false,
            env: Vec::new(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Captured result of a foreground command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }

    /// Treat a non-zero exit or timeout as `Error::Execution`
    pub fn into_result(self) -> Result<Self> {
        if self.timed_out {
            return Err(Error::Execution(format!(
                "Command timed out after {:.1}s",
                self.duration.as_secs_f64()
            )));
        }
        if self.exit_code != 0 {
            let detail = if self.stderr.trim().is_empty() {
                self.stdout.trim()
            } else {
                self.stderr.trim()
            };
            return Err(Error::Execution(format!(
                "Command exited with code {}: {}",
                self.exit_code, detail
            )));
        }
        Ok(self)
    }
}

/// What `execute` produced
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Completed(CommandOutput),
    Background { pid: u32 },
}

/// A tracked background process
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundProcess {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

struct ProcessHandle {
    info: BackgroundProcess,
    /// Distinguishes a reused PID from the one this entry was created for
    token: u64,
    kill_tx: Option<oneshot::Sender<()>>,
}

type ProcessTable = Arc<Mutex<HashMap<u32, ProcessHandle>>>;

/// Runs shell commands on the host
pub struct CommandExecutor {
    policy: ShellPolicy,
    default_timeout: Duration,
    processes: ProcessTable,
    next_token: AtomicU64,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl CommandExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self::with_policy(ShellPolicy::default(), default_timeout)
    }

    pub fn with_policy(policy: ShellPolicy, default_timeout: Duration) -> Self {
        Self {
            policy,
            default_timeout,
            processes: Arc::new(Mutex::new(HashMap::with_capacity(8))),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> &ShellPolicy {
        &self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Validate then run in the foreground or background
    pub async fn execute(&self, request: CommandRequest) -> Result<Execution> {
        if request.command.trim().is_empty() {
            return Err(Error::Validation("Command is required".to_string()));
        }
        self.policy.check(&request.command)?;

        if request.background {
            self.spawn_background(&request).map(|pid| Execution::Background { pid })
        } else {
            self.run_foreground(&request).await.map(Execution::Completed)
        }
    }

    /// Foreground shortcut
    pub async fn run(&self, request: CommandRequest) -> Result<CommandOutput> {
        match self.execute(CommandRequest { background: false, ..request }).await? {
            Execution::Completed(output) => Ok(output),
            Execution::Background { pid } => Err(Error::Internal(format!(
                "Unexpected background process {}",
                pid
            ))),
        }
    }

    /// Background shortcut, returns the PID
    pub async fn spawn(&self, request: CommandRequest) -> Result<u32> {
        match self.execute(CommandRequest { background: true, ..request }).await? {
            Execution::Background { pid } => Ok(pid),
            Execution::Completed(_) => Err(Error::Internal(
                "Background command ran in the foreground".to_string(),
            )),
        }
    }

    fn command(request: &CommandRequest) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.working_dir)
            .env("NODE_ENV", "development")
            .stdin(Stdio::null());
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn run_foreground(&self, request: &CommandRequest) -> Result<CommandOutput> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();

        let mut cmd = Self::command(request);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            Error::Execution(format!("Failed to spawn '{}': {}", request.command, e))
        })?;
        let pid = child.id();
        debug!("Running '{}' (pid {:?})", request.command, pid);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
                duration: started.elapsed(),
            }),
            Ok(Err(e)) => Err(Error::Execution(format!(
                "Failed to wait for '{}': {}",
                request.command, e
            ))),
            Err(_) => {
                // child는 이미 drop되어 kill_on_drop으로 종료됨, 자식 프로세스 그룹까지 정리
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                warn!(
                    "Command '{}' timed out after {}s",
                    request.command,
                    timeout.as_secs()
                );
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: format!("Command timed out after {}s", timeout.as_secs()),
                    exit_code: TIMEOUT_EXIT_CODE,
                    timed_out: true,
                    duration: started.elapsed(),
                })
            }
        }
    }

    fn spawn_background(&self, request: &CommandRequest) -> Result<u32> {
        let mut cmd = Self::command(request);
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| {
            Error::Execution(format!("Failed to spawn '{}': {}", request.command, e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Execution("Background process has no pid".to_string()))?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // 감시 태스크보다 먼저 등록해야 빠르게 끝나는 프로세스도 정리된다
        self.processes.lock().insert(
            pid,
            ProcessHandle {
                info: BackgroundProcess {
                    pid,
                    command: request.command.clone(),
                    started_at: Utc::now(),
                },
                token,
                kill_tx: Some(kill_tx),
            },
        );

        let processes = Arc::clone(&self.processes);
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!("Background process {} exited: {:?}", pid, status);
                }
                _ = kill_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    debug!("Background process {} killed", pid);
                }
            }
            let mut table = processes.lock();
            if table.get(&pid).map(|h| h.token) == Some(token) {
                table.remove(&pid);
            }
        });

        info!("Started background process {}: {}", pid, request.command);
        Ok(pid)
    }

    /// Terminate a background process and its process group
    pub fn kill(&self, pid: u32) -> Result<()> {
        let handle = self
            .processes
            .lock()
            .remove(&pid)
            .ok_or_else(|| Error::NotFound(format!("Background process {}", pid)))?;

        kill_process_group(pid);
        if let Some(tx) = handle.kill_tx {
            let _ = tx.send(());
        }
        info!("Killed background process {} ({})", pid, handle.info.command);
        Ok(())
    }

    /// Kill every tracked background process, returns the PIDs
    pub fn kill_all(&self) -> Vec<u32> {
        let pids: Vec<u32> = self.processes.lock().keys().copied().collect();
        pids.into_iter().filter(|pid| self.kill(*pid).is_ok()).collect()
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.processes.lock().contains_key(&pid)
    }

    pub fn running_processes(&self) -> Vec<BackgroundProcess> {
        let mut list: Vec<BackgroundProcess> = self
            .processes
            .lock()
            .values()
            .map(|h| h.info.clone())
            .collect();
        list.sort_by_key(|p| p.started_at);
        list
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // process_group(0)으로 띄웠으므로 pgid == pid
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        debug!("Process group {} already gone", pid);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> CommandExecutor {
        CommandExecutor::new(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_echo() {
        let dir = tempfile::tempdir().unwrap();
        let output = executor()
            .run(CommandRequest::new("echo hi", dir.path()))
            .await
            .unwrap();
        assert_eq!(output.stdout, "hi\n");
        assert_eq!(output.exit_code, 0);
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_runs_in_working_dir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let output = executor()
            .run(CommandRequest::new("ls && echo $NODE_ENV $EXTRA", dir.path()).env("EXTRA", "yes"))
            .await
            .unwrap();
        assert!(output.stdout.contains("marker.txt"));
        assert!(output.stdout.contains("development yes"));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let output = executor()
            .run(CommandRequest::new("echo oops >&2; exit 3", dir.path()))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr, "oops\n");
        assert!(matches!(output.into_result(), Err(Error::Execution(_))));
    }

    #[tokio::test]
    async fn test_blocked_command_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let command = format!("touch {} && rm -rf /", marker.display());

        let err = executor()
            .execute(CommandRequest::new(command, dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let output = executor()
            .run(CommandRequest::new("sleep 5", dir.path()).timeout(Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(output.duration < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_background_kill_removes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor();
        let pid = exec
            .spawn(CommandRequest::new("sleep 30", dir.path()))
            .await
            .unwrap();
        assert!(exec.is_running(pid));
        assert_eq!(exec.running_processes()[0].command, "sleep 30");

        exec.kill(pid).unwrap();
        assert!(!exec.is_running(pid));
        assert!(matches!(exec.kill(pid), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_background_exit_unregisters() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor();
        let pid = exec
            .spawn(CommandRequest::new("true", dir.path()))
            .await
            .unwrap();

        for _ in 0..50 {
            if !exec.is_running(pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!exec.is_running(pid));
    }

    #[tokio::test]
    async fn test_empty_command_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = executor()
            .execute(CommandRequest::new("  ", dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
