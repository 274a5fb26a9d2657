//! Command execution
//!
//! - `CommandExecutor` - 호스트에서 shell 명령어 실행 (foreground/background)
//! - `ShellPolicy` - 실행 전 파괴적인 명령어 차단

pub mod local;
pub mod shell_policy;

pub use local::{
    BackgroundProcess, CommandExecutor, CommandOutput, CommandRequest, Execution,
    TIMEOUT_EXIT_CODE,
};
pub use shell_policy::{PolicyResult, ShellPolicy};
