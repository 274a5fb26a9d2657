//! Container sandbox system
//!
//! - `ContainerRuntime` - 컨테이너 엔진 추상화 (create/stop/exec/copy/logs)
//! - `DockerRuntime` - bollard 기반 구현
//! - `PortAllocator` - 샌드박스별 겹치지 않는 포트 묶음
//! - `SandboxManager` - 작업당 컨테이너 하나의 생명주기

pub mod docker;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod manager;
pub mod ports;
pub mod runtime;

pub use docker::DockerRuntime;
#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeRuntime;
pub use manager::{CleanupFailure, CleanupReport, ContainerInfo, ContainerStatus, SandboxManager};
pub use ports::PortAllocator;
pub use runtime::{ContainerRuntime, ContainerSpec, ExecOutput, PortBinding};
