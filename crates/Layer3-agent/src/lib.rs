//! # agentbox-agent
//!
//! 작업 하나를 "예약됨"에서 "다운로드 가능"까지 진행시키는 에이전트 레이어.
//!
//! ## 핵심 컴포넌트
//!
//! - **ProjectGenerator**: 작업 설명 → 파일 묶음 (기본 구현: `TemplateGenerator`)
//! - **AgentOrchestrator**: 작업별 워크스페이스, 컨텍스트, 명령어, 프리뷰, 샌드박스
//! - **JobService**: 상태 기계를 진행시키고 대화형 조작을 제공
//!
//! ## 사용 예
//!
//! ```ignore
//! use agentbox_agent::{AgentServices, JobService, TemplateGenerator};
//!
//! let services = AgentServices::new(config, Arc::new(TemplateGenerator::new()), sandbox);
//! let service = Arc::new(JobService::new(jobs, services));
//!
//! let id = service.schedule("Build a counter").await?;
//! let job = service.wait_for_terminal(&id, Duration::from_secs(60)).await?;
//! println!("{}: {:?}", job.status(), job.download_url());
//! ```

pub mod generator;
pub mod orchestrator;
pub mod service;
pub mod session;

pub use generator::{GeneratedProject, ProjectGenerator, TemplateGenerator};
pub use orchestrator::{preview_command, AgentOrchestrator, AgentServices};
pub use service::JobService;
pub use session::{CommandExecution, SessionRegistry, TerminalSession};
