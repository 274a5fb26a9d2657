//! Storage module for agentbox
//!
//! - `json`: JSON - 범용 파일 저장/로드 (설정, 작업 레코드)

mod json;

// JSON Storage (범용)
pub use json::JsonStore;
