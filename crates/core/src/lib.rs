//! licensecheck 공통 크레이트
//!
//! 빌드 이벤트 처리 파이프라인과 데몬이 공유하는 타입을 정의합니다.
//!
//! - [`event`]: 메시지 버스에서 수신한 이벤트 ([`Event`])
//! - [`error`]: 최상위 에러 타입 ([`LicensecheckError`])
//! - [`config`]: `licensecheck.toml` 설정 ([`LicensecheckConfig`])
//! - [`metrics`]: 메트릭 이름 상수와 설명 등록

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;

// 에러
pub use error::{ConfigError, LicensecheckError, ParseError, PipelineError};

// 설정
pub use config::LicensecheckConfig;

// 이벤트
pub use event::Event;
