//! licensecheck 파이프라인 — 빌드 완료 이벤트를 결과 번들로 변환
//!
//! # 모듈 구조
//!
//! - [`filter`]: 처리 대상 이벤트 판별 (`EventFilter`)
//! - [`reference`]: 이벤트 본문 해석 (`BuildReferenceResolver`, `BuildReference`)
//! - [`fetcher`]: dist-git 체크아웃 (`SourceFetcher`, `DistGitFetcher`, `Checkout`)
//! - [`lookaside`]: lookaside 캐시 다운로드와 체크섬 검증
//! - [`spec`]: 선언된 라이선스 읽기 (`LicenseReader`, `SpecFileReader`)
//! - [`archive`]: 아카이브 추출과 스캔 (`ArchiveScanner`, `ScanResult`)
//! - [`writer`]: 결과 번들 기록 (`ResultWriter`)
//! - [`driver`]: 단계 순서 제어와 실패 격리 (`PipelineDriver`, `Outcome`)
//! - [`command`]: 외부 프로세스 실행 (`CommandRunner`, `TokioCommandRunner`)
//!
//! # 흐름
//!
//! ```text
//! Event --> EventFilter --> BuildReferenceResolver --> SourceFetcher --> Checkout
//!                                                                          |
//!                                          +-------------------------------+
//!                                          |                               |
//!                                   LicenseReader                   ArchiveScanner
//!                                          |                               |
//!                                          +--------> ResultWriter <-------+
//!                                                          |
//!                                               <root>/<event>-<build>-<arch>/
//! ```

pub mod archive;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod lookaside;
pub mod reference;
pub mod spec;
pub mod writer;

// 드라이버
pub use driver::{DefaultDriver, Outcome, PipelineDriver};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::{ErrorKind, ProcessError};

// 단계별 구성 요소
pub use archive::{ArchiveScanner, ScanResult};
pub use command::{CommandError, CommandOutput, CommandRequest, CommandRunner, TokioCommandRunner};
pub use fetcher::{Checkout, DistGitFetcher, SourceFetcher};
pub use filter::{BuildState, EventFilter};
pub use reference::{BuildReference, BuildReferenceResolver};
pub use spec::{LicenseReader, SpecFileReader};
pub use writer::ResultWriter;
