//! 파이프라인 에러 타입
//!
//! [`ProcessError`]는 이벤트 하나를 처리하는 동안 발생할 수 있는 모든 에러를 나타냅니다.
//! `From<ProcessError> for LicensecheckError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 전파됩니다.
//!
//! # 에러 분류
//!
//! | 변형 | 성격 | 처리 |
//! |------|------|------|
//! | `MalformedEvent` | 영구 | 이벤트 건너뜀 |
//! | `SourceUnavailable` | 일시적 | 백오프 후 재시도 |
//! | `SpecNotFound`, `MalformedSpec` | 영구 | 이벤트 건너뜀 |
//! | `ScanTimedOut` | 해당 실행만 실패 | 이벤트 건너뜀 |
//! | `BundleAlreadyExists` | 중복 전달 | 경고 후 건너뜀 |
//! | `ScanToolMissing`, `StorageUnavailable`, `Config` | 환경 오류 | 컨슈머 중단 |

use std::fmt;

use licensecheck_core::error::{LicensecheckError, PipelineError};

/// 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// 이벤트 필드 누락 또는 소스 URL 형식 오류
    #[error("malformed event: {reason}")]
    MalformedEvent {
        /// 실패 사유
        reason: String,
    },

    /// clone / checkout / lookaside 다운로드 실패
    #[error("source unavailable: {repo}@{commit}: {reason}")]
    SourceUnavailable {
        /// 저장소 이름 (예: `rpms/foo`)
        repo: String,
        /// 커밋
        commit: String,
        /// 실패 사유
        reason: String,
    },

    /// `<package>.spec` 파일이 체크아웃 루트에 없음
    #[error("spec file not found: {path}")]
    SpecNotFound {
        /// 기대한 spec 파일 경로
        path: String,
    },

    /// spec 파일에 License 태그가 없거나 읽을 수 없음
    #[error("malformed spec file: {path}: {reason}")]
    MalformedSpec {
        /// spec 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 스캐너 실행 파일을 실행할 수 없음
    #[error("scan tool missing: {program}: {reason}")]
    ScanToolMissing {
        /// 스캐너 프로그램
        program: String,
        /// 실패 사유
        reason: String,
    },

    /// 스캐너가 제한 시간 내에 끝나지 않음
    #[error("scan of {archive} timed out after {timeout_secs}s")]
    ScanTimedOut {
        /// 스캔 대상 아카이브
        archive: String,
        /// 제한 시간 (초)
        timeout_secs: u64,
    },

    /// 같은 키의 결과 번들이 이미 존재함
    #[error("result bundle already exists: {path}")]
    BundleAlreadyExists {
        /// 번들 경로
        path: String,
    },

    /// 결과 저장소 루트에 쓸 수 없음
    #[error("storage unavailable: {path}: {reason}")]
    StorageUnavailable {
        /// 저장소 루트
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 파일 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 파일 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },
}

/// 에러 종류: 로그와 메트릭 레이블에 사용
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedEvent,
    SourceUnavailable,
    SpecNotFound,
    MalformedSpec,
    ScanToolMissing,
    ScanTimedOut,
    BundleAlreadyExists,
    StorageUnavailable,
    Config,
    Io,
}

impl ErrorKind {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedEvent => "malformed_event",
            Self::SourceUnavailable => "source_unavailable",
            Self::SpecNotFound => "spec_not_found",
            Self::MalformedSpec => "malformed_spec",
            Self::ScanToolMissing => "scan_tool_missing",
            Self::ScanTimedOut => "scan_timed_out",
            Self::BundleAlreadyExists => "bundle_already_exists",
            Self::StorageUnavailable => "storage_unavailable",
            Self::Config => "config",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProcessError {
    /// I/O 에러를 경로와 함께 감쌉니다.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// 에러 종류를 반환합니다.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedEvent { .. } => ErrorKind::MalformedEvent,
            Self::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Self::SpecNotFound { .. } => ErrorKind::SpecNotFound,
            Self::MalformedSpec { .. } => ErrorKind::MalformedSpec,
            Self::ScanToolMissing { .. } => ErrorKind::ScanToolMissing,
            Self::ScanTimedOut { .. } => ErrorKind::ScanTimedOut,
            Self::BundleAlreadyExists { .. } => ErrorKind::BundleAlreadyExists,
            Self::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// 이벤트 하나가 아니라 컨슈머 전체를 멈춰야 하는 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ScanToolMissing { .. } | Self::StorageUnavailable { .. } | Self::Config { .. }
        )
    }

    /// 재시도하면 성공할 수 있는 에러인지 여부
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }
}

impl From<ProcessError> for LicensecheckError {
    fn from(err: ProcessError) -> Self {
        let msg = err.to_string();
        let summary = match err {
            ProcessError::MalformedEvent { .. } => PipelineError::EventRejected(msg),
            ProcessError::SourceUnavailable { .. } => PipelineError::SourceUnavailable(msg),
            ProcessError::SpecNotFound { .. }
            | ProcessError::MalformedSpec { .. }
            | ProcessError::ScanToolMissing { .. }
            | ProcessError::ScanTimedOut { .. } => PipelineError::ScanFailed(msg),
            ProcessError::BundleAlreadyExists { .. }
            | ProcessError::StorageUnavailable { .. }
            | ProcessError::Io { .. } => PipelineError::Storage(msg),
            ProcessError::Config { field, reason } => {
                return LicensecheckError::Config(
                    licensecheck_core::error::ConfigError::InvalidValue { field, reason },
                );
            }
        };
        LicensecheckError::Pipeline(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_unavailable_display() {
        let err = ProcessError::SourceUnavailable {
            repo: "rpms/foo".to_owned(),
            commit: "abc123".to_owned(),
            reason: "git clone exited with 128".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rpms/foo@abc123"));
        assert!(msg.contains("128"));
    }

    #[test]
    fn only_source_unavailable_is_transient() {
        let transient = ProcessError::SourceUnavailable {
            repo: "r".to_owned(),
            commit: "c".to_owned(),
            reason: "x".to_owned(),
        };
        assert!(transient.is_transient());
        assert!(!transient.is_fatal());

        let permanent = ProcessError::SpecNotFound {
            path: "/tmp/x/foo.spec".to_owned(),
        };
        assert!(!permanent.is_transient());
        assert!(!permanent.is_fatal());
    }

    #[test]
    fn environment_errors_are_fatal() {
        let missing = ProcessError::ScanToolMissing {
            program: "licensecheck".to_owned(),
            reason: "not found".to_owned(),
        };
        assert!(missing.is_fatal());

        let storage = ProcessError::StorageUnavailable {
            path: "/srv/results".to_owned(),
            reason: "read-only file system".to_owned(),
        };
        assert!(storage.is_fatal());
    }

    #[test]
    fn duplicate_bundle_is_not_fatal() {
        let err = ProcessError::BundleAlreadyExists {
            path: "/srv/results/e1-100-x86_64".to_owned(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::BundleAlreadyExists);
        assert_eq!(err.kind().as_str(), "bundle_already_exists");
    }

    #[test]
    fn converts_to_top_level_error() {
        let err: LicensecheckError = ProcessError::MalformedEvent {
            reason: "missing name".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            LicensecheckError::Pipeline(PipelineError::EventRejected(_))
        ));

        let err: LicensecheckError = ProcessError::SourceUnavailable {
            repo: "r".to_owned(),
            commit: "c".to_owned(),
            reason: "x".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            LicensecheckError::Pipeline(PipelineError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn config_error_maps_to_config() {
        let err: LicensecheckError = ProcessError::Config {
            field: "scanner.timeout_secs".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(matches!(err, LicensecheckError::Config(_)));
    }
}
