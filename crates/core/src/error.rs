//! 에러 타입 — 도메인별 에러 정의

/// licensecheck 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LicensecheckError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 이벤트 처리 파이프라인 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 메시지 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러 요약
///
/// 파이프라인 크레이트의 상세 에러가 이 형태로 변환됩니다.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이벤트가 처리 대상이 아니거나 형식이 잘못됨
    #[error("event rejected: {0}")]
    EventRejected(String),

    /// 소스 체크아웃 실패 (재시도 후보)
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// 스캔 단계 실패
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// 결과 저장 실패
    #[error("storage error: {0}")]
    Storage(String),
}

/// 메시지 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// JSON 메시지 디코딩 실패
    #[error("invalid message at line {line}: {reason}")]
    InvalidMessage { line: usize, reason: String },

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}
