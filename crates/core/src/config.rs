//! 설정 관리 — licensecheck.toml 파싱 및 런타임 설정
//!
//! [`LicensecheckConfig`]는 데몬과 파이프라인의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LICENSECHECK_SCANNER_PROGRAM=licensecheck` 형식)
//! 3. 설정 파일 (`licensecheck.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), licensecheck_core::error::LicensecheckError> {
//! use licensecheck_core::config::LicensecheckConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LicensecheckConfig::load("licensecheck.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LicensecheckConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LicensecheckError};

/// Koji 빌드 상태 변경 토픽 (Fedora 프로덕션 버스)
pub const DEFAULT_TOPIC: &str = "org.fedoraproject.prod.buildsys.build.state.change";

/// 익명 clone URL 템플릿의 저장소 자리표시자
pub const REPO_PLACEHOLDER: &str = "{repo}";

/// licensecheck 통합 설정
///
/// `licensecheck.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicensecheckConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 메시지 버스 필터 설정
    #[serde(default)]
    pub bus: BusConfig,
    /// dist-git / lookaside 설정
    #[serde(default)]
    pub dist_git: DistGitConfig,
    /// 외부 라이선스 스캐너 설정
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// 결과 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 컨슈머 동시성 설정
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LicensecheckConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LicensecheckError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LicensecheckError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LicensecheckError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LicensecheckError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LicensecheckError> {
        toml::from_str(toml_str).map_err(|e| {
            LicensecheckError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LICENSECHECK_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LICENSECHECK_GENERAL_LOG_LEVEL");
        override_string(
            &mut self.general.log_format,
            "LICENSECHECK_GENERAL_LOG_FORMAT",
        );

        // Bus
        override_string(&mut self.bus.topic, "LICENSECHECK_BUS_TOPIC");
        override_bool(
            &mut self.bus.only_terminal_states,
            "LICENSECHECK_BUS_ONLY_TERMINAL_STATES",
        );

        // dist-git
        override_string(&mut self.dist_git.base_url, "LICENSECHECK_DIST_GIT_BASE_URL");
        override_string(
            &mut self.dist_git.anon_clone_url,
            "LICENSECHECK_DIST_GIT_ANON_CLONE_URL",
        );
        override_string(
            &mut self.dist_git.lookaside_url,
            "LICENSECHECK_DIST_GIT_LOOKASIDE_URL",
        );
        override_u32(
            &mut self.dist_git.fetch_retries,
            "LICENSECHECK_DIST_GIT_FETCH_RETRIES",
        );
        override_u64(
            &mut self.dist_git.retry_backoff_ms,
            "LICENSECHECK_DIST_GIT_RETRY_BACKOFF_MS",
        );
        override_u64(
            &mut self.dist_git.http_timeout_secs,
            "LICENSECHECK_DIST_GIT_HTTP_TIMEOUT_SECS",
        );

        // Scanner
        override_string(&mut self.scanner.program, "LICENSECHECK_SCANNER_PROGRAM");
        override_csv(&mut self.scanner.args, "LICENSECHECK_SCANNER_ARGS");
        override_u64(
            &mut self.scanner.timeout_secs,
            "LICENSECHECK_SCANNER_TIMEOUT_SECS",
        );

        // Storage
        override_string(
            &mut self.storage.result_dir,
            "LICENSECHECK_STORAGE_RESULT_DIR",
        );
        override_string(&mut self.storage.work_dir, "LICENSECHECK_STORAGE_WORK_DIR");

        // Consumer
        override_usize(
            &mut self.consumer.max_concurrent,
            "LICENSECHECK_CONSUMER_MAX_CONCURRENT",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LICENSECHECK_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "LICENSECHECK_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "LICENSECHECK_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LicensecheckError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.bus.topic.trim().is_empty() {
            return Err(invalid("bus.topic", "topic must not be empty"));
        }

        if !self.dist_git.anon_clone_url.contains(REPO_PLACEHOLDER) {
            return Err(invalid(
                "dist_git.anon_clone_url",
                format!("template must contain '{REPO_PLACEHOLDER}'"),
            ));
        }

        if self.dist_git.base_url.is_empty() {
            return Err(invalid("dist_git.base_url", "base url must not be empty"));
        }

        if self.dist_git.fetch_retries == 0 {
            return Err(invalid("dist_git.fetch_retries", "must be at least 1"));
        }

        if self.scanner.program.trim().is_empty() {
            return Err(invalid("scanner.program", "program must not be empty"));
        }

        if self.scanner.timeout_secs == 0 {
            return Err(invalid("scanner.timeout_secs", "must be greater than 0"));
        }

        if self.scanner.archive_suffix.is_empty() {
            return Err(invalid(
                "scanner.archive_suffix",
                "archive suffix must not be empty",
            ));
        }

        validate_storage_path("storage.result_dir", &self.storage.result_dir, false)?;
        validate_storage_path("storage.work_dir", &self.storage.work_dir, true)?;

        if self.consumer.max_concurrent == 0 {
            return Err(invalid("consumer.max_concurrent", "must be at least 1"));
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 메시지 버스 필터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 처리 대상 토픽
    pub topic: String,
    /// 종료 상태(COMPLETE/FAILED/CANCELED) 빌드만 처리할지 여부
    pub only_terminal_states: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_owned(),
            only_terminal_states: false,
        }
    }
}

/// dist-git 및 lookaside 캐시 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistGitConfig {
    /// clone URL에서 제거할 호스트 접두어
    pub base_url: String,
    /// 익명 clone URL 템플릿 (`{repo}` 자리표시자 포함)
    pub anon_clone_url: String,
    /// lookaside 캐시 기본 URL
    pub lookaside_url: String,
    /// 소스 가져오기 최대 시도 횟수
    pub fetch_retries: u32,
    /// 재시도 기본 대기 시간 (밀리초, 시도마다 두 배)
    pub retry_backoff_ms: u64,
    /// lookaside 다운로드 HTTP 타임아웃 (초)
    pub http_timeout_secs: u64,
}

impl Default for DistGitConfig {
    fn default() -> Self {
        Self {
            base_url: "https://src.fedoraproject.org/".to_owned(),
            anon_clone_url: "https://src.fedoraproject.org/{repo}.git".to_owned(),
            lookaside_url: "https://src.fedoraproject.org/repo/pkgs".to_owned(),
            fetch_retries: 3,
            retry_backoff_ms: 2_000,
            http_timeout_secs: 300,
        }
    }
}

/// 외부 라이선스 스캐너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// 스캐너 실행 파일
    pub program: String,
    /// 추출 디렉토리 경로 앞에 붙는 인자 (재귀 스캔 플래그)
    pub args: Vec<String>,
    /// 아카이브 하나당 스캔 제한 시간 (초)
    pub timeout_secs: u64,
    /// 소스 아카이브 파일 접미어
    pub archive_suffix: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            program: "licensecheck".to_owned(),
            args: vec!["-r".to_owned()],
            timeout_secs: 600,
            archive_suffix: ".tar.gz".to_owned(),
        }
    }
}

/// 결과 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 결과 번들 루트 디렉토리
    pub result_dir: String,
    /// 임시 체크아웃 상위 디렉토리 (비어 있으면 시스템 임시 디렉토리)
    pub work_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            result_dir: "/tmp/fedora-licensecheck-service".to_owned(),
            work_dir: String::new(),
        }
    }
}

/// 컨슈머 동시성 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 동시에 처리할 최대 이벤트 수
    pub max_concurrent: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { max_concurrent: 2 }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9108,
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> LicensecheckError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn validate_storage_path(
    field: &str,
    value: &str,
    allow_empty: bool,
) -> Result<(), LicensecheckError> {
    if value.is_empty() {
        if allow_empty {
            return Ok(());
        }
        return Err(invalid(field, "path must not be empty"));
    }

    let path = Path::new(value);
    if !path.is_absolute() {
        return Err(invalid(field, format!("path '{value}' must be absolute")));
    }

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(invalid(
            field,
            format!("path '{value}' contains path traversal pattern '..'"),
        ));
    }

    Ok(())
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_is_valid() {
        LicensecheckConfig::default().validate().unwrap();
    }

    #[test]
    fn defaults_match_fedora_deployment() {
        let config = LicensecheckConfig::default();
        assert_eq!(config.bus.topic, DEFAULT_TOPIC);
        assert_eq!(config.scanner.program, "licensecheck");
        assert_eq!(config.scanner.args, vec!["-r"]);
        assert_eq!(config.storage.result_dir, "/tmp/fedora-licensecheck-service");
        assert!(config.dist_git.anon_clone_url.contains(REPO_PLACEHOLDER));
    }

    #[test]
    fn parse_partial_config_keeps_defaults() {
        let config = LicensecheckConfig::parse(
            r#"
[scanner]
program = "/usr/bin/licensecheck"
timeout_secs = 30

[storage]
result_dir = "/srv/licensecheck"
"#,
        )
        .unwrap();
        assert_eq!(config.scanner.program, "/usr/bin/licensecheck");
        assert_eq!(config.scanner.timeout_secs, 30);
        assert_eq!(config.scanner.archive_suffix, ".tar.gz");
        assert_eq!(config.storage.result_dir, "/srv/licensecheck");
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn parse_rejects_malformed_toml() {
        let err = LicensecheckConfig::parse("[scanner\nprogram = 1").unwrap_err();
        assert!(matches!(
            err,
            LicensecheckError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_log_level() {
        let mut config = LicensecheckConfig::default();
        config.general.log_level = "verbose".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut config = LicensecheckConfig::default();
        config.general.log_format = "xml".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_topic() {
        let mut config = LicensecheckConfig::default();
        config.bus.topic = "  ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_template_without_placeholder() {
        let mut config = LicensecheckConfig::default();
        config.dist_git.anon_clone_url = "https://src.example.org/rpms.git".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout_and_workers() {
        let mut config = LicensecheckConfig::default();
        config.scanner.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = LicensecheckConfig::default();
        config.consumer.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = LicensecheckConfig::default();
        config.dist_git.fetch_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_or_traversing_result_dir() {
        let mut config = LicensecheckConfig::default();
        config.storage.result_dir = "results".to_owned();
        assert!(config.validate().is_err());

        config.storage.result_dir = "/srv/../etc".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_empty_work_dir() {
        let mut config = LicensecheckConfig::default();
        config.storage.work_dir = String::new();
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn env_overrides_take_precedence() {
        // SAFETY: serial 테스트 내에서만 환경변수를 변경합니다
        unsafe {
            std::env::set_var("LICENSECHECK_SCANNER_PROGRAM", "scancode");
            std::env::set_var("LICENSECHECK_SCANNER_ARGS", "--license, --json-pp,-");
            std::env::set_var("LICENSECHECK_CONSUMER_MAX_CONCURRENT", "8");
        }

        let mut config = LicensecheckConfig::default();
        config.apply_env_overrides();

        // SAFETY: 테스트 정리
        unsafe {
            std::env::remove_var("LICENSECHECK_SCANNER_PROGRAM");
            std::env::remove_var("LICENSECHECK_SCANNER_ARGS");
            std::env::remove_var("LICENSECHECK_CONSUMER_MAX_CONCURRENT");
        }

        assert_eq!(config.scanner.program, "scancode");
        assert_eq!(config.scanner.args, vec!["--license", "--json-pp", "-"]);
        assert_eq!(config.consumer.max_concurrent, 8);
    }

    #[test]
    #[serial]
    fn invalid_env_value_is_ignored() {
        // SAFETY: serial 테스트 내에서만 환경변수를 변경합니다
        unsafe {
            std::env::set_var("LICENSECHECK_BUS_ONLY_TERMINAL_STATES", "maybe");
        }

        let mut config = LicensecheckConfig::default();
        config.apply_env_overrides();

        // SAFETY: 테스트 정리
        unsafe {
            std::env::remove_var("LICENSECHECK_BUS_ONLY_TERMINAL_STATES");
        }

        assert!(!config.bus.only_terminal_states);
    }

    #[tokio::test]
    async fn from_file_reports_missing_file() {
        let err = LicensecheckConfig::from_file("/nonexistent/licensecheck.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LicensecheckError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("licensecheck.toml");
        std::fs::write(&path, "[bus]\nonly_terminal_states = true\n").unwrap();

        let config = LicensecheckConfig::from_file(&path).await.unwrap();
        assert!(config.bus.only_terminal_states);
    }
}
