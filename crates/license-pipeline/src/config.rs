//! 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`LicensecheckConfig`]에서 파이프라인이 쓰는
//! 섹션(bus, dist_git, scanner, storage)만 모아 평탄화한 구조체입니다.
//!
//! # 사용 예시
//!
//! ```
//! use licensecheck_pipeline::PipelineConfigBuilder;
//!
//! let config = PipelineConfigBuilder::new()
//!     .result_dir("/srv/licensecheck")
//!     .scan_timeout_secs(120)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.scan_timeout_secs, 120);
//! ```

use std::path::{Component, PathBuf};
use std::time::Duration;

use licensecheck_core::config::{DEFAULT_TOPIC, LicensecheckConfig, REPO_PLACEHOLDER};

use crate::error::ProcessError;

/// 파이프라인 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 처리 대상 토픽
    pub topic: String,
    /// 종료 상태 빌드만 처리
    pub only_terminal_states: bool,
    /// clone URL에서 제거할 호스트 접두어
    pub dist_git_base_url: String,
    /// 익명 clone URL 템플릿
    pub anon_clone_url: String,
    /// lookaside 캐시 기본 URL
    pub lookaside_url: String,
    /// 소스 가져오기 최대 시도 횟수
    pub fetch_retries: u32,
    /// 재시도 기본 대기 시간 (밀리초)
    pub retry_backoff_ms: u64,
    /// lookaside HTTP 타임아웃 (초)
    pub http_timeout_secs: u64,
    /// 스캐너 실행 파일
    pub scanner_program: String,
    /// 스캐너 인자 (추출 디렉토리 경로가 마지막에 붙음)
    pub scanner_args: Vec<String>,
    /// 아카이브 하나당 스캔 제한 시간 (초)
    pub scan_timeout_secs: u64,
    /// 소스 아카이브 접미어
    pub archive_suffix: String,
    /// 결과 번들 루트
    pub result_dir: PathBuf,
    /// 임시 체크아웃 상위 디렉토리
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_core(&LicensecheckConfig::default())
    }
}

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    pub fn from_core(core: &LicensecheckConfig) -> Self {
        let work_dir = if core.storage.work_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(&core.storage.work_dir))
        };

        Self {
            topic: core.bus.topic.clone(),
            only_terminal_states: core.bus.only_terminal_states,
            dist_git_base_url: core.dist_git.base_url.clone(),
            anon_clone_url: core.dist_git.anon_clone_url.clone(),
            lookaside_url: core.dist_git.lookaside_url.clone(),
            fetch_retries: core.dist_git.fetch_retries,
            retry_backoff_ms: core.dist_git.retry_backoff_ms,
            http_timeout_secs: core.dist_git.http_timeout_secs,
            scanner_program: core.scanner.program.clone(),
            scanner_args: core.scanner.args.clone(),
            scan_timeout_secs: core.scanner.timeout_secs,
            archive_suffix: core.scanner.archive_suffix.clone(),
            result_dir: PathBuf::from(&core.storage.result_dir),
            work_dir,
        }
    }

    /// 아카이브 하나당 스캔 제한 시간
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// 재시도 기본 대기 시간
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.topic.trim().is_empty() {
            return Err(config_err("topic", "must not be empty"));
        }

        if !self.anon_clone_url.contains(REPO_PLACEHOLDER) {
            return Err(config_err(
                "anon_clone_url",
                format!("template must contain '{REPO_PLACEHOLDER}'"),
            ));
        }

        if self.fetch_retries == 0 {
            return Err(config_err("fetch_retries", "must be at least 1"));
        }

        if self.scanner_program.trim().is_empty() {
            return Err(config_err("scanner_program", "must not be empty"));
        }

        if self.scan_timeout_secs == 0 {
            return Err(config_err("scan_timeout_secs", "must be greater than 0"));
        }

        if self.archive_suffix.is_empty() {
            return Err(config_err("archive_suffix", "must not be empty"));
        }

        if !self.result_dir.is_absolute()
            || self
                .result_dir
                .components()
                .any(|c| c == Component::ParentDir)
        {
            return Err(config_err(
                "result_dir",
                format!(
                    "'{}' must be an absolute path without '..'",
                    self.result_dir.display()
                ),
            ));
        }

        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> ProcessError {
    ProcessError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// [`PipelineConfig`] 빌더
///
/// 빌드 시 유효성 검증을 수행합니다.
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// 처리 대상 토픽을 설정합니다.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    /// 종료 상태 빌드만 처리할지 설정합니다.
    pub fn only_terminal_states(mut self, only: bool) -> Self {
        self.config.only_terminal_states = only;
        self
    }

    /// dist-git 호스트 접두어를 설정합니다.
    pub fn dist_git_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.dist_git_base_url = url.into();
        self
    }

    /// 익명 clone URL 템플릿을 설정합니다.
    pub fn anon_clone_url(mut self, template: impl Into<String>) -> Self {
        self.config.anon_clone_url = template.into();
        self
    }

    /// lookaside 캐시 URL을 설정합니다.
    pub fn lookaside_url(mut self, url: impl Into<String>) -> Self {
        self.config.lookaside_url = url.into();
        self
    }

    /// 재시도 횟수와 기본 대기 시간을 설정합니다.
    pub fn retries(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.config.fetch_retries = attempts;
        self.config.retry_backoff_ms = backoff_ms;
        self
    }

    /// 스캐너 프로그램과 인자를 설정합니다.
    pub fn scanner(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.config.scanner_program = program.into();
        self.config.scanner_args = args;
        self
    }

    /// 스캔 제한 시간(초)을 설정합니다.
    pub fn scan_timeout_secs(mut self, secs: u64) -> Self {
        self.config.scan_timeout_secs = secs;
        self
    }

    /// 결과 번들 루트를 설정합니다.
    pub fn result_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.result_dir = dir.into();
        self
    }

    /// 임시 체크아웃 상위 디렉토리를 설정합니다.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    /// 설정을 검증하고 빌드합니다.
    ///
    /// # Errors
    ///
    /// 유효성 검증 실패 시 `ProcessError::Config` 반환
    pub fn build(self) -> Result<PipelineConfig, ProcessError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn default_topic_is_koji_state_change() {
        assert_eq!(PipelineConfig::default().topic, DEFAULT_TOPIC);
    }

    #[test]
    fn from_core_preserves_values() {
        let mut core = LicensecheckConfig::default();
        core.bus.only_terminal_states = true;
        core.scanner.program = "/opt/bin/licensecheck".to_owned();
        core.scanner.timeout_secs = 42;
        core.storage.result_dir = "/srv/results".to_owned();
        core.storage.work_dir = "/var/tmp/licensecheck".to_owned();

        let config = PipelineConfig::from_core(&core);
        assert!(config.only_terminal_states);
        assert_eq!(config.scanner_program, "/opt/bin/licensecheck");
        assert_eq!(config.scan_timeout(), Duration::from_secs(42));
        assert_eq!(config.result_dir, PathBuf::from("/srv/results"));
        assert_eq!(config.work_dir, Some(PathBuf::from("/var/tmp/licensecheck")));
    }

    #[test]
    fn empty_work_dir_means_system_temp() {
        let config = PipelineConfig::from_core(&LicensecheckConfig::default());
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn builder_rejects_relative_result_dir() {
        let result = PipelineConfigBuilder::new().result_dir("results").build();
        assert!(matches!(result, Err(ProcessError::Config { .. })));
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        assert!(
            PipelineConfigBuilder::new()
                .scan_timeout_secs(0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn builder_rejects_zero_retries() {
        assert!(PipelineConfigBuilder::new().retries(0, 10).build().is_err());
    }

    #[test]
    fn builder_all_setters() {
        let config = PipelineConfigBuilder::new()
            .topic("org.example.buildsys.build.state.change")
            .only_terminal_states(true)
            .dist_git_base_url("https://src.example.org/")
            .anon_clone_url("https://src.example.org/{repo}.git")
            .lookaside_url("https://src.example.org/repo/pkgs")
            .retries(5, 10)
            .scanner("scancode", vec!["--license".to_owned()])
            .scan_timeout_secs(30)
            .result_dir("/srv/results")
            .work_dir("/var/tmp")
            .build()
            .unwrap();

        assert_eq!(config.topic, "org.example.buildsys.build.state.change");
        assert!(config.only_terminal_states);
        assert_eq!(config.fetch_retries, 5);
        assert_eq!(config.retry_backoff(), Duration::from_millis(10));
        assert_eq!(config.scanner_program, "scancode");
        assert_eq!(config.scanner_args, vec!["--license"]);
        assert_eq!(config.work_dir, Some(PathBuf::from("/var/tmp")));
    }
}
