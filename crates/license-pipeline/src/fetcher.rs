//! 소스 가져오기 — dist-git 체크아웃과 lookaside 다운로드
//!
//! [`Checkout`]은 실행 하나가 독점하는 임시 디렉토리입니다.
//! `Drop` 시 삭제되므로 성공/실패와 관계없이 모든 종료 경로에서 정리됩니다.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info};

use licensecheck_core::config::REPO_PLACEHOLDER;

use crate::command::{CommandRequest, CommandRunner};
use crate::config::PipelineConfig;
use crate::error::ProcessError;
use crate::lookaside::{LookasideClient, SOURCES_FILE, parse_sources};
use crate::reference::BuildReference;

/// 임시 체크아웃 디렉토리 접두어
const CHECKOUT_PREFIX: &str = "licensecheck-";

/// 독점 소유하는 임시 소스 체크아웃
#[derive(Debug)]
pub struct Checkout {
    dir: TempDir,
}

impl Checkout {
    /// `parent` 아래(없으면 시스템 임시 디렉토리)에 고유한 빈 디렉토리를 만듭니다.
    pub fn create(parent: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(CHECKOUT_PREFIX);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    /// 체크아웃 루트
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 디렉토리를 즉시 삭제하고 삭제 에러를 반환합니다.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// 빌드 참조로부터 소스 체크아웃을 만드는 수집기
pub trait SourceFetcher: Send + Sync + 'static {
    /// 참조된 커밋의 완전한 체크아웃을 만듭니다.
    ///
    /// # Errors
    ///
    /// clone, checkout, lookaside 다운로드 중 하나라도 실패하면
    /// `ProcessError::SourceUnavailable`. 실패 시 부분 체크아웃은 삭제됩니다.
    fn fetch(
        &self,
        reference: &BuildReference,
    ) -> impl Future<Output = Result<Checkout, ProcessError>> + Send;
}

/// `git` + lookaside 캐시 기반 수집기
pub struct DistGitFetcher<R: CommandRunner> {
    runner: Arc<R>,
    anon_clone_url: String,
    work_dir: Option<PathBuf>,
    network_timeout: Duration,
    lookaside: LookasideClient,
}

impl<R: CommandRunner> DistGitFetcher<R> {
    /// 설정으로부터 수집기를 생성합니다.
    ///
    /// # Errors
    ///
    /// HTTP 클라이언트를 만들 수 없으면 `ProcessError::Config`
    pub fn new(config: &PipelineConfig, runner: Arc<R>) -> Result<Self, ProcessError> {
        let network_timeout = Duration::from_secs(config.http_timeout_secs);
        let lookaside =
            LookasideClient::new(&config.lookaside_url, network_timeout).map_err(|e| {
                ProcessError::Config {
                    field: "dist_git.lookaside_url".to_owned(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            runner,
            anon_clone_url: config.anon_clone_url.clone(),
            work_dir: config.work_dir.clone(),
            network_timeout,
            lookaside,
        })
    }

    /// 익명 clone URL
    pub fn clone_url(&self, repo_name: &str) -> String {
        self.anon_clone_url.replace(REPO_PLACEHOLDER, repo_name)
    }

    async fn git(
        &self,
        reference: &BuildReference,
        step: &str,
        request: CommandRequest,
    ) -> Result<(), ProcessError> {
        let request = request
            .timeout(self.network_timeout)
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|e| unavailable(reference, format!("{step}: {e}")))?;

        if !output.success() {
            return Err(unavailable(
                reference,
                format!(
                    "{step} exited with {}: {}",
                    output
                        .exit_code
                        .map_or_else(|| "signal".to_owned(), |c| c.to_string()),
                    output.stderr_lossy().trim()
                ),
            ));
        }

        Ok(())
    }

    async fn download_sources(
        &self,
        reference: &BuildReference,
        root: &Path,
    ) -> Result<usize, ProcessError> {
        let sources_path = root.join(SOURCES_FILE);
        let contents = match tokio::fs::read_to_string(&sources_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ProcessError::io(&sources_path, e)),
        };

        let entries =
            parse_sources(&contents).map_err(|e| unavailable(reference, e.to_string()))?;

        for entry in &entries {
            self.lookaside
                .download(&reference.repo_name, entry, root)
                .await
                .map_err(|e| unavailable(reference, format!("lookaside: {e}")))?;
        }

        Ok(entries.len())
    }
}

impl<R: CommandRunner> SourceFetcher for DistGitFetcher<R> {
    async fn fetch(&self, reference: &BuildReference) -> Result<Checkout, ProcessError> {
        let checkout =
            Checkout::create(self.work_dir.as_deref()).map_err(|e| ProcessError::Io {
                path: self
                    .work_dir
                    .as_deref()
                    .map_or_else(std::env::temp_dir, Path::to_path_buf)
                    .display()
                    .to_string(),
                source: e,
            })?;
        let root = checkout.path();

        debug!(
            repo = %reference.repo_name,
            commit = %reference.commit,
            path = %root.display(),
            "cloning"
        );

        // hooks 비활성화, 기본 브랜치는 체크아웃하지 않음
        self.git(
            reference,
            "git clone",
            CommandRequest::new("git")
                .args(["-c", "core.hooksPath=/dev/null", "clone", "--no-checkout", "--quiet"])
                .arg(self.clone_url(&reference.repo_name))
                .arg(root.as_os_str()),
        )
        .await?;

        self.git(
            reference,
            "git checkout",
            CommandRequest::new("git")
                .arg("-C")
                .arg(root.as_os_str())
                .args([
                    "-c",
                    "advice.detachedHead=false",
                    "checkout",
                    "--quiet",
                    "--detach",
                ])
                .arg(&reference.commit),
        )
        .await?;

        let downloaded = self.download_sources(reference, root).await?;

        info!(
            repo = %reference.repo_name,
            commit = %reference.commit,
            lookaside_files = downloaded,
            "source checkout ready"
        );

        Ok(checkout)
    }
}

fn unavailable(reference: &BuildReference, reason: String) -> ProcessError {
    ProcessError::SourceUnavailable {
        repo: reference.repo_name.clone(),
        commit: reference.commit.clone(),
        reason,
    }
}
