//! 소스 아카이브 탐색, 추출, 라이선스 스캔
//!
//! 체크아웃 루트의 최상위 `*.tar.gz` 파일을 이름순으로 처리합니다.
//! 아카이브 하나의 스캐너 실패(0이 아닌 종료 코드)나 추출 실패는
//! 나머지 아카이브 스캔을 막지 않습니다.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{debug, info, warn};

use licensecheck_core::metrics as m;

use crate::command::{CommandError, CommandRequest, CommandRunner};
use crate::config::PipelineConfig;
use crate::error::ProcessError;

/// 아카이브 하나의 스캔 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// 체크아웃 루트 기준 아카이브 파일 이름
    pub archive_name: String,
    /// 스캐너 stdout (손실 허용 UTF-8)
    pub stdout: String,
    /// 스캐너 stderr, 또는 추출 실패 메시지
    pub stderr: String,
    /// 스캐너 종료 코드: 추출 실패나 시그널 종료 시 `None`
    pub exit_status: Option<i32>,
}

/// 아카이브 스캐너
pub struct ArchiveScanner<R: CommandRunner> {
    runner: Arc<R>,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    suffix: String,
}

impl<R: CommandRunner> ArchiveScanner<R> {
    pub fn new(config: &PipelineConfig, runner: Arc<R>) -> Self {
        Self {
            runner,
            program: config.scanner_program.clone(),
            args: config.scanner_args.clone(),
            timeout: config.scan_timeout(),
            suffix: config.archive_suffix.clone(),
        }
    }

    /// 스캐너 실행 파일
    pub fn program(&self) -> &str {
        &self.program
    }

    /// 체크아웃 루트의 아카이브 파일 이름을 사전순으로 반환합니다.
    ///
    /// 디렉토리와 심볼릭 링크는 제외합니다.
    pub fn discover(&self, root: &Path) -> Result<Vec<String>, ProcessError> {
        let entries = std::fs::read_dir(root).map_err(|e| ProcessError::io(root, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ProcessError::io(root, e))?;
            let file_type = entry.file_type().map_err(|e| ProcessError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.len() > self.suffix.len() && name.ends_with(&self.suffix) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// 모든 아카이브를 추출하고 스캔합니다.
    ///
    /// # Errors
    ///
    /// - `ProcessError::ScanToolMissing`: 스캐너를 시작할 수 없음
    /// - `ProcessError::ScanTimedOut`: 스캐너가 제한 시간을 넘김
    pub async fn scan(&self, root: &Path) -> Result<Vec<ScanResult>, ProcessError> {
        let archives = self.discover(root)?;
        debug!(count = archives.len(), "discovered source archives");

        let mut results = Vec::with_capacity(archives.len());
        for name in archives {
            let result = self.scan_one(root, name).await?;
            metrics::counter!(m::ARCHIVES_SCANNED_TOTAL).increment(1);
            results.push(result);
        }

        Ok(results)
    }

    async fn scan_one(&self, root: &Path, name: String) -> Result<ScanResult, ProcessError> {
        let archive = root.join(&name);
        let target = root.join(&name[..name.len() - self.suffix.len()]);

        if let Err(e) = extract(archive.clone(), root.to_path_buf()).await {
            warn!(archive = %name, error = %e, "failed to extract archive, skipping scan");
            return Ok(ScanResult {
                archive_name: name,
                stdout: String::new(),
                stderr: format!("extraction failed: {e}"),
                exit_status: None,
            });
        }

        if let Err(reason) = confine(root, &target) {
            warn!(archive = %name, path = %target.display(), %reason, "refusing to scan archive");
            return Ok(ScanResult {
                archive_name: name,
                stdout: String::new(),
                stderr: reason,
                exit_status: None,
            });
        }

        if !target.is_dir() {
            warn!(
                archive = %name,
                path = %target.display(),
                "archive did not unpack into its expected directory"
            );
        }

        let request = CommandRequest::new(&self.program)
            .args(&self.args)
            .arg(target.as_os_str())
            .current_dir(root)
            .timeout(self.timeout)
            .isolated_env(true);

        let output = self.runner.run(&request).await.map_err(|e| match e {
            CommandError::Launch { program, source } => ProcessError::ScanToolMissing {
                program,
                reason: source.to_string(),
            },
            CommandError::TimedOut { timeout, .. } => ProcessError::ScanTimedOut {
                archive: name.clone(),
                timeout_secs: timeout.as_secs(),
            },
            CommandError::Io { program, source } => ProcessError::io(program, source),
        })?;

        if output.success() {
            debug!(archive = %name, "scan finished");
        } else {
            info!(
                archive = %name,
                exit_code = ?output.exit_code,
                "scanner exited unsuccessfully, keeping its output"
            );
        }

        Ok(ScanResult {
            archive_name: name,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: output.stderr_lossy(),
            exit_status: output.exit_code,
        })
    }
}

/// 스캔 대상이 체크아웃 안에 있는지 확인합니다.
///
/// `tar`는 항목 경로만 검사하고 심볼릭 링크의 대상은 검사하지 않으므로,
/// 추출된 대상 자체가 링크이거나 실제 경로가 `root` 밖이면 거부합니다.
/// 대상이 없으면 통과시킵니다.
fn confine(root: &Path, target: &Path) -> Result<(), String> {
    let escapes = || format!("scan target {} escapes checkout", target.display());

    match std::fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => return Err(escapes()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(format!("cannot inspect {}: {e}", target.display())),
    }

    let root = root
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", root.display()))?;
    let resolved = target
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", target.display()))?;
    if resolved.starts_with(&root) {
        Ok(())
    } else {
        Err(escapes())
    }
}

/// gzip tar 아카이브를 `dest`에 풉니다.
///
/// `tar` 크레이트가 `dest` 밖으로 나가는 항목 경로를 거부합니다.
/// 링크 대상은 [`confine`]이 확인합니다.
async fn extract(archive: PathBuf, dest: PathBuf) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive)?;
        let mut tarball = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        tarball.set_preserve_permissions(false);
        tarball.set_unpack_xattrs(false);
        tarball.set_overwrite(true);
        tarball.unpack(&dest)
    })
    .await
    .map_err(std::io::Error::other)?
}
