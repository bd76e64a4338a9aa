//! 결과 번들 기록
//!
//! 번들은 `<root>/.staging-<key>-<uuid>/`에 먼저 쓰고, 모든 파일이 기록된 뒤
//! `<root>/<key>`로 rename 합니다. 최종 이름의 디렉토리는 항상 완전한 번들입니다.
//!
//! # 번들 구조
//!
//! ```text
//! <root>/<event_id>-<build_id>-<arch>/
//!     message.json          # {id, topic, body}
//!     spec-license.txt      # 선언된 라이선스 + 개행
//!     licensecheck-0.txt    # 아카이브 0의 스캐너 stdout
//!     licensecheck-1.txt
//!     scans.json            # 아카이브별 이름, 종료 코드, stderr
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use licensecheck_core::event::Event;

use crate::archive::ScanResult;
use crate::error::ProcessError;
use crate::reference::BuildReference;

/// 원본 이벤트 파일
pub const MESSAGE_FILE: &str = "message.json";
/// 선언된 라이선스 파일
pub const LICENSE_FILE: &str = "spec-license.txt";
/// 스캔 색인 파일
pub const SCAN_INDEX_FILE: &str = "scans.json";
/// 미완성 번들 디렉토리 접두어
pub const STAGING_PREFIX: &str = ".staging-";
/// 이보다 오래 수정되지 않은 스테이징 디렉토리만 버려진 것으로 봅니다.
pub const ABANDONED_STAGING_AGE: Duration = Duration::from_secs(15 * 60);

/// `i`번째 아카이브의 스캔 보고서 파일 이름
pub fn report_file_name(index: usize) -> String {
    format!("licensecheck-{index}.txt")
}

/// `scans.json`의 한 항목
#[derive(Debug, Serialize)]
struct ScanIndexEntry<'a> {
    index: usize,
    archive: &'a str,
    exit_status: Option<i32>,
    report: String,
    stderr: &'a str,
}

/// 결과 저장소 루트에 번들을 기록하는 기록기
#[derive(Debug, Clone)]
pub struct ResultWriter {
    root: PathBuf,
}

impl ResultWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 결과 저장소 루트
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 참조의 최종 번들 경로
    pub fn bundle_path(&self, reference: &BuildReference) -> PathBuf {
        self.root.join(reference.bundle_key())
    }

    /// 번들 경로가 아직 비어 있는지 확인합니다.
    ///
    /// clone 전에 중복 전달을 걸러내기 위한 사전 검사이며,
    /// 최종 보장은 [`write`](Self::write)의 rename이 담당합니다.
    pub fn ensure_available(&self, reference: &BuildReference) -> Result<PathBuf, ProcessError> {
        let path = self.bundle_path(reference);
        if path.exists() {
            return Err(already_exists(&path));
        }
        Ok(path)
    }

    /// 루트를 만들고 그 안에 파일을 쓸 수 있는지 확인합니다.
    ///
    /// # Errors
    ///
    /// `ProcessError::StorageUnavailable`
    pub fn check_writable(&self) -> Result<(), ProcessError> {
        std::fs::create_dir_all(&self.root).map_err(|e| self.unavailable(e))?;
        tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| self.unavailable(e))?
            .close()
            .map_err(|e| self.unavailable(e))
    }

    /// 중단된 실행이 남긴 스테이징 디렉토리를 삭제하고 개수를 반환합니다.
    ///
    /// 마지막 수정 후 `min_age`가 지나지 않은 디렉토리는 다른 프로세스가
    /// 아직 기록 중일 수 있으므로 남겨 둡니다. 결과 디렉토리 하나에
    /// 데몬 하나를 전제로 하며, 여러 데몬이 공유하면 `min_age`를 가장 긴
    /// 번들 기록 시간보다 크게 잡아야 합니다.
    pub fn sweep_staging(&self, min_age: Duration) -> Result<usize, ProcessError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ProcessError::io(&self.root, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ProcessError::io(&self.root, e))?;
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGING_PREFIX));
            if !is_staging || !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }

            let path = entry.path();
            // 미래 시각의 mtime은 방금 기록된 것으로 취급
            let age = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default())
                .map_err(|e| ProcessError::io(&path, e))?;
            if age < min_age {
                debug!(path = %path.display(), age_secs = age.as_secs(), "keeping recent staging bundle");
                continue;
            }

            std::fs::remove_dir_all(&path).map_err(|e| ProcessError::io(&path, e))?;
            warn!(path = %path.display(), "removed abandoned staging bundle");
            removed += 1;
        }

        Ok(removed)
    }

    /// 번들을 기록하고 최종 경로를 반환합니다.
    ///
    /// # Errors
    ///
    /// - `ProcessError::BundleAlreadyExists`: 같은 키의 번들이 이미 있음 (기존 번들은 그대로)
    /// - `ProcessError::StorageUnavailable`: 루트를 만들 수 없음
    /// - `ProcessError::Io`: 파일 기록 실패 (스테이징 디렉토리는 삭제됨)
    pub async fn write(
        &self,
        event: &Event,
        reference: &BuildReference,
        license: &str,
        scans: &[ScanResult],
    ) -> Result<PathBuf, ProcessError> {
        let final_path = self.ensure_available(reference)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| self.unavailable(e))?;

        let staging = self.root.join(format!(
            "{STAGING_PREFIX}{}-{}",
            reference.bundle_key(),
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir(&staging)
            .await
            .map_err(|e| self.unavailable(e))?;

        let committed = match fill_bundle(&staging, event, license, scans).await {
            Ok(()) => commit(&staging, &final_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = committed {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                warn!(
                    path = %staging.display(),
                    error = %cleanup,
                    "failed to remove staging bundle"
                );
            }
            return Err(e);
        }

        info!(path = %final_path.display(), reports = scans.len(), "result bundle written");
        Ok(final_path)
    }

    fn unavailable(&self, e: std::io::Error) -> ProcessError {
        ProcessError::StorageUnavailable {
            path: self.root.display().to_string(),
            reason: e.to_string(),
        }
    }
}

async fn fill_bundle(
    dir: &Path,
    event: &Event,
    license: &str,
    scans: &[ScanResult],
) -> Result<(), ProcessError> {
    let message = serde_json::to_vec_pretty(event)
        .map_err(|e| ProcessError::io(dir.join(MESSAGE_FILE), std::io::Error::other(e)))?;
    write_file(&dir.join(MESSAGE_FILE), &message).await?;

    write_file(&dir.join(LICENSE_FILE), format!("{license}\n").as_bytes()).await?;

    let mut index = Vec::with_capacity(scans.len());
    for (i, scan) in scans.iter().enumerate() {
        let report = report_file_name(i);
        write_file(&dir.join(&report), scan.stdout.as_bytes()).await?;
        index.push(ScanIndexEntry {
            index: i,
            archive: &scan.archive_name,
            exit_status: scan.exit_status,
            report,
            stderr: &scan.stderr,
        });
    }

    let index = serde_json::to_vec_pretty(&index)
        .map_err(|e| ProcessError::io(dir.join(SCAN_INDEX_FILE), std::io::Error::other(e)))?;
    write_file(&dir.join(SCAN_INDEX_FILE), &index).await
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), ProcessError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| ProcessError::io(path, e))?;
    debug!(path = %path.display(), "created");
    Ok(())
}

/// 스테이징 디렉토리를 최종 이름으로 옮깁니다.
///
/// 기록된 번들은 비어 있지 않으므로 경쟁하는 두 번째 rename은
/// `DirectoryNotEmpty`로 실패합니다.
async fn commit(staging: &Path, final_path: &Path) -> Result<(), ProcessError> {
    if tokio::fs::try_exists(final_path).await.unwrap_or(false) {
        return Err(already_exists(final_path));
    }

    match tokio::fs::rename(staging, final_path).await {
        Ok(()) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty
            ) =>
        {
            Err(already_exists(final_path))
        }
        Err(e) => Err(ProcessError::io(final_path, e)),
    }
}

fn already_exists(path: &Path) -> ProcessError {
    ProcessError::BundleAlreadyExists {
        path: path.display().to_string(),
    }
}
