//! dist-git lookaside 캐시
//!
//! 저장소의 `sources` 파일에 나열된 대용량 소스 아카이브를 내려받아
//! 체크아웃 루트에 배치합니다.
//!
//! # `sources` 파일 형식
//!
//! ```text
//! SHA512 (hello-2.12.tar.gz) = 7c0e...   # 현재 형식
//! 5f2a...  hello-2.10.tar.gz             # 구형 md5 형식
//! ```
//!
//! 다운로드 URL은 `<base>/<repo>/<file>/<hashtype>/<hash>/<file>`입니다.
//! 구형 md5 항목은 `<base>/<repo>/<file>/<hash>/<file>`을 사용합니다.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// 저장소 내 lookaside 목록 파일 이름
pub const SOURCES_FILE: &str = "sources";

/// lookaside HTTP 요청에 사용하는 User-Agent
const USER_AGENT: &str = concat!("licensecheck/", env!("CARGO_PKG_VERSION"));

/// 체크섬 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Sha512,
    Sha256,
    /// 검증하지 않는 구형 항목
    Md5,
}

impl HashType {
    fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "SHA512" => Some(Self::Sha512),
            "SHA256" => Some(Self::Sha256),
            "MD5" => Some(Self::Md5),
            _ => None,
        }
    }

    /// URL 경로에 쓰이는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Self::Sha512 => 128,
            Self::Sha256 => 64,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `sources` 파일의 한 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// 파일 이름 (경로 구분자 없음)
    pub file: String,
    pub hash_type: HashType,
    /// 소문자 16진수 다이제스트
    pub hash: String,
    /// 구형 한 줄 형식에서 읽은 항목인지 여부
    pub legacy: bool,
}

/// lookaside 에러
#[derive(Debug, thiserror::Error)]
pub enum LookasideError {
    /// `sources` 파일 파싱 실패
    #[error("sources line {line}: {reason}")]
    InvalidSources { line: usize, reason: String },

    /// HTTP 요청 실패
    #[error("GET {url}: {reason}")]
    Http { url: String, reason: String },

    /// 체크섬 불일치
    #[error("{file}: {hash_type} mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch {
        file: String,
        hash_type: HashType,
        expected: String,
        actual: String,
    },

    /// 로컬 파일 I/O 실패
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// `sources` 파일 내용을 파싱합니다.
///
/// 빈 줄과 `#` 주석은 무시합니다.
pub fn parse_sources(contents: &str) -> Result<Vec<SourceEntry>, LookasideError> {
    let mut entries = Vec::new();

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = |reason: &str| LookasideError::InvalidSources {
            line: idx + 1,
            reason: reason.to_owned(),
        };

        let entry = if let Some((head, hash)) = line.split_once(") = ") {
            let (tag, file) = head
                .split_once(" (")
                .ok_or_else(|| invalid("expected 'HASH (file) = digest'"))?;
            let hash_type = HashType::parse(tag).ok_or_else(|| invalid("unknown hash type"))?;
            SourceEntry {
                file: file.to_owned(),
                hash_type,
                hash: hash.trim().to_ascii_lowercase(),
                legacy: false,
            }
        } else {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(hash), Some(file), None) => SourceEntry {
                    file: file.to_owned(),
                    hash_type: HashType::Md5,
                    hash: hash.to_ascii_lowercase(),
                    legacy: true,
                },
                _ => return Err(invalid("unrecognized line")),
            }
        };

        if entry.hash.len() != entry.hash_type.hex_len()
            || !entry.hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(invalid("digest has the wrong length or is not hex"));
        }

        if entry.file.is_empty()
            || entry.file == "."
            || entry.file == ".."
            || entry.file.contains(['/', '\\', '\0'])
        {
            return Err(invalid("file name must be a plain file name"));
        }

        entries.push(entry);
    }

    Ok(entries)
}

/// lookaside 캐시 HTTP 클라이언트
#[derive(Debug, Clone)]
pub struct LookasideClient {
    client: reqwest::Client,
    base_url: String,
}

impl LookasideClient {
    /// 새 클라이언트를 생성합니다.
    ///
    /// # Errors
    ///
    /// TLS 백엔드 초기화 실패 시 `LookasideError::Http`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LookasideError> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LookasideError::Http {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// 항목의 다운로드 URL
    pub fn url_for(&self, repo: &str, entry: &SourceEntry) -> String {
        if entry.legacy {
            format!(
                "{}/{repo}/{file}/{hash}/{file}",
                self.base_url,
                file = entry.file,
                hash = entry.hash
            )
        } else {
            format!(
                "{}/{repo}/{file}/{ty}/{hash}/{file}",
                self.base_url,
                file = entry.file,
                ty = entry.hash_type,
                hash = entry.hash
            )
        }
    }

    /// 항목 하나를 `dest_dir/<file>`로 내려받고 체크섬을 검증합니다.
    ///
    /// 검증 실패 시 내려받은 파일은 삭제됩니다.
    pub async fn download(
        &self,
        repo: &str,
        entry: &SourceEntry,
        dest_dir: &Path,
    ) -> Result<PathBuf, LookasideError> {
        let url = self.url_for(repo, entry);
        let dest = dest_dir.join(&entry.file);
        let partial = dest_dir.join(format!(".{}.part", entry.file));

        debug!(url = %url, file = %entry.file, "downloading lookaside source");

        let http_err = |reason: String| LookasideError::Http {
            url: url.clone(),
            reason,
        };

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| http_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(http_err(format!("status {}", response.status())));
        }

        let io_err = |path: &Path, source: std::io::Error| LookasideError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| io_err(&partial, e))?;
        let mut hasher = StreamHasher::new(entry.hash_type);

        while let Some(chunk) = response.chunk().await.map_err(|e| http_err(e.to_string()))? {
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| io_err(&partial, e))?;
        }
        file.flush().await.map_err(|e| io_err(&partial, e))?;
        drop(file);

        match hasher.finish() {
            Some(actual) if actual != entry.hash => {
                // 실패 경로의 삭제 에러는 체크섬 에러보다 덜 중요
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(LookasideError::ChecksumMismatch {
                    file: entry.file.clone(),
                    hash_type: entry.hash_type,
                    expected: entry.hash.clone(),
                    actual,
                });
            }
            Some(_) => {}
            None => warn!(
                file = %entry.file,
                "legacy md5 lookaside entry downloaded without verification"
            ),
        }

        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| io_err(&dest, e))?;

        Ok(dest)
    }
}

/// 스트리밍 다이제스트 계산기
enum StreamHasher {
    Sha512(Sha512),
    Sha256(Sha256),
    Unverified,
}

impl StreamHasher {
    fn new(hash_type: HashType) -> Self {
        match hash_type {
            HashType::Sha512 => Self::Sha512(Sha512::new()),
            HashType::Sha256 => Self::Sha256(Sha256::new()),
            HashType::Md5 => Self::Unverified,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha512(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Unverified => {}
        }
    }

    /// 소문자 16진수 다이제스트: 검증하지 않는 알고리즘이면 `None`
    fn finish(self) -> Option<String> {
        match self {
            Self::Sha512(h) => Some(format!("{:x}", h.finalize())),
            Self::Sha256(h) => Some(format!("{:x}", h.finalize())),
            Self::Unverified => None,
        }
    }
}
