//! 빌드 참조 해석 — 이벤트 본문을 [`BuildReference`]로 변환
//!
//! 순수 파싱 단계이며 I/O를 수행하지 않습니다.
//! 본문은 이름이 있는 선택적 필드를 가진 [`BuildStateBody`]로 역직렬화한 뒤
//! 한 곳에서 검증하므로, 잘못된 페이로드는 항상
//! [`ProcessError::MalformedEvent`] 하나로 실패합니다.
//!
//! # 소스 URL 형식
//!
//! ```text
//! git+https://src.fedoraproject.org/rpms/foo.git#0123abcd
//!     └──────────── clone URL ─────────────┘ └ commit ┘
//! ```

use std::fmt;

use serde::Deserialize;

use licensecheck_core::event::Event;

use crate::error::ProcessError;

/// 소스 URL의 VCS 표식
const GIT_MARKER: &str = "git+";

/// Koji 빌드 상태 변경 메시지 본문 중 파이프라인이 사용하는 필드
#[derive(Debug, Default, Deserialize)]
pub struct BuildStateBody {
    /// 빌드 요청 목록: 첫 원소가 소스 URL
    #[serde(default)]
    pub request: Option<Vec<serde_json::Value>>,
    /// 패키지 이름
    #[serde(default)]
    pub name: Option<String>,
    /// 빌드 ID
    #[serde(default)]
    pub build_id: Option<u64>,
    /// 빌드 태스크 정보
    #[serde(default)]
    pub task: Option<TaskInfo>,
}

/// 빌드 태스크 정보
#[derive(Debug, Default, Deserialize)]
pub struct TaskInfo {
    /// 태스크 아키텍처 (예: `x86_64`, `noarch`)
    #[serde(default)]
    pub arch: Option<String>,
}

/// 빌드 하나를 만든 정확한 소스 스냅샷의 식별 정보
///
/// 이벤트 하나에서 결정적으로 만들어지며 생성 후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReference {
    /// 패키지 이름
    pub package_name: String,
    /// 이벤트에 기록된 clone URL
    pub repo_location: String,
    /// 호스트 접두어와 `.git`을 뗀 저장소 이름 (예: `rpms/foo`)
    pub repo_name: String,
    /// 체크아웃할 커밋
    pub commit: String,
    /// 빌드 ID
    pub build_id: u64,
    /// 태스크 아키텍처
    pub task_arch: String,
    /// 원본 이벤트 ID
    pub event_id: String,
}

impl BuildReference {
    /// 결과 번들 디렉토리 이름: `<event_id>-<build_id>-<arch>`
    pub fn bundle_key(&self) -> String {
        format!("{}-{}-{}", self.event_id, self.build_id, self.task_arch)
    }
}

impl fmt::Display for BuildReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}@{}) build={} arch={}",
            self.package_name, self.repo_name, self.commit, self.build_id, self.task_arch
        )
    }
}

/// 이벤트를 빌드 참조로 변환하는 해석기
#[derive(Debug, Clone)]
pub struct BuildReferenceResolver {
    base_url: String,
}

impl BuildReferenceResolver {
    /// `base_url`은 clone URL에서 제거할 호스트 접두어입니다
    /// (예: `https://src.fedoraproject.org/`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// 이벤트를 해석합니다.
    ///
    /// # Errors
    ///
    /// 필수 필드가 없거나 소스 URL이 `git+<clone-url>#<commit>` 형식이 아니면
    /// `ProcessError::MalformedEvent`를 반환합니다.
    pub fn resolve(&self, event: &Event) -> Result<BuildReference, ProcessError> {
        require_path_safe("id", &event.id)?;

        let body: BuildStateBody = serde_json::from_value(event.body.clone())
            .map_err(|e| malformed(format!("invalid body: {e}")))?;

        let source_url = body
            .request
            .as_deref()
            .and_then(|request| request.first())
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| malformed("body.request[0] is missing or not a string"))?;

        let (clone_url, commit) = split_source_url(source_url)?;
        let repo_name = self.repo_name(clone_url)?;

        let package_name = body
            .name
            .ok_or_else(|| malformed("body.name is missing"))?;
        require_path_safe("body.name", &package_name)?;

        let build_id = body
            .build_id
            .ok_or_else(|| malformed("body.build_id is missing"))?;

        let task_arch = body
            .task
            .and_then(|task| task.arch)
            .ok_or_else(|| malformed("body.task.arch is missing"))?;
        require_path_safe("body.task.arch", &task_arch)?;

        Ok(BuildReference {
            package_name,
            repo_location: clone_url.to_owned(),
            repo_name,
            commit: commit.to_owned(),
            build_id,
            task_arch,
            event_id: event.id.clone(),
        })
    }

    fn repo_name(&self, clone_url: &str) -> Result<String, ProcessError> {
        let path = clone_url.strip_prefix(&self.base_url).ok_or_else(|| {
            malformed(format!(
                "clone url '{clone_url}' is not under '{}'",
                self.base_url
            ))
        })?;
        let path = path.trim_end_matches('/');
        let name = path.strip_suffix(".git").unwrap_or(path);

        if name.is_empty() || name.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(malformed(format!(
                "clone url '{clone_url}' has no usable repository name"
            )));
        }

        Ok(name.to_owned())
    }
}

/// `git+<clone-url>#<commit>`을 clone URL과 커밋으로 나눕니다.
fn split_source_url(url: &str) -> Result<(&str, &str), ProcessError> {
    let rest = url
        .strip_prefix(GIT_MARKER)
        .ok_or_else(|| malformed(format!("source url '{url}' does not start with '{GIT_MARKER}'")))?;

    let (clone_url, commit) = rest
        .split_once('#')
        .ok_or_else(|| malformed(format!("source url '{url}' has no '#<commit>'")))?;

    if clone_url.is_empty() {
        return Err(malformed(format!("source url '{url}' has an empty clone url")));
    }

    if commit.is_empty() || !commit.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(malformed(format!(
            "source url '{url}' has an invalid commit '{commit}'"
        )));
    }

    Ok((clone_url, commit))
}

/// 결과 번들 경로 요소로 쓰이는 값을 검증합니다.
fn require_path_safe(field: &str, value: &str) -> Result<(), ProcessError> {
    if value.is_empty() {
        return Err(malformed(format!("{field} is empty")));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(malformed(format!("{field} '{value}' is not a safe path component")));
    }
    Ok(())
}

fn malformed(reason: impl Into<String>) -> ProcessError {
    ProcessError::MalformedEvent {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOPIC: &str = "org.example.prod.buildsys.build.state.change";

    fn resolver() -> BuildReferenceResolver {
        BuildReferenceResolver::new("https://src.example.org/")
    }

    fn event_with_body(body: serde_json::Value) -> Event {
        Event::new("e1", TOPIC, body)
    }

    fn valid_body() -> serde_json::Value {
        json!({
            "request": [
                "git+https://src.example.org/rpms/hello.git#deadbeef",
                "f40-candidate",
                {}
            ],
            "name": "hello",
            "build_id": 100,
            "task": {"arch": "x86_64"},
            "new": 1
        })
    }

    #[test]
    fn resolves_repository_name_and_commit() {
        let event = event_with_body(json!({
            "request": ["git+https://src.example.org/rpms/foo#abc123"],
            "name": "foo",
            "build_id": 7,
            "task": {"arch": "noarch"}
        }));
        let reference = resolver().resolve(&event).unwrap();
        assert_eq!(reference.repo_name, "rpms/foo");
        assert_eq!(reference.commit, "abc123");
        assert_eq!(reference.repo_location, "https://src.example.org/rpms/foo");
    }

    #[test]
    fn strips_git_suffix() {
        let reference = resolver().resolve(&event_with_body(valid_body())).unwrap();
        assert_eq!(reference.repo_name, "rpms/hello");
        assert_eq!(reference.commit, "deadbeef");
        assert_eq!(reference.package_name, "hello");
        assert_eq!(reference.build_id, 100);
        assert_eq!(reference.task_arch, "x86_64");
        assert_eq!(reference.event_id, "e1");
    }

    #[test]
    fn resolve_is_deterministic() {
        let event = event_with_body(valid_body());
        let first = resolver().resolve(&event).unwrap();
        let second = resolver().resolve(&event).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bundle_key_joins_identity() {
        let reference = resolver().resolve(&event_with_body(valid_body())).unwrap();
        assert_eq!(reference.bundle_key(), "e1-100-x86_64");
    }

    #[test]
    fn missing_fields_are_malformed() {
        for field in ["request", "name", "build_id", "task"] {
            let mut body = valid_body();
            body.as_object_mut().unwrap().remove(field);
            let err = resolver().resolve(&event_with_body(body)).unwrap_err();
            assert!(
                matches!(err, ProcessError::MalformedEvent { .. }),
                "{field}: {err}"
            );
        }
    }

    #[test]
    fn empty_request_list_is_malformed() {
        let mut body = valid_body();
        body["request"] = json!([]);
        assert!(resolver().resolve(&event_with_body(body)).is_err());
    }

    #[test]
    fn non_numeric_build_id_is_malformed() {
        let mut body = valid_body();
        body["build_id"] = json!("one hundred");
        let err = resolver().resolve(&event_with_body(body)).unwrap_err();
        assert!(err.to_string().contains("invalid body"));
    }

    #[test]
    fn null_body_is_malformed() {
        let err = resolver()
            .resolve(&event_with_body(serde_json::Value::Null))
            .unwrap_err();
        assert!(matches!(err, ProcessError::MalformedEvent { .. }));
    }

    #[test]
    fn source_url_shape_is_enforced() {
        for url in [
            "https://src.example.org/rpms/foo#abc",
            "git+https://src.example.org/rpms/foo",
            "git+https://src.example.org/rpms/foo#",
            "git+#abc",
            "git+https://src.example.org/rpms/foo#abc;rm -rf",
            "git+https://elsewhere.org/rpms/foo#abc",
            "git+https://src.example.org/#abc",
            "git+https://src.example.org/rpms/../foo#abc",
        ] {
            let mut body = valid_body();
            body["request"] = json!([url]);
            assert!(resolver().resolve(&event_with_body(body)).is_err(), "{url}");
        }
    }

    #[test]
    fn path_components_are_validated() {
        let mut body = valid_body();
        body["task"]["arch"] = json!("../x86_64");
        assert!(resolver().resolve(&event_with_body(body)).is_err());

        let mut body = valid_body();
        body["name"] = json!("a/b");
        assert!(resolver().resolve(&event_with_body(body)).is_err());

        let event = Event::new("..", TOPIC, valid_body());
        assert!(resolver().resolve(&event).is_err());
    }

    #[test]
    fn display_is_readable() {
        let reference = resolver().resolve(&event_with_body(valid_body())).unwrap();
        let s = reference.to_string();
        assert!(s.contains("rpms/hello@deadbeef"));
        assert!(s.contains("build=100"));
    }
}
