//! spec 파일에서 선언된 라이선스 읽기
//!
//! 메인 패키지의 `License:` 태그 하나만 읽습니다. RPM 매크로 전체를
//! 구현하지 않으며 `%global`/`%define`, 프리앰블 태그(`Name`, `Version`,
//! `Release`)에서 온 단순 매크로만 치환합니다.

use std::collections::HashMap;
use std::path::Path;

use crate::error::ProcessError;

/// spec 파일 확장자
pub const SPEC_SUFFIX: &str = ".spec";

/// 매크로 재귀 확장 한도
const MAX_EXPANSION_DEPTH: usize = 16;

/// 체크아웃에서 선언된 라이선스를 읽는 판독기
pub trait LicenseReader: Send + Sync + 'static {
    /// `<checkout>/<package>.spec`의 라이선스 표현식을 반환합니다.
    ///
    /// # Errors
    ///
    /// - `ProcessError::SpecNotFound`: spec 파일 없음
    /// - `ProcessError::MalformedSpec`: `License:` 태그 없음
    fn license_of(&self, checkout: &Path, package: &str) -> Result<String, ProcessError>;
}

/// 파일 시스템의 spec 파일을 읽는 기본 판독기
#[derive(Debug, Clone, Default)]
pub struct SpecFileReader;

impl SpecFileReader {
    pub fn new() -> Self {
        Self
    }

    /// spec 본문에서 메인 패키지의 라이선스를 찾습니다.
    pub fn parse_license(contents: &str) -> Option<String> {
        let mut macros: HashMap<String, String> = HashMap::new();

        for raw in contents.lines() {
            let line = raw.trim();

            if is_section_start(line) {
                break;
            }

            if let Some(rest) = line
                .strip_prefix("%global")
                .or_else(|| line.strip_prefix("%define"))
            {
                let mut parts = rest.trim().splitn(2, char::is_whitespace);
                if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                    let value = expand(value.trim(), &macros, 0);
                    macros.insert(name.to_owned(), value);
                }
                continue;
            }

            let Some((tag, value)) = line.split_once(':') else {
                continue;
            };
            let tag = tag.trim();
            let value = value.trim();

            if tag.eq_ignore_ascii_case("license") {
                let license = expand(value, &macros, 0);
                let license = license.trim();
                return (!license.is_empty()).then(|| license.to_owned());
            }

            for preamble in ["name", "version", "release"] {
                if tag.eq_ignore_ascii_case(preamble) {
                    let value = expand(value, &macros, 0);
                    macros.insert(preamble.to_owned(), value);
                }
            }
        }

        None
    }
}

impl LicenseReader for SpecFileReader {
    fn license_of(&self, checkout: &Path, package: &str) -> Result<String, ProcessError> {
        let path = checkout.join(format!("{package}{SPEC_SUFFIX}"));

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcessError::SpecNotFound {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(ProcessError::io(&path, e)),
        };

        let contents = String::from_utf8_lossy(&bytes);
        Self::parse_license(&contents).ok_or_else(|| ProcessError::MalformedSpec {
            path: path.display().to_string(),
            reason: "no License: tag in the main package preamble".to_owned(),
        })
    }
}

/// 프리앰블을 끝내는 섹션 지시어
const SECTIONS: &[&str] = &[
    "%package",
    "%description",
    "%prep",
    "%build",
    "%install",
    "%check",
    "%files",
    "%changelog",
];

fn is_section_start(line: &str) -> bool {
    SECTIONS.iter().any(|section| {
        line.strip_prefix(section)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
    })
}

/// `%{name}`, `%{?name}`, `%{?name:text}`, `%name`, `%%`를 치환합니다.
///
/// 정의되지 않은 일반 매크로는 그대로 남깁니다.
fn expand(input: &str, macros: &HashMap<String, String>, depth: usize) -> String {
    if depth >= MAX_EXPANSION_DEPTH || !input.contains('%') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('%') {
            out.push('%');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let Some(end) = matching_brace(body) else {
                out.push_str(&rest[pos..]);
                return out;
            };
            out.push_str(&expand_braced(&body[..end], macros, depth));
            rest = &body[end + 1..];
        } else {
            let name_len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..name_len];
            match macros.get(name) {
                Some(value) if !name.is_empty() => {
                    out.push_str(&expand(value, macros, depth + 1));
                }
                _ => {
                    out.push('%');
                    out.push_str(name);
                }
            }
            rest = &after[name_len..];
        }
    }

    out.push_str(rest);
    out
}

fn expand_braced(inner: &str, macros: &HashMap<String, String>, depth: usize) -> String {
    if let Some(cond) = inner.strip_prefix('?') {
        let (name, alt) = match cond.split_once(':') {
            Some((name, alt)) => (name, Some(alt)),
            None => (cond, None),
        };
        return match (macros.get(name), alt) {
            (Some(_), Some(alt)) => expand(alt, macros, depth + 1),
            (Some(value), None) => expand(value, macros, depth + 1),
            (None, _) => String::new(),
        };
    }

    if let Some(cond) = inner.strip_prefix("!?") {
        let (name, alt) = cond.split_once(':').unwrap_or((cond, ""));
        return if macros.contains_key(name) {
            String::new()
        } else {
            expand(alt, macros, depth + 1)
        };
    }

    match macros.get(inner) {
        Some(value) => expand(value, macros, depth + 1),
        None => format!("%{{{inner}}}"),
    }
}

/// 여는 `{` 다음부터 짝이 맞는 `}`의 위치
fn matching_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}
