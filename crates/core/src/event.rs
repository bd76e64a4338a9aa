//! 버스 이벤트 — 메시지 버스에서 수신한 단일 알림
//!
//! [`Event`]는 외부 버스 클라이언트가 생성하며, 수신 후에는 변경되지 않습니다.
//! `body`는 원본 구조를 그대로 보존하여 결과 번들의 `message.json`에
//! 손실 없이 기록될 수 있도록 [`serde_json::Value`]로 유지합니다.
//! 필드 단위 검증은 파이프라인의 빌드 참조 해석 단계에서 수행합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// 한 줄 메시지의 최대 크기 (바이트)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// 메시지 버스 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 버스가 부여한 메시지 ID
    pub id: String,
    /// 메시지 토픽 (예: `org.fedoraproject.prod.buildsys.build.state.change`)
    pub topic: String,
    /// 메시지 본문
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Event {
    /// 새 이벤트를 생성합니다.
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            body,
        }
    }

    /// JSON 한 줄을 이벤트로 디코딩합니다.
    ///
    /// `line`은 에러 메시지에 표시할 입력 줄 번호입니다 (1부터 시작).
    pub fn from_json_line(raw: &str, line: usize) -> Result<Self, ParseError> {
        if raw.len() > MAX_MESSAGE_SIZE {
            return Err(ParseError::TooLarge {
                size: raw.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        serde_json::from_str(raw).map_err(|e| ParseError::InvalidMessage {
            line,
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event[{}] topic={}", self.id, self.topic)
    }
}
