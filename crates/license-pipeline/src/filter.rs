//! 이벤트 필터 — 어떤 버스 이벤트가 "빌드 완료"인지 결정하는 유일한 위치

use licensecheck_core::event::Event;

/// Koji 빌드 상태 값
///
/// `body.new`에 담겨 오는 정수 값입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Building,
    Complete,
    Deleted,
    Failed,
    Canceled,
}

impl BuildState {
    /// Koji 정수 코드를 상태로 변환합니다.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Building),
            1 => Some(Self::Complete),
            2 => Some(Self::Deleted),
            3 => Some(Self::Failed),
            4 => Some(Self::Canceled),
            _ => None,
        }
    }

    /// 빌드가 끝난 상태인지 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Canceled)
    }
}

/// 토픽(및 선택적으로 빌드 상태) 기반 이벤트 필터
///
/// 부수 효과가 없습니다.
#[derive(Debug, Clone)]
pub struct EventFilter {
    topic: String,
    only_terminal_states: bool,
}

impl EventFilter {
    /// 토픽만 검사하는 필터를 생성합니다.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            only_terminal_states: false,
        }
    }

    /// 종료 상태 빌드만 통과시키도록 설정합니다.
    pub fn only_terminal_states(mut self, only: bool) -> Self {
        self.only_terminal_states = only;
        self
    }

    /// 처리 대상 토픽
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 이벤트가 처리 대상인지 판단합니다.
    pub fn accepts(&self, event: &Event) -> bool {
        if event.topic != self.topic {
            return false;
        }

        if !self.only_terminal_states {
            return true;
        }

        event
            .body
            .get("new")
            .and_then(serde_json::Value::as_u64)
            .and_then(BuildState::from_code)
            .is_some_and(|state| state.is_terminal())
    }
}
