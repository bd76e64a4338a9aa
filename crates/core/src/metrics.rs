//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `licensecheck_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(licensecheck_core::metrics::EVENTS_RECEIVED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 실패 종류 레이블 키 (malformed_event, source_unavailable, ...)
pub const LABEL_KIND: &str = "kind";

/// 결과 레이블 키 (written, ignored, failed)
pub const LABEL_RESULT: &str = "result";

// ─── 파이프라인 메트릭 ─────────────────────────────────────────────

/// 수신한 전체 이벤트 수 (counter)
pub const EVENTS_RECEIVED_TOTAL: &str = "licensecheck_events_received_total";

/// 토픽/상태 필터로 무시된 이벤트 수 (counter)
pub const EVENTS_IGNORED_TOTAL: &str = "licensecheck_events_ignored_total";

/// 처리에 실패한 이벤트 수 (counter, label: kind)
pub const EVENTS_FAILED_TOTAL: &str = "licensecheck_events_failed_total";

/// 기록된 결과 번들 수 (counter)
pub const BUNDLES_WRITTEN_TOTAL: &str = "licensecheck_bundles_written_total";

/// 스캔한 소스 아카이브 수 (counter)
pub const ARCHIVES_SCANNED_TOTAL: &str = "licensecheck_archives_scanned_total";

/// 소스 가져오기 재시도 수 (counter)
pub const FETCH_RETRIES_TOTAL: &str = "licensecheck_fetch_retries_total";

/// 이벤트 하나의 처리 시간 (histogram, 초, label: result)
pub const RUN_DURATION_SECONDS: &str = "licensecheck_run_duration_seconds";

/// 현재 처리 중인 이벤트 수 (gauge)
pub const RUNS_IN_FLIGHT: &str = "licensecheck_runs_in_flight";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 처리 시간 히스토그램 버킷 (초)
///
/// clone + lookaside 다운로드 + 스캔을 포함하므로 1s ~ 30m 범위
pub const RUN_DURATION_BUCKETS: [f64; 9] =
    [1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 1800.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        EVENTS_RECEIVED_TOTAL,
        "Total number of bus events handed to the pipeline"
    );
    describe_counter!(
        EVENTS_IGNORED_TOTAL,
        "Events skipped because of topic or build state"
    );
    describe_counter!(
        EVENTS_FAILED_TOTAL,
        "Events whose processing failed, by error kind"
    );
    describe_counter!(
        BUNDLES_WRITTEN_TOTAL,
        "Result bundles committed to the storage root"
    );
    describe_counter!(
        ARCHIVES_SCANNED_TOTAL,
        "Source archives handed to the license scanner"
    );
    describe_counter!(
        FETCH_RETRIES_TOTAL,
        "Source checkout attempts retried after a transient failure"
    );
    describe_histogram!(
        RUN_DURATION_SECONDS,
        "Wall-clock time to process a single event in seconds"
    );
    describe_gauge!(RUNS_IN_FLIGHT, "Number of events currently being processed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            EVENTS_RECEIVED_TOTAL,
            EVENTS_IGNORED_TOTAL,
            EVENTS_FAILED_TOTAL,
            BUNDLES_WRITTEN_TOTAL,
            ARCHIVES_SCANNED_TOTAL,
            FETCH_RETRIES_TOTAL,
            RUN_DURATION_SECONDS,
            RUNS_IN_FLIGHT,
        ] {
            assert!(name.starts_with("licensecheck_"), "{name}");
        }
    }

    #[test]
    fn buckets_are_sorted() {
        assert!(RUN_DURATION_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn describe_all_without_recorder_is_noop() {
        describe_all();
    }
}
