//! 파이프라인 드라이버 — 이벤트 하나를 필터부터 번들 기록까지 순서대로 처리
//!
//! [`PipelineDriver::process`]는 에러를 전파하지 않습니다. 단계별 에러는 이 경계에서
//! 이벤트 ID와 함께 로그로 남기고 [`Outcome`]으로 변환합니다.
//! 컨슈머 전체를 멈춰야 하는 환경 에러는 [`Outcome::Failed`]의 `fatal`로 구분됩니다.
//!
//! 모든 로그는 `event_id` 필드를 가진 `process` span 안에서 기록되므로,
//! 어떤 구독자를 설치하느냐(데몬의 JSON 출력, 테스트의 캡처 writer)로
//! 로그 출력을 바꿀 수 있습니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, debug, error, info, info_span, warn};

use licensecheck_core::event::Event;
use licensecheck_core::metrics as m;

use crate::archive::ArchiveScanner;
use crate::command::{CommandRunner, TokioCommandRunner, resolve_program};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, ProcessError};
use crate::fetcher::{Checkout, DistGitFetcher, SourceFetcher};
use crate::filter::EventFilter;
use crate::reference::{BuildReference, BuildReferenceResolver};
use crate::spec::{LicenseReader, SpecFileReader};
use crate::writer::{ABANDONED_STAGING_AGE, ResultWriter};

/// 이벤트 하나의 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 필터에서 제외됨
    Ignored,
    /// 번들이 기록됨
    Written(PathBuf),
    /// 처리 실패: 번들 없음
    Failed {
        kind: ErrorKind,
        /// 컨슈머를 멈춰야 하는 에러인지 여부
        fatal: bool,
    },
}

impl Outcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed { fatal: true, .. })
    }

    /// 메트릭 레이블 값
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Written(_) => "written",
            Self::Failed { .. } => "failed",
        }
    }
}

/// 진행 중 실행 게이지 가드
///
/// `process` future가 중간에 drop되어도 게이지가 되돌아갑니다.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        metrics::gauge!(m::RUNS_IN_FLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::gauge!(m::RUNS_IN_FLIGHT).decrement(1.0);
    }
}

/// 운영 환경 구성: `git` + lookaside, tokio 프로세스, spec 파일 판독기
pub type DefaultDriver =
    PipelineDriver<DistGitFetcher<TokioCommandRunner>, TokioCommandRunner, SpecFileReader>;

/// 파이프라인 드라이버
///
/// 실행 간 공유 가변 상태가 없으므로 `Arc`로 감싸 여러 작업에서 동시에
/// [`process`](Self::process)를 호출할 수 있습니다.
pub struct PipelineDriver<F, R, L>
where
    F: SourceFetcher,
    R: CommandRunner,
    L: LicenseReader,
{
    config: PipelineConfig,
    filter: EventFilter,
    resolver: BuildReferenceResolver,
    fetcher: F,
    scanner: ArchiveScanner<R>,
    reader: L,
    writer: ResultWriter,
}

impl DefaultDriver {
    /// 설정에서 운영용 드라이버를 만듭니다.
    ///
    /// # Errors
    ///
    /// 설정 검증 실패 또는 HTTP 클라이언트 생성 실패 시 `ProcessError::Config`
    pub fn from_config(config: PipelineConfig) -> Result<Self, ProcessError> {
        config.validate()?;
        let runner = Arc::new(TokioCommandRunner::new());
        let fetcher = DistGitFetcher::new(&config, Arc::clone(&runner))?;
        Ok(Self::new(config, fetcher, runner, SpecFileReader::new()))
    }
}

impl<F, R, L> PipelineDriver<F, R, L>
where
    F: SourceFetcher,
    R: CommandRunner,
    L: LicenseReader,
{
    /// 협력 객체를 주입해 드라이버를 만듭니다.
    pub fn new(config: PipelineConfig, fetcher: F, runner: Arc<R>, reader: L) -> Self {
        Self {
            filter: EventFilter::new(config.topic.clone())
                .only_terminal_states(config.only_terminal_states),
            resolver: BuildReferenceResolver::new(config.dist_git_base_url.clone()),
            scanner: ArchiveScanner::new(&config, runner),
            writer: ResultWriter::new(config.result_dir.clone()),
            config,
            fetcher,
            reader,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 소스 수집기
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// 결과 기록기
    pub fn writer(&self) -> &ResultWriter {
        &self.writer
    }

    /// 컨슈머 시작 전 환경을 점검합니다.
    ///
    /// 중단된 실행의 스테이징 디렉토리를 정리하고, 결과 저장소에 쓸 수 있는지와
    /// 스캐너 실행 파일이 있는지 확인합니다. 정리한 스테이징 디렉토리 수를 반환합니다.
    ///
    /// # Errors
    ///
    /// - `ProcessError::StorageUnavailable`
    /// - `ProcessError::ScanToolMissing`
    pub fn preflight(&self) -> Result<usize, ProcessError> {
        self.writer.check_writable()?;
        let swept = self.writer.sweep_staging(ABANDONED_STAGING_AGE)?;

        let program = self.scanner.program();
        let resolved = resolve_program(program).ok_or_else(|| ProcessError::ScanToolMissing {
            program: program.to_owned(),
            reason: "not found on PATH or not executable".to_owned(),
        })?;

        info!(
            result_dir = %self.writer.root().display(),
            scanner = %resolved.display(),
            swept,
            "preflight checks passed"
        );
        Ok(swept)
    }

    /// 이벤트 하나를 처리합니다.
    pub async fn process(&self, event: &Event) -> Outcome {
        let span = info_span!("process", event_id = %event.id);
        self.process_in_span(event).instrument(span).await
    }

    async fn process_in_span(&self, event: &Event) -> Outcome {
        metrics::counter!(m::EVENTS_RECEIVED_TOTAL).increment(1);

        if !self.filter.accepts(event) {
            debug!(topic = %event.topic, "event ignored");
            metrics::counter!(m::EVENTS_IGNORED_TOTAL).increment(1);
            return Outcome::Ignored;
        }

        info!(event_id = %event.id, "recognized build state change");

        let started = Instant::now();
        let in_flight = InFlight::enter();
        let result = self.run(event).await;
        drop(in_flight);

        let outcome = match result {
            Ok(path) => {
                metrics::counter!(m::BUNDLES_WRITTEN_TOTAL).increment(1);
                info!(event_id = %event.id, path = %path.display(), "finished processing");
                Outcome::Written(path)
            }
            Err(e) => self.fail(event, e),
        };

        metrics::histogram!(m::RUN_DURATION_SECONDS, m::LABEL_RESULT => outcome.label())
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    async fn run(&self, event: &Event) -> Result<PathBuf, ProcessError> {
        let reference = self.resolver.resolve(event)?;
        debug!(reference = %reference, "resolved build reference");

        self.writer.ensure_available(&reference)?;

        let checkout = self.fetch_with_retry(&reference).await?;

        let license = self
            .reader
            .license_of(checkout.path(), &reference.package_name)?;
        debug!(license = %license, "declared license");

        let scans = self.scanner.scan(checkout.path()).await?;

        let path = self
            .writer
            .write(event, &reference, &license, &scans)
            .await?;

        if let Err(e) = checkout.close() {
            warn!(error = %e, "failed to remove checkout");
        }

        Ok(path)
    }

    /// 일시적 실패는 지수 백오프로 최대 `fetch_retries`회까지 시도합니다.
    async fn fetch_with_retry(&self, reference: &BuildReference) -> Result<Checkout, ProcessError> {
        let attempts = self.config.fetch_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.fetcher.fetch(reference).await {
                Ok(checkout) => return Ok(checkout),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let backoff = self
                        .config
                        .retry_backoff()
                        .saturating_mul(1 << (attempt - 1).min(16));
                    warn!(
                        attempt,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "source fetch failed, retrying"
                    );
                    metrics::counter!(m::FETCH_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&self, event: &Event, e: ProcessError) -> Outcome {
        let kind = e.kind();
        let fatal = e.is_fatal();

        metrics::counter!(m::EVENTS_FAILED_TOTAL, m::LABEL_KIND => kind.as_str()).increment(1);

        if fatal {
            error!(event_id = %event.id, kind = %kind, error = %e, "environment failure, consumer must stop");
        } else if kind == ErrorKind::BundleAlreadyExists {
            warn!(event_id = %event.id, kind = %kind, error = %e, "duplicate delivery, event skipped");
        } else {
            error!(event_id = %event.id, kind = %kind, error = %e, "event not processed");
        }

        Outcome::Failed { kind, fatal }
    }
}
