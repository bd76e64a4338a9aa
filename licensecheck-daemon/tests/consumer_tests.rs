//! Consumer integration tests.
//!
//! Drives the bounded worker pool with in-memory JSON-lines input and
//! fake collaborators in place of git, lookaside and the scanner.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use licensecheck_daemon::consumer::{Consumer, ConsumerReport, EventSource};
use licensecheck_pipeline::{
    BuildReference, Checkout, CommandError, CommandOutput, CommandRequest, CommandRunner,
    PipelineConfigBuilder, PipelineDriver, ProcessError, SourceFetcher, SpecFileReader,
};

const TOPIC: &str = "org.fedoraproject.prod.buildsys.build.state.change";

/// Writes a spec file (no archives) and tracks how many fetches overlap.
struct SpecOnlyFetcher {
    work_dir: PathBuf,
    delay: Duration,
    /// Events whose fetch fails with a storage error
    fatal_for: Option<&'static str>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl SpecOnlyFetcher {
    fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            delay: Duration::ZERO,
            fatal_for: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl SourceFetcher for SpecOnlyFetcher {
    async fn fetch(&self, reference: &BuildReference) -> Result<Checkout, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal_for == Some(reference.event_id.as_str()) {
            return Err(ProcessError::StorageUnavailable {
                path: self.work_dir.display().to_string(),
                reason: "No space left on device".to_owned(),
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let checkout = Checkout::create(Some(&self.work_dir)).unwrap();
        std::fs::write(
            checkout
                .path()
                .join(format!("{}.spec", reference.package_name)),
            "Name: hello\nLicense: MIT\n",
        )
        .unwrap();
        Ok(checkout)
    }
}

/// Never invoked: checkouts contain no archives.
struct UnusedRunner;

impl CommandRunner for UnusedRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        panic!("scanner should not run: {:?}", request.program);
    }
}

struct Setup {
    _root: tempfile::TempDir,
    results: PathBuf,
    driver: Arc<PipelineDriver<SpecOnlyFetcher, UnusedRunner, SpecFileReader>>,
}

fn setup(configure: impl FnOnce(&mut SpecOnlyFetcher)) -> Setup {
    let root = tempfile::tempdir().unwrap();
    let results = root.path().join("results");
    let work = root.path().join("work");
    std::fs::create_dir_all(&work).unwrap();

    let config = PipelineConfigBuilder::new()
        .dist_git_base_url("https://src.example.org/")
        .result_dir(&results)
        .work_dir(&work)
        .retries(1, 1)
        .build()
        .unwrap();

    let mut fetcher = SpecOnlyFetcher::new(&work);
    configure(&mut fetcher);
    let driver = PipelineDriver::new(config, fetcher, Arc::new(UnusedRunner), SpecFileReader::new());

    Setup {
        _root: root,
        results,
        driver: Arc::new(driver),
    }
}

fn message_line(id: &str, build_id: u64) -> String {
    let message = json!({
        "id": id,
        "topic": TOPIC,
        "body": {
            "request": ["git+https://src.example.org/rpms/hello#deadbeef", "f40", {}],
            "name": "hello",
            "build_id": build_id,
            "task": {"arch": "noarch"},
            "new": 1
        }
    });
    format!("{}\n", message)
}

async fn consume(setup: &Setup, input: &str, max_concurrent: usize) -> ConsumerReport {
    let consumer = Consumer::new(
        Arc::clone(&setup.driver),
        max_concurrent,
        CancellationToken::new(),
    );
    consumer
        .run(EventSource::new(input.as_bytes()))
        .await
        .expect("consumer should finish")
}

#[tokio::test]
async fn processes_every_event_until_end_of_input() {
    let s = setup(|_| {});
    let mut input = String::new();
    input.push_str(&message_line("e1", 1));
    input.push_str(r#"{"id":"other","topic":"org.example.unrelated","body":{}}"#);
    input.push('\n');
    input.push_str("{broken\n");
    input.push_str(&message_line("e2", 2));

    let report = consume(&s, &input, 2).await;

    assert_eq!(report.received, 3);
    assert_eq!(report.written, 2);
    assert_eq!(report.ignored, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 1);
    assert!(!report.fatal);
    assert!(s.results.join("e1-1-noarch").join("message.json").is_file());
    assert!(s.results.join("e2-2-noarch").join("message.json").is_file());
}

#[tokio::test]
async fn in_flight_runs_never_exceed_limit() {
    let s = setup(|f| f.delay = Duration::from_millis(30));
    let input: String = (1..=6)
        .map(|n| message_line(&format!("e{n}"), n))
        .collect();

    let report = consume(&s, &input, 2).await;

    assert_eq!(report.written, 6);
    let max = s.driver.fetcher().max_in_flight.load(Ordering::SeqCst);
    assert!(max >= 1 && max <= 2, "max in flight was {max}");
}

#[tokio::test]
async fn fatal_outcome_stops_intake() {
    let s = setup(|f| f.fatal_for = Some("e1"));
    let input: String = (1..=3)
        .map(|n| message_line(&format!("e{n}"), n))
        .collect();

    let report = consume(&s, &input, 1).await;

    assert!(report.fatal);
    assert_eq!(report.received, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(s.driver.fetcher().calls.load(Ordering::SeqCst), 1);
    assert!(!s.results.join("e2-2-noarch").exists());
}

#[tokio::test]
async fn cancelled_consumer_reads_nothing() {
    let s = setup(|_| {});
    let cancel = CancellationToken::new();
    cancel.cancel();
    let consumer = Consumer::new(Arc::clone(&s.driver), 2, cancel);

    let report = consumer
        .run(EventSource::new(message_line("e1", 1).as_bytes()))
        .await
        .unwrap();

    assert_eq!(report.received, 0);
    assert!(!s.results.join("e1-1-noarch").exists());
}

#[tokio::test]
async fn cancellation_waits_for_in_flight_run() {
    let s = setup(|f| f.delay = Duration::from_millis(100));
    let (mut writer, reader) = tokio::io::duplex(4096);
    writer
        .write_all(message_line("e1", 1).as_bytes())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let consumer = Consumer::new(Arc::clone(&s.driver), 2, cancel.clone());
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    // the writer stays open, so only cancellation ends the run
    let report = consumer
        .run(EventSource::new(tokio::io::BufReader::new(reader)))
        .await
        .unwrap();
    trigger.await.unwrap();
    drop(writer);

    assert_eq!(report.received, 1);
    assert_eq!(report.written, 1);
    assert!(s.results.join("e1-1-noarch").is_dir());
}

#[tokio::test]
async fn duplicate_delivery_is_counted_as_failure() {
    let s = setup(|_| {});
    let mut input = message_line("e1", 1);
    input.push_str(&message_line("e1", 1));

    let report = consume(&s, &input, 1).await;

    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 1);
    assert!(!report.fatal);
}
