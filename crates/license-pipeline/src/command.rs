//! 외부 프로세스 실행 추상화
//!
//! git과 라이선스 스캐너 호출은 모두 [`CommandRunner`]를 거칩니다.
//! 테스트에서는 실제 프로세스 대신 가짜 러너를 주입합니다.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// 격리 실행 시 자식 프로세스에 남기는 환경 변수
const PRESERVED_ENV: &[&str] = &["PATH", "LANG", "LC_ALL"];

/// 실행할 명령
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// 실행 파일
    pub program: String,
    /// 인자
    pub args: Vec<OsString>,
    /// 작업 디렉토리
    pub current_dir: Option<PathBuf>,
    /// 제한 시간: 초과 시 프로세스를 종료
    pub timeout: Option<Duration>,
    /// 부모 환경을 비우고 [`PRESERVED_ENV`]만 전달
    pub isolated_env: bool,
    /// 추가 환경 변수
    pub envs: Vec<(String, String)>,
}

impl CommandRequest {
    /// 인자 없는 요청을 생성합니다.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
            isolated_env: false,
            envs: Vec::new(),
        }
    }

    /// 환경 변수를 추가합니다.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// 인자를 하나 추가합니다.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// 인자 여러 개를 추가합니다.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 작업 디렉토리를 설정합니다.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// 제한 시간을 설정합니다.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 환경 격리 여부를 설정합니다.
    pub fn isolated_env(mut self, isolated: bool) -> Self {
        self.isolated_env = isolated;
        self
    }
}

/// 종료된 프로세스의 출력
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// 종료 코드: 시그널로 종료된 경우 `None`
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// 종료 코드 0으로 끝났는지 여부
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr를 손실 허용 UTF-8로 디코딩합니다.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// 프로세스 실행 에러
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// 실행 파일을 시작할 수 없음 (없음, 권한 없음 등)
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    /// 제한 시간 초과로 종료됨
    #[error("{program} timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    /// 실행 중 I/O 에러
    #[error("{program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// 외부 명령 실행기
///
/// 구현체는 비동기 컨텍스트 간에 공유할 수 있도록 `Send + Sync + 'static`이어야 합니다.
pub trait CommandRunner: Send + Sync + 'static {
    /// 명령을 끝까지 실행하고 출력을 모읍니다.
    ///
    /// 0이 아닌 종료 코드는 에러가 아니며 [`CommandOutput::exit_code`]로 전달됩니다.
    ///
    /// # Errors
    ///
    /// - `CommandError::Launch`: 프로세스를 시작하지 못함
    /// - `CommandError::TimedOut`: 제한 시간 초과 (프로세스는 종료됨)
    fn run(
        &self,
        request: &CommandRequest,
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;
}

/// `tokio::process` 기반 실행기
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &request.current_dir {
            cmd.current_dir(dir);
        }

        if request.isolated_env {
            cmd.env_clear();
            for key in PRESERVED_ENV {
                if let Some(value) = std::env::var_os(key) {
                    cmd.env(key, value);
                }
            }
        }
        cmd.envs(request.envs.iter().map(|(k, v)| (k, v)));

        debug!(program = %request.program, args = ?request.args, "spawning command");

        let child = cmd.spawn().map_err(|source| CommandError::Launch {
            program: request.program.clone(),
            source,
        })?;

        let output = match request.timeout {
            // 타임아웃으로 future가 드롭되면 kill_on_drop이 자식을 종료
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| CommandError::TimedOut {
                    program: request.program.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| CommandError::Io {
            program: request.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }
}

/// `PATH`에서 실행 파일을 찾습니다.
///
/// 경로 구분자를 포함한 값은 그대로 존재 여부만 확인합니다.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
