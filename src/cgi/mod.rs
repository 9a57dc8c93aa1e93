//! CGI bridge — run a script through an external interpreter per request.
//!
//! A request becomes a subprocess invocation: the host environment plus the
//! CGI/1.1 variables, the script path as the only argument, and the request
//! body on stdin. Stdin is closed after the body is written; the script knows
//! its input is complete from end-of-stream.
//!
//! The script answers on stdout with its own header section, a blank line
//! (`\r\n\r\n`) and the body. `Status:` and `Content-Type:` lines set the
//! response status and type; other script headers are forwarded. Output without
//! a blank line is reported as a 500 carrying what the script printed.
//!
//! Every failure (bad interpreter, unreadable script, launch error, timeout,
//! malformed output) ends as a 500 [`Response`]; [`CgiBridge::run`] never
//! fails.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::http::request::{HEADER_TERMINATOR, header_boundary};
use crate::http::{Request, Response, StatusCode};

/// Characters left unescaped in a rebuilt `QUERY_STRING` component.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Content type assumed when a script does not declare one.
const DEFAULT_CGI_CONTENT_TYPE: &str = "text/html";

/// Errors raised while running a CGI script.
#[derive(Debug, Error)]
pub enum CgiError {
    #[error("CGI interpreter is missing or not executable: {}", .0.display())]
    InvalidInterpreter(PathBuf),

    #[error("CGI script is missing or unreadable: {}", .0.display())]
    ScriptUnreadable(PathBuf),

    #[error("failed to start CGI interpreter: {0}")]
    Spawn(#[source] io::Error),

    #[error("CGI process I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("CGI script timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed CGI output: {0}")]
    MalformedOutput(String),
}

impl CgiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::InternalServerError
    }
}

/// Everything needed to start one script run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub script: PathBuf,
    /// CGI variables, added on top of the inherited host environment.
    pub env: Vec<(String, String)>,
    pub stdin: Bytes,
    pub timeout: Duration,
}

/// Captured output of a finished script.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Boxed future returned by [`Launcher::launch`].
pub type LaunchFuture = Pin<Box<dyn Future<Output = Result<ProcessOutput, CgiError>> + Send>>;

/// Process-execution seam: spawn, feed stdin, wait with a deadline, collect output.
///
/// Implementations must terminate the process when `invocation.timeout`
/// elapses and report [`CgiError::Timeout`].
pub trait Launcher: Send + Sync {
    fn launch(&self, invocation: Invocation) -> LaunchFuture;
}

/// [`Launcher`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl Launcher for TokioLauncher {
    fn launch(&self, invocation: Invocation) -> LaunchFuture {
        Box::pin(run_process(invocation))
    }
}

async fn run_process(invocation: Invocation) -> Result<ProcessOutput, CgiError> {
    let mut child = Command::new(&invocation.program)
        .arg(&invocation.script)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(CgiError::Spawn)?;

    let stdin = child.stdin.take();
    let body = invocation.stdin;
    let writer = tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(&body).await?;
            stdin.shutdown().await?;
            // dropping `stdin` closes the pipe
        }
        Ok::<_, io::Error>(())
    });

    let stdout = tokio::spawn(read_all(child.stdout.take()));
    let stderr = tokio::spawn(read_all(child.stderr.take()));

    let finished = tokio::time::timeout(invocation.timeout, async {
        let status = child.wait().await?;
        let stdout = stdout.await.map_err(io::Error::other)??;
        let stderr = stderr.await.map_err(io::Error::other)??;
        Ok::<_, io::Error>((status, stdout, stderr))
    })
    .await;

    let (status, stdout, stderr) = match finished {
        Ok(result) => result?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed-out CGI process");
            }
            writer.abort();
            return Err(CgiError::Timeout(invocation.timeout));
        }
    };

    // A script that exits without reading its input breaks the pipe; not an error.
    if let Ok(Err(e)) = writer.await {
        debug!(error = %e, "CGI stdin not fully consumed");
    }

    if !status.success() {
        warn!(script = %invocation.script.display(), %status, "CGI script exited unsuccessfully");
    }

    Ok(ProcessOutput { stdout, stderr })
}

async fn read_all<R>(pipe: Option<R>) -> io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Runs scripts through one interpreter with a fixed deadline.
#[derive(Clone)]
pub struct CgiBridge {
    interpreter: PathBuf,
    timeout: Duration,
    launcher: Arc<dyn Launcher>,
}

impl std::fmt::Debug for CgiBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgiBridge")
            .field("interpreter", &self.interpreter)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CgiBridge {
    /// Creates a bridge that launches real processes.
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::with_launcher(interpreter, timeout, Arc::new(TokioLauncher))
    }

    /// Creates a bridge with a custom process launcher.
    pub fn with_launcher(
        interpreter: impl Into<PathBuf>,
        timeout: Duration,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            launcher,
        }
    }

    /// Runs `script` for `request` and translates its output into a response.
    pub async fn run(&self, script: &Path, request: &Request) -> Response {
        match self.try_run(script, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(script = %script.display(), error = %e, "CGI request failed");
                Response::error(e.status(), e.to_string())
            }
        }
    }

    async fn try_run(&self, script: &Path, request: &Request) -> Result<Response, CgiError> {
        if !is_executable(&self.interpreter).await {
            return Err(CgiError::InvalidInterpreter(self.interpreter.clone()));
        }
        if !is_readable_file(script).await {
            return Err(CgiError::ScriptUnreadable(script.to_path_buf()));
        }

        let invocation = Invocation {
            program: self.interpreter.clone(),
            script: script.to_path_buf(),
            env: cgi_environment(script, request),
            stdin: request.body().clone(),
            timeout: self.timeout,
        };

        debug!(script = %script.display(), "launching CGI script");
        let output = self.launcher.launch(invocation).await?;
        translate_output(&output)
    }
}

/// The CGI/1.1 variables for one request, in a fixed order.
pub fn cgi_environment(script: &Path, request: &Request) -> Vec<(String, String)> {
    let body = request.body();
    let method = if body.is_empty() { "GET" } else { "POST" };

    let mut env = vec![
        ("GATEWAY_INTERFACE".to_owned(), "CGI/1.1".to_owned()),
        ("REQUEST_METHOD".to_owned(), method.to_owned()),
        ("SCRIPT_FILENAME".to_owned(), script.display().to_string()),
        ("SCRIPT_NAME".to_owned(), request.path().to_owned()),
        ("REDIRECT_STATUS".to_owned(), "200".to_owned()),
        ("SERVER_PROTOCOL".to_owned(), "HTTP/1.1".to_owned()),
        (
            "CONTENT_TYPE".to_owned(),
            request.content_type().unwrap_or_default().to_owned(),
        ),
    ];
    if !body.is_empty() {
        env.push(("CONTENT_LENGTH".to_owned(), body.len().to_string()));
    }
    env.push(("QUERY_STRING".to_owned(), encode_query(request.query())));
    env
}

/// Rebuilds a query string from decoded pairs, percent-encoding both sides.
pub fn encode_query<'a>(pairs: impl IntoIterator<Item = (&'a String, &'a String)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, QUERY_COMPONENT),
                utf8_percent_encode(v, QUERY_COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Turns raw script output into a response.
///
/// # Errors
///
/// [`CgiError::MalformedOutput`] when stdout has no `\r\n\r\n`; the message
/// carries stdout followed by stderr.
pub fn translate_output(output: &ProcessOutput) -> Result<Response, CgiError> {
    let Some(boundary) = header_boundary(&output.stdout) else {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(CgiError::MalformedOutput(text));
    };

    let head = String::from_utf8_lossy(&output.stdout[..boundary]);
    let body = output.stdout[boundary + HEADER_TERMINATOR.len()..].to_vec();

    let mut status = StatusCode::Ok;
    let mut content_type = DEFAULT_CGI_CONTENT_TYPE.to_owned();
    let mut extra = Vec::new();

    for line in head.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("status") {
            if let Some(code) = value
                .split_whitespace()
                .next()
                .and_then(|code| code.parse::<u16>().ok())
            {
                status = StatusCode::from_u16(code);
            }
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = value.to_owned();
        } else if !name.eq_ignore_ascii_case("content-length")
            && !name.eq_ignore_ascii_case("connection")
        {
            extra.push((name.to_owned(), value.to_owned()));
        }
    }

    let mut response = Response::new(status)
        .content_type(content_type)
        .body_bytes(body);
    for (name, value) in extra {
        response.add_header(name, value);
    }
    Ok(response)
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
async fn is_executable(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}

async fn is_readable_file(path: &Path) -> bool {
    let is_file = tokio::fs::metadata(path).await.is_ok_and(|meta| meta.is_file());
    is_file && tokio::fs::File::open(path).await.is_ok()
}
