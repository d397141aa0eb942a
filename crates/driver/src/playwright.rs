//! Playwright browser automation
//!
//! A [`PlaywrightSession`] keeps one `node` process alive for the whole run.
//! The process runs an embedded bridge script that owns the Playwright
//! browser, context and page. Requests and replies are JSON lines matched
//! by id, so calls from the engine never block each other on the pipe.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use stepwright_common::{BrowserKind, WaitCondition};
use stepwright_engine::{
    ActOutput, ArtifactError, ArtifactKind, ArtifactSink, BrowserError, BrowserSession,
    ElementAction, ElementHandle, LocatorCandidate, PageSummary,
};

use crate::error::{DriverError, DriverResult};

const BRIDGE_SCRIPT: &str = include_str!("../assets/bridge.js");

/// Extra time the bridge gets to report its own timeout before we give up on it
const REPLY_GRACE: Duration = Duration::from_secs(2);

/// Budget for calls that carry no timeout of their own
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Playwright session configuration
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    /// Directory screenshots and traces are written to
    pub artifacts_dir: PathBuf,
    /// Record a Playwright trace for the run
    pub trace: bool,
    /// Node.js executable
    pub node: PathBuf,
    /// `NODE_PATH` for resolving the `playwright` package
    pub node_path: Option<PathBuf>,
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::default(),
            headless: true,
            artifacts_dir: PathBuf::from("artifacts"),
            trace: false,
            node: PathBuf::from("node"),
            node_path: None,
            launch_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Launch {
        browser: &'a str,
        headless: bool,
        trace: bool,
    },
    Navigate {
        url: &'a str,
        timeout_ms: u64,
    },
    Find {
        strategy: &'a str,
        value: &'a str,
        timeout_ms: u64,
    },
    Act {
        element: &'a str,
        action: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<&'a str>,
        timeout_ms: u64,
    },
    CurrentUrl,
    WaitFor {
        until: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ms: Option<u64>,
        timeout_ms: u64,
    },
    Summary,
    Screenshot {
        path: &'a Path,
        full_page: bool,
    },
    Trace {
        path: &'a Path,
    },
    Close,
}

impl Request<'_> {
    fn op(&self) -> &'static str {
        match self {
            Request::Launch { .. } => "launch",
            Request::Navigate { .. } => "navigate",
            Request::Find { .. } => "find",
            Request::Act { .. } => "act",
            Request::CurrentUrl => "current_url",
            Request::WaitFor { .. } => "wait_for",
            Request::Summary => "summary",
            Request::Screenshot { .. } => "screenshot",
            Request::Trace { .. } => "trace",
            Request::Close => "close",
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a Request<'a>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Failure>,
}

#[derive(Debug, Clone, Deserialize)]
struct Failure {
    kind: String,
    message: String,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Found {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Acted {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    visible: Option<bool>,
}

fn browser_error(failure: Failure) -> BrowserError {
    match failure.kind.as_str() {
        "not_found" => BrowserError::NotFound(failure.message),
        "ambiguous" => BrowserError::Ambiguous {
            locator: failure.message,
            count: failure.count.unwrap_or(2),
        },
        "not_interactable" => BrowserError::NotInteractable(failure.message),
        "detached" => BrowserError::Detached(failure.message),
        "navigation" => BrowserError::Navigation(failure.message),
        "timeout" => BrowserError::Timeout(failure.message),
        "disconnected" => BrowserError::Disconnected(failure.message),
        _ => BrowserError::Protocol(failure.message),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(op: &str, value: Value) -> Result<T, BrowserError> {
    serde_json::from_value(value)
        .map_err(|e| BrowserError::Protocol(format!("malformed {} reply: {}", op, e)))
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Live Playwright page behind a node bridge process
pub struct PlaywrightSession {
    outbox: mpsc::UnboundedSender<String>,
    child: tokio::sync::Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    artifacts_dir: PathBuf,
    // Holds the bridge script for as long as the process runs
    _workdir: tempfile::TempDir,
}

impl PlaywrightSession {
    /// Start the bridge and launch the browser
    pub async fn launch(config: PlaywrightConfig) -> DriverResult<Self> {
        let workdir = tempfile::Builder::new().prefix("stepwright-bridge").tempdir()?;
        let script = workdir.path().join("bridge.js");
        std::fs::write(&script, BRIDGE_SCRIPT)?;
        std::fs::create_dir_all(&config.artifacts_dir)?;

        let mut command = Command::new(&config.node);
        command
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &config.node_path {
            command.env("NODE_PATH", node_path);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DriverError::NodeNotFound,
            _ => DriverError::Io(e),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Bridge("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Bridge("bridge stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(read_replies(stdout, pending.clone(), alive.clone()));
        let (outbox, requests) = mpsc::unbounded_channel();
        tokio::spawn(write_requests(stdin, requests, pending.clone(), alive.clone()));

        let session = Self {
            outbox,
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            artifacts_dir: config.artifacts_dir.clone(),
            _workdir: workdir,
        };

        let launched = session
            .call(
                &Request::Launch {
                    browser: config.browser.as_str(),
                    headless: config.headless,
                    trace: config.trace,
                },
                config.launch_timeout,
            )
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        info!(
            browser = %config.browser,
            headless = config.headless,
            version = launched.get("version").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "Browser launched"
        );
        Ok(session)
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    async fn call(&self, request: &Request<'_>, timeout: Duration) -> Result<Value, BrowserError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BrowserError::Disconnected("playwright bridge exited".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&Envelope { id, request })
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        line.push('\n');

        let (_entry, rx) = PendingEntry::register(&self.pending, id);
        if self.outbox.send(line).is_err() {
            return Err(BrowserError::Disconnected("playwright bridge exited".into()));
        }
        debug!(id, op = request.op(), "Bridge request queued");

        let reply = match tokio::time::timeout(timeout + REPLY_GRACE, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(BrowserError::Disconnected("playwright bridge exited".into())),
            Err(_) => {
                return Err(BrowserError::Timeout(format!(
                    "no {} reply within {}ms",
                    request.op(),
                    timeout.as_millis()
                )));
            }
        };

        if reply.ok {
            Ok(reply.result)
        } else {
            Err(reply.error.map(browser_error).unwrap_or_else(|| {
                BrowserError::Protocol(format!("{} failed without an error", request.op()))
            }))
        }
    }

    /// Close the browser and wait for the bridge to exit
    pub async fn shutdown(&self) -> DriverResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            if let Err(e) = self.call(&Request::Close, SHUTDOWN_TIMEOUT).await {
                debug!(error = %e, "Bridge close request failed");
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "Bridge exited");
            }
            Err(_) => {
                warn!("Bridge did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Reply slot of one in-flight request, released when the caller is done
/// or its future is dropped
struct PendingEntry<'a> {
    pending: &'a Pending,
    id: u64,
}

impl<'a> PendingEntry<'a> {
    fn register(pending: &'a Pending, id: u64) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(id, tx);
        (Self { pending, id }, rx)
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Sole owner of the bridge's stdin. Whole lines are written here, so a
/// caller that gives up mid-request never leaves a partial line behind.
async fn write_requests<W>(
    mut stdin: W,
    mut requests: mpsc::UnboundedReceiver<String>,
    pending: Pending,
    alive: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = requests.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(error = %e, "Bridge stdin write failed");
            alive.store(false, Ordering::SeqCst);
            pending.lock().clear();
            break;
        }
    }
}

async fn read_replies(stdout: ChildStdout, pending: Pending, alive: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<Reply>(&line) {
                Ok(reply) => {
                    let waiter = pending.lock().remove(&reply.id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        None => debug!(id = reply.id, "Dropping late bridge reply"),
                    }
                }
                Err(e) => warn!(error = %e, line = %line, "Unparseable bridge output"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Bridge stdout read failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a disconnect
    pending.lock().clear();
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "stepwright::bridge", "{}", line);
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.call(
            &Request::Navigate {
                url,
                timeout_ms: timeout.as_millis() as u64,
            },
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        candidate: &LocatorCandidate,
        timeout: Duration,
    ) -> Result<ElementHandle, BrowserError> {
        let result = self
            .call(
                &Request::Find {
                    strategy: candidate.strategy.as_str(),
                    value: &candidate.value,
                    timeout_ms: timeout.as_millis() as u64,
                },
                timeout,
            )
            .await?;
        let found: Found = decode("find", result)?;
        Ok(ElementHandle {
            id: found.id,
            locator: candidate.clone(),
        })
    }

    async fn act(
        &self,
        element: &ElementHandle,
        action: &ElementAction,
        timeout: Duration,
    ) -> Result<ActOutput, BrowserError> {
        let value = match action {
            ElementAction::Fill(v) | ElementAction::Select(v) => Some(v.as_str()),
            _ => None,
        };
        let result = self
            .call(
                &Request::Act {
                    element: &element.id,
                    action: action.name(),
                    value,
                    timeout_ms: timeout.as_millis() as u64,
                },
                timeout,
            )
            .await?;
        let acted: Acted = if result.is_null() {
            Acted::default()
        } else {
            decode("act", result)?
        };
        Ok(ActOutput {
            text: acted.text,
            visible: acted.visible,
        })
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let result = self.call(&Request::CurrentUrl, DEFAULT_CALL_TIMEOUT).await?;
        decode("current_url", result)
    }

    async fn wait_for(
        &self,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let timeout_ms = timeout.as_millis() as u64;
        let request = match condition {
            WaitCondition::Delay { ms } => Request::WaitFor {
                until: "delay",
                value: None,
                ms: Some(*ms),
                timeout_ms,
            },
            WaitCondition::Selector(selector) => Request::WaitFor {
                until: "selector",
                value: Some(selector.as_str()),
                ms: None,
                timeout_ms,
            },
            WaitCondition::UrlContains(fragment) => Request::WaitFor {
                until: "url_contains",
                value: Some(fragment.as_str()),
                ms: None,
                timeout_ms,
            },
        };
        self.call(&request, timeout).await?;
        Ok(())
    }

    async fn page_summary(&self) -> Result<PageSummary, BrowserError> {
        let result = self.call(&Request::Summary, DEFAULT_CALL_TIMEOUT).await?;
        decode("summary", result)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.shutdown()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl ArtifactSink for PlaywrightSession {
    async fn capture(&self, kind: ArtifactKind, name: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.artifacts_dir.join(name);
        let request = match kind {
            ArtifactKind::Screenshot => Request::Screenshot {
                path: &path,
                full_page: false,
            },
            ArtifactKind::FullPageScreenshot => Request::Screenshot {
                path: &path,
                full_page: true,
            },
            ArtifactKind::Trace => Request::Trace { path: &path },
        };
        self.call(&request, DEFAULT_CALL_TIMEOUT)
            .await
            .map_err(|e| ArtifactError::Capture(e.to_string()))?;
        debug!(path = %path.display(), ?kind, "Artifact captured");
        Ok(path)
    }
}
