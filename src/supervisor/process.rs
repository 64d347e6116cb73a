//! OS-level child processes.
//!
//! A [`ChildProcess`] is the supervisor's handle to one spawned service. The
//! tokio `Child` itself lives in a waiter task that reaps it and publishes the
//! exit status on a watch channel, so the handle can be inspected and signalled
//! without holding any lock across the wait.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ServiceDefinition;
use crate::error::{KanshiError, Result};

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status: {}", code),
            (None, Some(sig)) => write!(f, "signal: {}", sig),
            (None, None) => write!(f, "exit status unknown"),
        }
    }
}

/// Bounded buffer of the most recent output lines.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

type SharedLog = Arc<tokio::sync::Mutex<tokio::fs::File>>;

/// Upper bound on waiting for output readers after the process exits.
const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

/// Handle to one spawned service process.
///
/// Clones share the same process; they never outlive the supervisor's table.
#[derive(Debug, Clone)]
pub struct ChildProcess {
    name: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    output: OutputTail,
}

impl ChildProcess {
    /// Spawns the service's command in its own process group.
    pub fn spawn(def: &ServiceDefinition, tail_lines: usize) -> Result<Self> {
        let argv = expand_command(&def.command, &def.env)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| KanshiError::config(format!("services.{}.command is empty", def.name)))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&def.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        if let Some(dir) = &def.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| KanshiError::Spawn {
            service: def.name.clone(),
            source: e,
        })?;

        let pid = child.id();
        info!(service = %def.name, pid = ?pid, command = %def.command, "Spawned process");

        let output = OutputTail::new(tail_lines);
        let log = def
            .log_file
            .as_deref()
            .and_then(|path| open_log(&def.name, path));

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_output(
                def.name.clone(),
                "stdout",
                stdout,
                output.clone(),
                log.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_output(
                def.name.clone(),
                "stderr",
                stderr,
                output.clone(),
                log,
            )));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let name = def.name.clone();
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    warn!(service = %name, error = %e, "Failed to wait for process");
                    ExitInfo::unknown()
                }
            };
            // Grandchildren may hold the pipes open; do not wait on them forever.
            let _ = tokio::time::timeout(OUTPUT_DRAIN, async {
                for reader in readers {
                    let _ = reader.await;
                }
            })
            .await;
            debug!(service = %name, status = %info, "Process exited");
            let _ = exit_tx.send(Some(info));
        });

        Ok(Self {
            name: def.name.clone(),
            pid,
            exit_rx,
            output,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, once the process has been reaped.
    pub fn exit(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.exit().is_none()
    }

    /// Waits until the process has exited.
    pub async fn wait_exit(&self) -> ExitInfo {
        let mut rx = self.exit_rx.clone();
        let info = match rx.wait_for(Option::is_some).await {
            Ok(info) => info.unwrap_or_else(ExitInfo::unknown),
            Err(_) => ExitInfo::unknown(),
        };
        info
    }

    /// Sends `sig` to the process group. No-op once the process is reaped.
    pub fn signal(&self, sig: Signal) -> bool {
        // A reaped pid may already belong to someone else.
        if !self.is_alive() {
            return false;
        }
        let Some(pid) = self.pid else {
            return false;
        };
        match killpg(Pid::from_raw(pid as i32), sig) {
            Ok(()) => true,
            Err(e) => {
                warn!(service = %self.name, pid, error = %e, "Failed to send {}", sig);
                false
            }
        }
    }

    /// Most recent output lines, oldest first.
    pub fn output_tail(&self) -> Vec<String> {
        self.output.lines()
    }
}

fn open_log(service: &str, path: &Path) -> Option<SharedLog> {
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(Arc::new(tokio::sync::Mutex::new(tokio::fs::File::from_std(
            file,
        )))),
        Err(e) => {
            warn!(service, path = %path.display(), error = %e, "Cannot open log file");
            None
        }
    }
}

async fn forward_output<R>(
    service: String,
    stream: &'static str,
    reader: R,
    tail: OutputTail,
    log: Option<SharedLog>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    // Keep draining until EOF; a closed pipe would SIGPIPE the child.
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let raw = buf.strip_suffix(b"\n").unwrap_or(&buf);
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let line = String::from_utf8_lossy(raw).into_owned();
                debug!(target: "kanshi::child", service = %service, stream, "{}", line);
                if let Some(log) = &log {
                    let mut file = log.lock().await;
                    let write = async {
                        file.write_all(raw).await?;
                        file.write_all(b"\n").await?;
                        file.flush().await
                    };
                    if let Err(e) = write.await {
                        warn!(service = %service, error = %e, "Failed to write log file");
                    }
                }
                tail.push(line);
            }
            Err(e) => {
                warn!(service = %service, stream, error = %e, "Failed to read output");
                break;
            }
        }
    }
}

/// Splits a command template into argv and expands `${VAR}` in every word.
///
/// Values come from the service environment first, then the supervisor's.
pub fn expand_command(template: &str, env: &BTreeMap<String, String>) -> Result<Vec<String>> {
    let words = shell_words::split(template).map_err(|e| {
        KanshiError::config_with_source(format!("Failed to parse command '{}'", template), e)
    })?;
    if words.is_empty() {
        return Err(KanshiError::config("Empty command"));
    }
    words.iter().map(|w| expand_word(w, env)).collect()
}

fn expand_word(word: &str, env: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(word.len());
    let mut rest = word;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            KanshiError::config(format!("Unterminated placeholder in '{}'", word))
        })?;
        let key = &after[..end];
        let value = env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .ok_or_else(|| {
                KanshiError::config(format!("Placeholder ${{{}}} has no value", key))
            })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
