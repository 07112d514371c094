//! Process Handle
//!
//! Owns one launched app process. Every app is started in its own process
//! group so `stop()` can take down anything the app spawned as well.
//! Attached apps additionally get a duplex message channel speaking Node's
//! IPC protocol: a socket inherited through `NODE_CHANNEL_FD`, carrying one
//! JSON document per line, so forked Node workers see each payload as a
//! `process.on("message")` event.
//!
//! Output, exit and messages from the app are observed by background tasks
//! that only log.

use std::process::Stdio;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::core::{LaunchMode, Recipe};
use crate::logging::app_span;

/// Process handle errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open message channel: {0}")]
    Channel(#[source] std::io::Error),

    #[cfg(unix)]
    #[error("Failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[cfg(not(unix))]
    #[error("Process {0} is no longer being watched")]
    WatcherGone(u32),
}

/// A running app as seen by the supervisor
pub trait RunningApp: Send + Sync {
    /// Forward a payload to the app; never fails, only warns
    fn send(&mut self, payload: &Value);

    /// Terminate the app and everything it spawned. Idempotent.
    fn stop(&mut self) -> Result<(), ProcessError>;
}

/// Creates running apps from recipes
pub trait Launcher: Send + Sync {
    fn launch(&self, name: &str, recipe: &Recipe) -> Box<dyn RunningApp>;
}

/// Launches real OS processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, name: &str, recipe: &Recipe) -> Box<dyn RunningApp> {
        let handle = ProcessHandle::launch(name, recipe);
        if handle.is_inert() {
            tracing::warn!(app = name, "app failed to start, keeping an inert handle in the slot");
        }
        Box::new(handle)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Handle to one launched process group
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    mode: LaunchMode,
    /// Pid of the group leader; `None` once stopped or if launch failed
    pid: Option<u32>,
    messages: Option<mpsc::UnboundedSender<Value>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// Start the process described by `recipe`
    ///
    /// Must be called from within a tokio runtime. A spawn failure is logged
    /// and yields an inert handle instead of an error.
    pub fn launch(name: &str, recipe: &Recipe) -> Self {
        tracing::debug!(
            app = name,
            program = %recipe.program.display(),
            args = ?recipe.args,
            mode = ?recipe.mode,
            "spawning app"
        );

        match Self::spawn(name, recipe) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(app = name, "spawn error: {}", e);
                Self::inert(name, recipe.mode)
            }
        }
    }

    fn inert(name: &str, mode: LaunchMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            pid: None,
            messages: None,
            kill_tx: None,
        }
    }

    fn spawn(name: &str, recipe: &Recipe) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&recipe.program);
        cmd.args(&recipe.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        let channel = match recipe.mode {
            LaunchMode::Attached => ipc::open(&mut cmd)
                .map_err(|e| tracing::warn!(app = name, "{}", ProcessError::Channel(e)))
                .ok(),
            LaunchMode::Detached => None,
        };

        let mut child = cmd.spawn().map_err(|source| ProcessError::Launch {
            program: recipe.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        let span = app_span(name);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, Stream::Stdout).instrument(span.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, Stream::Stderr).instrument(span.clone()));
        }

        let messages = match channel.map(ipc::Channel::into_parent_end) {
            Some(Ok((reader, writer))) => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(read_messages(reader).instrument(span.clone()));
                tokio::spawn(write_messages(writer, rx).instrument(span.clone()));
                Some(tx)
            }
            Some(Err(e)) => {
                tracing::warn!(app = name, "{}", ProcessError::Channel(e));
                None
            }
            None => None,
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_exit(child, kill_rx).instrument(span));

        Ok(Self {
            name: name.to_string(),
            mode: recipe.mode,
            pid,
            messages,
            kill_tx: Some(kill_tx),
        })
    }

    /// Whether there is no live process behind this handle
    pub fn is_inert(&self) -> bool {
        self.pid.is_none()
    }

    #[cfg(unix)]
    fn terminate(&mut self, pid: u32) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // Dropping the sender leaves the watcher waiting on the real exit.
        self.kill_tx.take();

        let Ok(raw) = i32::try_from(pid) else {
            return Err(ProcessError::Signal {
                pgid: pid,
                source: Errno::EINVAL,
            });
        };

        match killpg(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                tracing::debug!(app = %self.name, pgid = pid, "process group already gone");
                Ok(())
            }
            Err(source) => Err(ProcessError::Signal { pgid: pid, source }),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self, pid: u32) -> Result<(), ProcessError> {
        match self.kill_tx.take() {
            Some(tx) => tx.send(()).map_err(|_| ProcessError::WatcherGone(pid)),
            None => Err(ProcessError::WatcherGone(pid)),
        }
    }
}

impl RunningApp for ProcessHandle {
    fn send(&mut self, payload: &Value) {
        if !self.mode.accepts_messages() {
            tracing::warn!(app = %self.name, "cannot send data to a detached app, it must be attached");
            return;
        }

        let Some(tx) = &self.messages else {
            tracing::warn!(app = %self.name, "app has no message channel, dropping update");
            return;
        };

        if tx.send(payload.clone()).is_err() {
            tracing::warn!(app = %self.name, "app is no longer reading messages, dropping update");
            self.messages = None;
        }
    }

    fn stop(&mut self) -> Result<(), ProcessError> {
        let Some(pid) = self.pid.take() else {
            tracing::debug!(app = %self.name, "nothing to stop");
            return Ok(());
        };

        tracing::debug!(app = %self.name, pid, "stopping..");
        self.messages = None;
        self.terminate(pid)
    }
}

async fn forward_lines(stream: impl AsyncRead + Unpin, kind: Stream) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match kind {
                Stream::Stdout => tracing::debug!("stdout: {}", line),
                Stream::Stderr => tracing::error!("stderr: {}", line),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("stopped reading {:?}: {}", kind, e);
                break;
            }
        }
    }
}

/// Log what the app sends back over its message channel
async fn read_messages(reader: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<Value>(&line) {
            Ok(message) => tracing::debug!(%message, "message from app"),
            Err(e) => tracing::warn!("unreadable message from app: {}", e),
        }
    }
    tracing::debug!("message channel closed");
}

async fn write_messages(mut writer: impl AsyncWrite + Unpin, mut rx: mpsc::UnboundedReceiver<Value>) {
    while let Some(payload) = rx.recv().await {
        let mut line = match serde_json::to_vec(&payload) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to encode message: {}", e);
                continue;
            }
        };
        line.push(b'\n');

        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!("failed to deliver message: {}", e);
            break;
        }
    }
}

async fn watch_exit(mut child: Child, kill_rx: oneshot::Receiver<()>) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::warn!("failed to kill child process: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => tracing::debug!("child process exited with code {:?}", status.code()),
        Err(e) => tracing::warn!("failed waiting for child process: {}", e),
    }
}

#[cfg(unix)]
mod ipc {
    //! Node IPC channel: a socket pair whose child end survives `exec`

    use std::os::fd::{AsRawFd, OwnedFd};

    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::process::Command;

    pub(super) struct Channel {
        parent: OwnedFd,
        /// Closed once the child has been spawned
        child: OwnedFd,
    }

    impl Channel {
        /// Our end of the channel; drops the child's copy
        pub(super) fn into_parent_end(self) -> std::io::Result<(OwnedReadHalf, OwnedWriteHalf)> {
            drop(self.child);
            let stream = std::os::unix::net::UnixStream::from(self.parent);
            stream.set_nonblocking(true)?;
            Ok(tokio::net::UnixStream::from_std(stream)?.into_split())
        }
    }

    /// Create the socket pair and advertise the child end to `cmd`
    pub(super) fn open(cmd: &mut Command) -> std::io::Result<Channel> {
        let (parent, child) = socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_CLOEXEC)?;
        // Only the child end is inherited.
        fcntl(child.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))?;

        cmd.env("NODE_CHANNEL_FD", child.as_raw_fd().to_string())
            .env("NODE_CHANNEL_SERIALIZATION_MODE", "json");
        Ok(Channel { parent, child })
    }
}

#[cfg(not(unix))]
mod ipc {
    use tokio::io::{Empty, Sink};
    use tokio::process::Command;

    pub(super) enum Channel {}

    impl Channel {
        pub(super) fn into_parent_end(self) -> std::io::Result<(Empty, Sink)> {
            match self {}
        }
    }

    pub(super) fn open(_cmd: &mut Command) -> std::io::Result<Channel> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "attached apps need a unix host",
        ))
    }
}
