//! MCP transport layer implementations.
//!
//! A transport owns a byte-stream pair plus whatever must be released when
//! the connection ends. Three variants are provided:
//!
//! - [`ProcessTransport`] spawns a tool server and talks over its stdin/stdout
//! - [`TcpTransport`] wraps a dialed or accepted TCP connection
//! - [`IoTransport`] wraps any reader/writer pair, including our own stdio

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Read half handed to a session.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half handed to a session.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Default wait after spawning before checking the child is still alive.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(100);

/// Default wait for a child to exit on its own before it is killed.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to let a stderr drain task flush after the child exits.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send {
    /// Hand the read and write halves to a session. Returns `None` once taken.
    fn take_io(&mut self) -> Option<(BoxedReader, BoxedWriter)>;

    /// Release the transport. Halves that were not taken are dropped first.
    async fn close(&mut self) -> Result<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    fn take_io(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        (**self).take_io()
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

async fn shutdown_halves(io: Option<(BoxedReader, BoxedWriter)>) {
    if let Some((reader, mut writer)) = io {
        // Write side first: the peer sees EOF and can finish its read loop.
        if let Err(e) = writer.shutdown().await {
            debug!("Error shutting down writer: {}", e);
        }
        drop(writer);
        drop(reader);
    }
}

// ===== Process Transport =====

/// Timing knobs for [`ProcessTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Wait after spawning before checking for an immediate exit.
    pub startup_grace: Duration,
    /// Wait for a graceful exit on close before killing the child.
    pub shutdown_timeout: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            startup_grace: DEFAULT_STARTUP_GRACE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// A tool server running as a child process.
pub struct ProcessTransport {
    program: String,
    child: Option<Child>,
    io: Option<(BoxedReader, BoxedWriter)>,
    stderr_task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl ProcessTransport {
    /// Spawn `program` with `args` and wait out the startup grace period.
    ///
    /// Fails with [`Error::Connection`] if the program cannot be started or
    /// has already exited when the grace period ends.
    pub async fn spawn(program: &str, args: &[String], options: &ProcessOptions) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::connection(format!("failed to start {}", program), e))?;

        let stdin = child.stdin.take().ok_or_else(|| Error::Connection {
            message: format!("stdin of {} is not piped", program),
            source: None,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::Connection {
            message: format!("stdout of {} is not piped", program),
            source: None,
        })?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| drain_stderr(program.to_string(), stderr));

        tokio::time::sleep(options.startup_grace).await;

        let exited = child
            .try_wait()
            .map_err(|e| Error::connection(format!("failed to poll {}", program), e))?;
        if let Some(status) = exited {
            if let Some(task) = stderr_task {
                let _ = timeout(STDERR_FLUSH_TIMEOUT, task).await;
            }
            return Err(Error::Connection {
                message: format!("server process {} exited immediately: {}", program, status),
                source: None,
            });
        }

        info!(program, pid = ?child.id(), "Started tool server process");

        Ok(Self {
            program: program.to_string(),
            child: Some(child),
            io: Some((Box::new(stdout), Box::new(stdin))),
            stderr_task,
            shutdown_timeout: options.shutdown_timeout,
        })
    }

    /// OS process id, while the child is running.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

fn drain_stderr(program: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(server = %program, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    debug!(server = %program, "Stopped reading stderr: {}", e);
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl Transport for ProcessTransport {
    fn take_io(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        self.io.take()
    }

    async fn close(&mut self) -> Result<()> {
        shutdown_halves(self.io.take()).await;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let result = match timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(program = %self.program, "Server process exited: {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => {
                warn!(
                    program = %self.program,
                    "Server process did not exit within {:?}, killing it",
                    self.shutdown_timeout
                );
                // kill() sends the signal and then reaps the child.
                match child.kill().await {
                    Ok(()) => {
                        info!(program = %self.program, "Server process killed");
                        Ok(())
                    }
                    Err(e) => Err(Error::Io(e)),
                }
            }
        };

        if let Some(mut task) = self.stderr_task.take() {
            // A grandchild can hold the pipe open past the child's exit.
            if timeout(STDERR_FLUSH_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }

        result
    }

    fn describe(&self) -> String {
        match self.id() {
            Some(pid) => format!("process {} (pid {})", self.program, pid),
            None => format!("process {}", self.program),
        }
    }
}

// ===== TCP Transport =====

/// A TCP connection, dialed by a client or accepted by a server.
pub struct TcpTransport {
    peer: Option<SocketAddr>,
    io: Option<(BoxedReader, BoxedWriter)>,
}

impl TcpTransport {
    /// Dial `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {}", addr), e))?;
        let transport = Self::from_stream(stream);
        info!("Connected to tool server at {}", addr);
        Ok(transport)
    }

    /// Wrap an already-established stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self {
            peer,
            io: Some((Box::new(reader), Box::new(writer))),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn take_io(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        self.io.take()
    }

    async fn close(&mut self) -> Result<()> {
        shutdown_halves(self.io.take()).await;
        Ok(())
    }

    fn describe(&self) -> String {
        match self.peer_addr() {
            Some(peer) => format!("tcp {}", peer),
            None => "tcp".to_string(),
        }
    }
}

// ===== Generic I/O Transport =====

/// Any reader/writer pair, such as this process's own stdin/stdout.
pub struct IoTransport {
    label: String,
    io: Option<(BoxedReader, BoxedWriter)>,
}

impl IoTransport {
    pub fn new<R, W>(reader: R, writer: W, label: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: label.into(),
            io: Some((Box::new(reader), Box::new(writer))),
        }
    }

    /// This process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), "stdio")
    }
}

#[async_trait]
impl Transport for IoTransport {
    fn take_io(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        self.io.take()
    }

    async fn close(&mut self) -> Result<()> {
        shutdown_halves(self.io.take()).await;
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

// ===== Target Addresses =====

/// Where a client should connect: `tcp://host:port` or a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Process { program: String, args: Vec<String> },
    Tcp(String),
}

impl Target {
    pub fn process(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::Process {
            program: program.into(),
            args,
        }
    }

    /// Build a target from an address plus extra arguments for a command.
    pub fn from_parts(address: &str, extra_args: Vec<String>) -> Result<Self> {
        match address.parse::<Self>()? {
            Self::Tcp(_) if !extra_args.is_empty() => Err(Error::Config(format!(
                "arguments are not allowed for TCP target {}",
                address
            ))),
            Self::Process { program, mut args } => {
                args.extend(extra_args);
                Ok(Self::Process { program, args })
            }
            tcp => Ok(tcp),
        }
    }

    /// Construct the transport this target names.
    pub async fn open(&self, options: &ProcessOptions) -> Result<Box<dyn Transport>> {
        match self {
            Self::Process { program, args } => Ok(Box::new(
                ProcessTransport::spawn(program, args, options).await?,
            )),
            Self::Tcp(addr) => Ok(Box::new(TcpTransport::connect(addr).await?)),
        }
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(Error::Config("tcp:// target needs host:port".to_string()));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }

        let mut parts = s.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("empty target".to_string()))?;
        Ok(Self::Process {
            program,
            args: parts.collect(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Process { program, args } if args.is_empty() => write!(f, "{}", program),
            Self::Process { program, args } => write!(f, "{} {}", program, args.join(" ")),
        }
    }
}
