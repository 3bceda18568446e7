//! Remote file agents. One agent speaks to one destination's host, scoped
//! to a single batch of operations: open, use, close.

use super::config::{PathConfig, Protocol, RemoteHostConfig};
use async_trait::async_trait;
use std::io::{Cursor, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Bound on each remote operation, connect included.
const REMOTE_OP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Auth and permission failures are not retried; everything else is
    /// treated as transient by the controller's retry policy.
    pub fn is_transient(&self) -> bool {
        !matches!(self, AgentError::Auth(_))
    }
}

impl From<ssh2::Error> for AgentError {
    fn from(err: ssh2::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}

impl From<suppaftp::FtpError> for AgentError {
    fn from(err: suppaftp::FtpError) -> Self {
        AgentError::Transport(err.to_string())
    }
}

/// Capability set of one destination's remote host. `list_*` return bare
/// file names; `download`/`upload`/`delete` take paths relative to the
/// remote root (e.g. `inbound/cc-20190212.ach`).
#[async_trait]
pub trait FileTransferAgent: Send + Sync {
    async fn list_inbound(&self) -> Result<Vec<String>, AgentError>;
    async fn list_returns(&self) -> Result<Vec<String>, AgentError>;
    async fn download(&self, path: &str) -> Result<Vec<u8>, AgentError>;
    async fn upload(&self, path: &str, contents: Vec<u8>) -> Result<(), AgentError>;
    async fn delete(&self, path: &str) -> Result<(), AgentError>;
    async fn close(&self);
    fn paths(&self) -> &PathConfig;
}

/// Constructor seam so tests can swap remote transports for a local
/// directory.
pub type AgentFactory = Arc<
    dyn Fn(&RemoteHostConfig, &PathConfig) -> Result<Box<dyn FileTransferAgent>, AgentError>
        + Send
        + Sync,
>;

/// Opens an agent for the destination's configured protocol.
pub fn connect(
    host: &RemoteHostConfig,
    paths: &PathConfig,
) -> Result<Box<dyn FileTransferAgent>, AgentError> {
    match host.protocol {
        Protocol::Sftp => Ok(Box::new(SftpAgent::connect(host, paths)?)),
        Protocol::Ftp => Ok(Box::new(FtpAgent::connect(host, paths)?)),
    }
}

// --- SFTP ---------------------------------------------------------------

struct SftpInner {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
}

pub struct SftpAgent {
    inner: Arc<Mutex<SftpInner>>,
    paths: PathConfig,
}

impl SftpAgent {
    pub fn connect(host: &RemoteHostConfig, paths: &PathConfig) -> Result<Self, AgentError> {
        let addr = host
            .hostname
            .to_socket_addrs()
            .map_err(|e| AgentError::Transport(format!("resolving {}: {e}", host.hostname)))?
            .next()
            .ok_or_else(|| {
                AgentError::Transport(format!("no address for {}", host.hostname))
            })?;
        let tcp = TcpStream::connect_timeout(&addr, REMOTE_OP_TIMEOUT)?;
        tcp.set_read_timeout(Some(REMOTE_OP_TIMEOUT))?;
        tcp.set_write_timeout(Some(REMOTE_OP_TIMEOUT))?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session
            .userauth_password(&host.username, &host.password)
            .map_err(|e| AgentError::Auth(e.to_string()))?;
        let sftp = session.sftp()?;

        Ok(Self {
            inner: Arc::new(Mutex::new(SftpInner { session, sftp })),
            paths: paths.clone(),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SftpInner) -> Result<T, AgentError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| AgentError::Transport("agent connection poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AgentError::Transport(format!("agent task failed: {e}")))?
    }

    async fn list(&self, dir: String) -> Result<Vec<String>, AgentError> {
        self.run(move |inner| {
            let entries = inner.sftp.readdir(Path::new(&dir))?;
            Ok(entries
                .into_iter()
                .filter(|(_, stat)| stat.is_file())
                .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect())
        })
        .await
    }
}

#[async_trait]
impl FileTransferAgent for SftpAgent {
    async fn list_inbound(&self) -> Result<Vec<String>, AgentError> {
        self.list(self.paths.inbound_path.clone()).await
    }

    async fn list_returns(&self) -> Result<Vec<String>, AgentError> {
        self.list(self.paths.return_path.clone()).await
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, AgentError> {
        let path = path.to_string();
        self.run(move |inner| {
            let mut file = inner.sftp.open(Path::new(&path))?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            Ok(contents)
        })
        .await
    }

    async fn upload(&self, path: &str, contents: Vec<u8>) -> Result<(), AgentError> {
        let path = path.to_string();
        self.run(move |inner| {
            let mut file = inner.sftp.create(Path::new(&path))?;
            file.write_all(&contents)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<(), AgentError> {
        let path = path.to_string();
        self.run(move |inner| Ok(inner.sftp.unlink(Path::new(&path))?))
            .await
    }

    async fn close(&self) {
        let _ = self
            .run(|inner| {
                inner
                    .session
                    .disconnect(None, "closing", None)
                    .map_err(AgentError::from)
            })
            .await;
    }

    fn paths(&self) -> &PathConfig {
        &self.paths
    }
}

// --- FTP ----------------------------------------------------------------

pub struct FtpAgent {
    inner: Arc<Mutex<suppaftp::FtpStream>>,
    paths: PathConfig,
}

impl FtpAgent {
    pub fn connect(host: &RemoteHostConfig, paths: &PathConfig) -> Result<Self, AgentError> {
        let mut stream = suppaftp::FtpStream::connect(&host.hostname)?;
        stream
            .login(&host.username, &host.password)
            .map_err(|e| AgentError::Auth(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(stream)),
            paths: paths.clone(),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&mut suppaftp::FtpStream) -> Result<T, AgentError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| AgentError::Transport("agent connection poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AgentError::Transport(format!("agent task failed: {e}")))?
    }

    async fn list(&self, dir: String) -> Result<Vec<String>, AgentError> {
        self.run(move |ftp| {
            let names = ftp.nlst(Some(&dir))?;
            Ok(names
                .into_iter()
                .filter_map(|n| {
                    let name = n.rsplit('/').next().unwrap_or(&n).to_string();
                    (!name.is_empty()).then_some(name)
                })
                .collect())
        })
        .await
    }
}

#[async_trait]
impl FileTransferAgent for FtpAgent {
    async fn list_inbound(&self) -> Result<Vec<String>, AgentError> {
        self.list(self.paths.inbound_path.clone()).await
    }

    async fn list_returns(&self) -> Result<Vec<String>, AgentError> {
        self.list(self.paths.return_path.clone()).await
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, AgentError> {
        let path = path.to_string();
        self.run(move |ftp| Ok(ftp.retr_as_buffer(&path)?.into_inner()))
            .await
    }

    async fn upload(&self, path: &str, contents: Vec<u8>) -> Result<(), AgentError> {
        let path = path.to_string();
        self.run(move |ftp| {
            ftp.put_file(&path, &mut Cursor::new(contents))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<(), AgentError> {
        let path = path.to_string();
        self.run(move |ftp| Ok(ftp.rm(&path)?)).await
    }

    async fn close(&self) {
        let _ = self.run(|ftp| Ok(ftp.quit()?)).await;
    }

    fn paths(&self) -> &PathConfig {
        &self.paths
    }
}

// --- Local directory (tests and development) -----------------------------

/// Agent backed by a directory tree on local disk, mirroring the remote
/// inbound/outbound/return layout.
pub struct LocalDirAgent {
    root: PathBuf,
    paths: PathConfig,
}

impl LocalDirAgent {
    pub fn new(root: impl Into<PathBuf>, paths: PathConfig) -> Self {
        Self {
            root: root.into(),
            paths,
        }
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>, AgentError> {
        let dir = self.root.join(dir.trim_matches('/'));
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl FileTransferAgent for LocalDirAgent {
    async fn list_inbound(&self) -> Result<Vec<String>, AgentError> {
        self.list_dir(&self.paths.inbound_path)
    }

    async fn list_returns(&self) -> Result<Vec<String>, AgentError> {
        self.list_dir(&self.paths.return_path)
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, AgentError> {
        Ok(std::fs::read(self.root.join(path.trim_start_matches('/')))?)
    }

    async fn upload(&self, path: &str, contents: Vec<u8>) -> Result<(), AgentError> {
        let path = self.root.join(path.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), AgentError> {
        std::fs::remove_file(self.root.join(path.trim_start_matches('/')))?;
        Ok(())
    }

    async fn close(&self) {}

    fn paths(&self) -> &PathConfig {
        &self.paths
    }
}
