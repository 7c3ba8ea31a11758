//! Wire commands over an ssh session.
//!
//! The transport runs the remote stdio server through the ssh client and
//! speaks pkt-line framed requests over the child's stdin and stdout. One
//! session is opened lazily and reused; requests are serialized on it.

use super::{ByteStream, WireTransport};
use crate::{Result, SshConfig, StoreError};
use async_trait::async_trait;
use ballast_proto::stdio::{read_payload, read_status, write_body, write_request};
use ballast_proto::{
    Capabilities, PktLine, PktLineReader, PktLineWriter, ProtoError, WireCommand, SHA_ARG,
};
use ballast_storage::ContentHash;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Host and path parsed from an `ssh://[user@]host[:port]/path` URL.
///
/// As with other ssh URLs, `ssh://host/dir` names `dir` relative to the
/// remote home directory and `ssh://host//srv/dir` names `/srv/dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Remote user.
    pub user: Option<String>,
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: Option<u16>,
    /// Store directory on the remote host.
    pub path: String,
}

impl SshTarget {
    /// Parses an ssh URL.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |detail: &str| StoreError::UnexpectedResponse {
            url: url.to_string(),
            detail: detail.to_string(),
        };
        let rest = url
            .strip_prefix("ssh://")
            .ok_or_else(|| invalid("not an ssh URL"))?;
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let (user, hostport) = match authority.rsplit_once('@') {
            Some((user, hostport)) => (Some(user.to_string()), hostport),
            None => (None, authority),
        };
        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => (
                host,
                Some(port.parse::<u16>().map_err(|_| invalid("invalid port"))?),
            ),
            None => (hostport, None),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if host.starts_with('-') || user.as_deref().is_some_and(|u| u.starts_with('-')) {
            return Err(invalid("host and user must not start with '-'"));
        }
        Ok(Self {
            user,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Debug, Clone)]
enum Launcher {
    Ssh {
        program: String,
        target: SshTarget,
        remote_command: String,
    },
    Local {
        program: PathBuf,
        args: Vec<String>,
    },
}

impl Launcher {
    fn command(&self) -> Command {
        match self {
            Self::Ssh {
                program,
                target,
                remote_command,
            } => {
                let mut cmd = Command::new(program);
                if let Some(port) = target.port {
                    cmd.arg("-p").arg(port.to_string());
                }
                cmd.arg("--").arg(target.destination());
                let mut remote = remote_command.clone();
                if !target.path.is_empty() {
                    remote.push_str(" --cache-dir ");
                    remote.push_str(&shell_quote(&target.path));
                }
                cmd.arg(remote);
                cmd
            }
            Self::Local { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }
}

struct Connection {
    _child: Child,
    reader: PktLineReader<ChildStdout>,
    writer: PktLineWriter<ChildStdin>,
    /// A streamed response has not been read to its flush yet.
    pending: bool,
}

/// Wire protocol client over an ssh session.
pub struct SshTransport {
    url: String,
    launcher: Launcher,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("url", &self.url)
            .field("launcher", &self.launcher)
            .finish()
    }
}

impl SshTransport {
    /// Creates a transport that reaches `url` through the configured ssh client.
    pub fn new(url: &str, config: &SshConfig) -> Result<Self> {
        let target = SshTarget::parse(url)?;
        Ok(Self::with_launcher(
            url,
            Launcher::Ssh {
                program: config.command.clone(),
                target,
                remote_command: config.remote_command.clone(),
            },
        ))
    }

    /// Creates a transport that runs `program` locally and talks to its
    /// stdin and stdout.
    pub fn with_command(url: &str, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self::with_launcher(
            url,
            Launcher::Local {
                program: program.into(),
                args,
            },
        )
    }

    fn with_launcher(url: &str, launcher: Launcher) -> Self {
        Self {
            url: url.to_string(),
            launcher,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    fn unreachable(&self, detail: impl ToString) -> StoreError {
        StoreError::Unreachable {
            url: self.url.clone(),
            detail: detail.to_string(),
        }
    }

    fn map_proto(&self, err: ProtoError) -> StoreError {
        match err {
            ProtoError::Remote(detail) => StoreError::Remote {
                url: self.url.clone(),
                detail,
            },
            other => self.unreachable(other),
        }
    }

    fn spawn(&self) -> Result<Connection> {
        let mut child = self
            .launcher
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unreachable(e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.unreachable("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.unreachable("child stdout unavailable"))?;
        debug!(url = %self.url, "opened ssh session");
        Ok(Connection {
            _child: child,
            reader: PktLineReader::new(stdout),
            writer: PktLineWriter::new(stdin),
            pending: false,
        })
    }

    /// Locks the session, opening it or draining an abandoned stream first.
    async fn session(&self) -> Result<OwnedMutexGuard<Option<Connection>>> {
        let mut guard = self.conn.clone().lock_owned().await;
        if let Some(conn) = guard.as_mut() {
            if conn.pending {
                warn!(url = %self.url, "draining abandoned response");
                if conn.reader.read_until_flush().await.is_ok() {
                    conn.pending = false;
                } else {
                    *guard = None;
                }
            }
        }
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        Ok(guard)
    }

    /// Sends a request and reads its status line.
    async fn start(
        &self,
        conn: &mut Connection,
        command: WireCommand,
        hash: Option<&ContentHash>,
        body: Option<&Path>,
    ) -> std::result::Result<(), ProtoError> {
        let hex = hash.map(ContentHash::to_hex);
        let args: Vec<(&str, &str)> = hex.iter().map(|h| (SHA_ARG, h.as_str())).collect();
        write_request(&mut conn.writer, command, &args).await?;
        if let Some(path) = body {
            let mut file = tokio::fs::File::open(path).await?;
            write_body(&mut conn.writer, &mut file).await?;
        }
        conn.writer.flush().await?;
        read_status(&mut conn.reader).await
    }

    async fn roundtrip(
        &self,
        command: WireCommand,
        hash: Option<&ContentHash>,
        body: Option<&Path>,
    ) -> Result<Bytes> {
        let mut guard = self.session().await?;
        let Some(conn) = guard.as_mut() else {
            return Err(self.unreachable("session closed"));
        };
        let result = match self.start(conn, command, hash, body).await {
            Ok(()) => read_payload(&mut conn.reader).await.map(Bytes::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(payload) => Ok(payload),
            Err(e @ ProtoError::Remote(_)) => Err(self.map_proto(e)),
            Err(e) => {
                *guard = None;
                Err(self.map_proto(e))
            }
        }
    }
}

#[async_trait]
impl WireTransport for SshTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        let payload = self.roundtrip(WireCommand::Capabilities, None, None).await?;
        Ok(Capabilities::parse(&String::from_utf8_lossy(&payload)))
    }

    async fn call(&self, command: WireCommand, hash: &ContentHash) -> Result<Bytes> {
        self.roundtrip(command, Some(hash), None).await
    }

    async fn call_stream(&self, command: WireCommand, hash: &ContentHash) -> Result<ByteStream> {
        let mut guard = self.session().await?;
        let Some(conn) = guard.as_mut() else {
            return Err(self.unreachable("session closed"));
        };
        match self.start(conn, command, Some(hash), None).await {
            Ok(()) => conn.pending = true,
            Err(e @ ProtoError::Remote(_)) => return Err(self.map_proto(e)),
            Err(e) => {
                *guard = None;
                return Err(self.map_proto(e));
            }
        }

        let stream = futures::stream::unfold(Some(guard), |state| async move {
            let mut guard = state?;
            let conn = guard.as_mut()?;
            match conn.reader.read().await {
                Ok(Some(PktLine::Data(data))) => Some((Ok(data), Some(guard))),
                Ok(Some(PktLine::Flush)) => {
                    conn.pending = false;
                    None
                }
                Ok(None) => {
                    *guard = None;
                    let eof = std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "session closed inside response",
                    );
                    Some((Err(eof), None))
                }
                Err(e) => {
                    *guard = None;
                    Some((Err(std::io::Error::other(e)), None))
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn call_push(
        &self,
        command: WireCommand,
        hash: &ContentHash,
        source: &Path,
    ) -> Result<Bytes> {
        self.roundtrip(command, Some(hash), Some(source)).await
    }
}
