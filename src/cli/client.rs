use std::io::{BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::cache::CacheStats;
use crate::daemon::socket_path;
use crate::protocol::{
    CleanupAllResult, CleanupResult, ClearCacheResult, CommitParams, Request, Response, RpcError,
    RpcRequest, StatusResult, VersionResult, read_response, write_message,
};
use crate::workflow::CommitResult;

/// Client for communicating with the daemon
pub struct Client {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
    next_id: u64,
    auth: Option<String>,
}

#[derive(Debug)]
pub enum ClientError {
    /// Could not connect to daemon
    NotRunning,
    /// IO error
    Io(std::io::Error),
    /// RPC error from daemon
    Rpc(RpcError),
    /// Invalid response
    InvalidResponse(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotRunning => write!(f, "daemon is not running"),
            ClientError::Io(e) => write!(f, "IO error: {}", e),
            ClientError::Rpc(e) => write!(f, "RPC error: {} (code {})", e.message, e.code),
            ClientError::InvalidResponse(s) => write!(f, "invalid response: {}", s),
        }
    }
}

impl std::error::Error for ClientError {}

fn is_not_running_io_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotFound
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    ) || matches!(
        err.raw_os_error(),
        Some(libc::ECONNREFUSED)
            | Some(libc::ENOENT)
            | Some(libc::ECONNABORTED)
            | Some(libc::ECONNRESET)
            | Some(libc::EPIPE)
            | Some(libc::ENOTCONN)
    )
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        if is_not_running_io_error(&e) {
            ClientError::NotRunning
        } else {
            ClientError::Io(e)
        }
    }
}

fn unexpected(response: Response) -> ClientError {
    ClientError::InvalidResponse(format!("{:?}", response))
}

impl Client {
    /// Connect to the daemon on the default socket
    pub fn connect() -> Result<Self, ClientError> {
        Self::connect_to(&socket_path())
    }

    /// Connect to a daemon listening on `path`
    pub fn connect_to(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)?;

        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
            auth: None,
        })
    }

    /// Send `token` as the bearer token of every request.
    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth = token;
        self
    }

    /// Send a request and wait for response
    pub fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let rpc_request = RpcRequest::new(request, id).with_auth(self.auth.clone());
        write_message(&mut self.writer, &rpc_request)?;
        self.writer.flush()?;

        match read_response(&mut self.reader)? {
            Ok(response) => Ok(response.result),
            Err(error) => Err(ClientError::Rpc(error.error)),
        }
    }

    /// Convenience: run the commit workflow
    pub fn commit(&mut self, params: CommitParams) -> Result<CommitResult, ClientError> {
        match self.call(Request::GitCommitAndPush(params))? {
            Response::Commit(r) => Ok(r),
            other => Err(unexpected(other)),
        }
    }

    /// Convenience: get status
    pub fn status(&mut self) -> Result<StatusResult, ClientError> {
        match self.call(Request::Status)? {
            Response::Status(s) => Ok(s),
            other => Err(unexpected(other)),
        }
    }

    /// Convenience: get version
    pub fn version(&mut self) -> Result<VersionResult, ClientError> {
        match self.call(Request::Version)? {
            Response::Version(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    /// Convenience: get cache stats
    pub fn cache_stats(&mut self) -> Result<CacheStats, ClientError> {
        match self.call(Request::CacheStats)? {
            Response::CacheStats(s) => Ok(s),
            other => Err(unexpected(other)),
        }
    }

    /// Convenience: drop cached handles
    pub fn clear_cache(&mut self) -> Result<ClearCacheResult, ClientError> {
        match self.call(Request::ClearCache)? {
            Response::ClearCache(r) => Ok(r),
            other => Err(unexpected(other)),
        }
    }

    /// Convenience: remove one cloned workspace
    pub fn cleanup_workspace(&mut self, repo_id: &str) -> Result<CleanupResult, ClientError> {
        match self.call(Request::CleanupWorkspace {
            repo_id: repo_id.to_string(),
        })? {
            Response::Cleanup(r) => Ok(r),
            other => Err(unexpected(other)),
        }
    }

    /// Convenience: remove every cloned workspace
    pub fn cleanup_all(&mut self) -> Result<CleanupAllResult, ClientError> {
        match self.call(Request::CleanupAll)? {
            Response::CleanupAll(r) => Ok(r),
            other => Err(unexpected(other)),
        }
    }

    /// Convenience: stop daemon
    pub fn stop(&mut self) -> Result<(), ClientError> {
        match self.call(Request::Stop)? {
            Response::Ok(()) => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
