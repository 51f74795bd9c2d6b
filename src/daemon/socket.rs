//! Unix socket server for handling JSON-RPC requests from the CLI.

use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::handler::{Context, handle_line, write_reply};
use crate::protocol::read_line;

/// Get the socket path for the daemon.
///
/// Uses `$XDG_RUNTIME_DIR/gitpilot.sock` on Linux.
/// Falls back to `/tmp/gitpilot-$UID.sock`.
pub fn socket_path() -> PathBuf {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("gitpilot.sock");
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/gitpilot-{}.sock", uid))
}

/// True if something is accepting connections on `path`.
pub fn is_listening(path: &Path) -> bool {
    UnixStream::connect(path).is_ok()
}

/// Handle a connected client, reading requests and writing responses.
fn handle_client(ctx: &Context, stream: UnixStream) {
    let mut reader = BufReader::new(&stream);
    let mut writer = &stream;

    loop {
        let line = match read_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => break, // Client disconnected
            Err(e) => {
                log::warn!("Failed to read request: {}", e);
                break;
            }
        };

        let reply = handle_line(ctx, &line);
        if let Err(e) = write_reply(&mut writer, &reply) {
            log::warn!("Failed to write response: {}", e);
            break;
        }
    }
}

/// Handle for managing the socket server thread.
pub struct SocketServerHandle {
    path: PathBuf,
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl SocketServerHandle {
    /// Bind `path` and spawn the accept loop.
    pub fn spawn(ctx: Arc<Context>, path: PathBuf) -> std::io::Result<Self> {
        // Remove stale socket file
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        log::info!("Socket server listening on {}", path.display());

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let socket_file = path.clone();
        let thread = thread::Builder::new()
            .name("gitpilot-socket".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if shutdown_clone.load(Ordering::SeqCst) {
                        break;
                    }

                    match stream {
                        Ok(stream) => {
                            let ctx = Arc::clone(&ctx);
                            let spawned = thread::Builder::new()
                                .name("gitpilot-client".to_string())
                                .spawn(move || handle_client(&ctx, stream));
                            if let Err(e) = spawned {
                                log::warn!("Failed to spawn client thread: {}", e);
                            }
                        }
                        Err(e) => {
                            if shutdown_clone.load(Ordering::SeqCst) {
                                break;
                            }
                            log::warn!("Failed to accept connection: {}", e);
                        }
                    }
                }

                // Cleanup socket file
                let _ = std::fs::remove_file(&socket_file);
                log::info!("Socket server stopped");
            })?;

        Ok(Self {
            path,
            thread: Some(thread),
            shutdown,
        })
    }

    /// Signal shutdown and wait for thread to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Connect to the socket to unblock accept()
        let _ = UnixStream::connect(&self.path);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SocketServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Client, ClientError};
    use crate::daemon::handler::tests::test_context;
    use crate::protocol::RpcError;
    use std::io::{BufRead, Write};
    use tempfile::tempdir;

    #[test]
    fn serves_requests_over_the_socket() {
        let dir = tempdir().unwrap();
        let (ctx, stop) = test_context(&dir);
        let path = dir.path().join("test.sock");
        let mut server = SocketServerHandle::spawn(Arc::new(ctx), path.clone()).unwrap();
        assert!(is_listening(&path));

        let mut client = Client::connect_to(&path).unwrap();
        assert_eq!(client.version().unwrap().version, env!("CARGO_PKG_VERSION"));
        assert_eq!(client.cache_stats().unwrap().size, 0);
        assert_eq!(client.cleanup_all().unwrap().removed, 0);

        match client.cleanup_workspace("not-an-id") {
            Err(ClientError::Rpc(e)) => assert_eq!(e.code, RpcError::INVALID_PARAMS),
            other => panic!("expected rpc error, got {:?}", other.map(|r| r.repo_id)),
        }

        client.stop().unwrap();
        assert!(stop.recv().is_ok());

        server.shutdown();
        assert!(!path.exists());
    }

    #[test]
    fn bad_line_does_not_close_the_connection() {
        let dir = tempdir().unwrap();
        let (ctx, _stop) = test_context(&dir);
        let path = dir.path().join("test.sock");
        let _server = SocketServerHandle::spawn(Arc::new(ctx), path.clone()).unwrap();

        let stream = UnixStream::connect(&path).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;

        writeln!(writer, "garbage").unwrap();
        writeln!(writer, r#"{{"jsonrpc":"2.0","method":"version","id":9}}"#).unwrap();

        let mut first = String::new();
        reader.read_line(&mut first).unwrap();
        assert!(first.contains("-32700"));

        let mut second = String::new();
        reader.read_line(&mut second).unwrap();
        assert!(second.contains(r#""id":9"#));
        assert!(second.contains(r#""result""#));
    }
}
