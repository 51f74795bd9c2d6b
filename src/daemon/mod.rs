//! Long-running servers: the Unix socket daemon, the stdio server and the
//! HTTP server.

mod handler;
mod http;
mod socket;
mod stdio;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::WorkspaceLock;
use crate::config::Config;

use handler::Context;
use http::HttpServerHandle;
use socket::{SocketServerHandle, is_listening};

pub use socket::socket_path;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("another gitpilot process holds the workspace lock {}", .0.display())]
    WorkspaceLocked(PathBuf),
    #[error("daemon is already running on {}", .0.display())]
    AlreadyRunning(PathBuf),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// True if a daemon answers on the default socket.
pub fn is_daemon_running() -> bool {
    is_listening(&socket_path())
}

fn lock_workspace(config: &Config) -> Result<WorkspaceLock, DaemonError> {
    let path = config.workspace_paths().daemon_lock_path();
    WorkspaceLock::try_acquire(&path)?.ok_or(DaemonError::WorkspaceLocked(path))
}

/// Run the socket daemon until `stop` or Ctrl-C.
pub fn start(config: Config) -> Result<(), DaemonError> {
    let path = socket_path();
    if is_listening(&path) {
        return Err(DaemonError::AlreadyRunning(path));
    }
    let _lock = lock_workspace(&config)?;

    log::info!(
        "Starting daemon (workspace {}, cache ttl {}s, {} entries max)",
        config.workspace_dir.display(),
        config.cache_ttl.as_secs(),
        config.max_cache_entries
    );
    let (ctx, stopped) = Context::new(config);
    let stop = ctx.stop_sender();
    ctrlc::set_handler(move || {
        let _ = stop.try_send(());
    })?;

    let mut server = SocketServerHandle::spawn(Arc::new(ctx), path)?;
    let _ = stopped.recv();

    log::info!("Shutting down");
    server.shutdown();
    Ok(())
}

/// Serve HTTP on `config.http_addr` until `stop` or Ctrl-C.
pub fn run_http(config: Config) -> Result<(), DaemonError> {
    let _lock = lock_workspace(&config)?;
    let addr = config.http_addr;

    log::info!(
        "Starting HTTP server (workspace {}, auth {})",
        config.workspace_dir.display(),
        if config.auth.tokens.is_empty() { "off" } else { "on" }
    );
    let (ctx, stopped) = Context::new(config);
    let stop = ctx.stop_sender();
    ctrlc::set_handler(move || {
        let _ = stop.try_send(());
    })?;

    let mut server = HttpServerHandle::spawn(Arc::new(ctx), addr)?;
    let _ = stopped.recv();

    log::info!("Shutting down");
    server.shutdown();
    Ok(())
}

/// Serve JSON-RPC on stdin/stdout until EOF or `stop`.
pub fn run_stdio(config: Config) -> Result<(), DaemonError> {
    let _lock = lock_workspace(&config)?;
    let workers = config.worker_threads;
    let (ctx, stopped) = Context::new(config);

    let stdin = std::io::stdin();
    stdio::serve(
        Arc::new(ctx),
        &stopped,
        stdin.lock(),
        std::io::stdout(),
        workers,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_holder_of_the_workspace_is_refused() {
        let dir = tempdir().unwrap();
        let config = Config {
            workspace_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let _held = lock_workspace(&config).unwrap();
        assert!(matches!(
            lock_workspace(&config),
            Err(DaemonError::WorkspaceLocked(_))
        ));
    }
}
