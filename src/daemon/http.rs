//! HTTP transport: JSON-RPC over POST, a REST commit endpoint, an SSE
//! channel, health and Prometheus metrics.

use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::handler::{Context, dispatch, handle_line_as};
use crate::protocol::{CommitParams, Request, Response, RpcError};

const OPENMETRICS: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Interval between `heartbeat` events on `/mcp/sse`.
const HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct HttpState {
    ctx: Arc<Context>,
    shutdown: watch::Receiver<bool>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    transport: &'static str,
    auth_enabled: bool,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: RpcError,
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/rpc", post(rpc))
        .route("/mcp/tools/git_commit_and_push", post(commit))
        .route("/mcp/sse", get(events))
        .with_state(state)
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn status_for(error: &RpcError) -> StatusCode {
    match error.code {
        RpcError::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        RpcError::RATE_LIMITED => StatusCode::TOO_MANY_REQUESTS,
        RpcError::PARSE_ERROR | RpcError::INVALID_REQUEST | RpcError::INVALID_PARAMS => {
            StatusCode::BAD_REQUEST
        }
        RpcError::NOT_FOUND => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(error: RpcError) -> HttpResponse {
    let status = status_for(&error);
    let body = ErrorBody {
        success: false,
        error,
    };
    (status, Json(body)).into_response()
}

async fn health(State(state): State<HttpState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        transport: "http",
        auth_enabled: state.ctx.access.requires_token(),
        uptime_secs: state.ctx.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<HttpState>) -> HttpResponse {
    let ctx = &state.ctx;
    match ctx
        .metrics
        .encode(&ctx.manager.cache_stats(), ctx.start_time.elapsed())
    {
        Ok(body) => ([(header::CONTENT_TYPE, OPENMETRICS)], body).into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// One JSON-RPC request per body. Errors travel in the envelope, so the
/// status is always 200.
async fn rpc(State(state): State<HttpState>, headers: HeaderMap, body: String) -> HttpResponse {
    let token = bearer(&headers);
    let ctx = Arc::clone(&state.ctx);
    let reply =
        tokio::task::spawn_blocking(move || handle_line_as(&ctx, body.trim(), token.as_deref()))
            .await;

    match reply {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(error)) => Json(error).into_response(),
        Err(e) => {
            log::error!("RPC task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn commit(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(params): Json<CommitParams>,
) -> HttpResponse {
    let token = bearer(&headers);
    let ctx = Arc::clone(&state.ctx);
    let outcome = tokio::task::spawn_blocking(move || {
        dispatch(&ctx, Request::GitCommitAndPush(params), token.as_deref())
    })
    .await;

    match outcome {
        Ok(Ok(Response::Commit(result))) => Json(result).into_response(),
        Ok(Ok(_)) => error_reply(RpcError::internal("unexpected response to commit")),
        Ok(Err(error)) => error_reply(error),
        Err(e) => error_reply(RpcError::internal(format!("commit task failed: {}", e))),
    }
}

async fn events(State(state): State<HttpState>, headers: HeaderMap) -> HttpResponse {
    let token = bearer(&headers);
    if let Err(error) = state.ctx.access.check(token.as_deref(), false) {
        return error_reply(error);
    }

    let (tx, rx) = mpsc::channel::<Event>(4);
    let mut shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let ready = Event::default().event("connected").data("gitpilot ready");
        if tx.send(ready).await.is_err() {
            return;
        }

        let start = tokio::time::Instant::now() + HEARTBEAT;
        let mut ticker = tokio::time::interval_at(start, HEARTBEAT);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let beat = Event::default().event("heartbeat").data("alive");
                    if tx.send(beat).await.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });

    Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
        .keep_alive(KeepAlive::new())
        .into_response()
}

/// Handle for managing the HTTP server thread.
pub struct HttpServerHandle {
    addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl HttpServerHandle {
    /// Bind `addr` and serve on a dedicated runtime thread.
    pub fn spawn(ctx: Arc<Context>, addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(ctx.config.worker_threads)
            .thread_name("gitpilot-http-worker")
            .enable_all()
            .build()?;

        let (shutdown, mut signal) = watch::channel(false);
        let app = router(HttpState {
            ctx,
            shutdown: signal.clone(),
        });
        log::info!("HTTP server listening on {}", addr);

        let thread = thread::Builder::new()
            .name("gitpilot-http".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            log::error!("Failed to register HTTP listener: {}", e);
                            return;
                        }
                    };
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = signal.changed().await;
                        })
                        .await;
                    if let Err(e) = served {
                        log::error!("HTTP server error: {}", e);
                    }
                });
                log::info!("HTTP server stopped");
            })?;

        Ok(Self {
            addr,
            thread: Some(thread),
            shutdown,
        })
    }

    /// Address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and wait for open streams to close.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HttpServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, Config};
    use crate::testutil::{commit_file, init_repo};
    use std::io::{BufRead, BufReader};
    use tempfile::tempdir;

    fn serve(ctx: Context) -> HttpServerHandle {
        HttpServerHandle::spawn(Arc::new(ctx), "127.0.0.1:0".parse().unwrap()).unwrap()
    }

    fn url(server: &HttpServerHandle, path: &str) -> String {
        format!("http://{}{}", server.addr(), path)
    }

    fn json(response: ureq::Response) -> serde_json::Value {
        serde_json::from_str(&response.into_string().unwrap()).unwrap()
    }

    fn guarded_context(dir: &tempfile::TempDir) -> Context {
        let (ctx, _stop) = Context::new(Config {
            workspace_dir: dir.path().join("workspaces"),
            default_repo_path: dir.path().join("repo"),
            auth: AuthConfig {
                tokens: vec!["s3cret".to_string()],
                ..AuthConfig::default()
            },
            ..Config::default()
        });
        ctx
    }

    #[test]
    fn health_reports_version_and_auth() {
        let dir = tempdir().unwrap();
        let server = serve(guarded_context(&dir));

        let health = json(ureq::get(&url(&server, "/health")).call().unwrap());
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(health["auth_enabled"], true);
    }

    #[test]
    fn rpc_posts_share_the_line_handler() {
        let dir = tempdir().unwrap();
        let (ctx, _stop) = crate::daemon::handler::tests::test_context(&dir);
        let server = serve(ctx);

        let reply = ureq::post(&url(&server, "/rpc"))
            .send_string(r#"{"jsonrpc":"2.0","method":"version","id":7}"#)
            .unwrap();
        assert_eq!(reply.status(), 200);
        let reply = json(reply);
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"]["version"], env!("CARGO_PKG_VERSION"));

        let bad = json(ureq::post(&url(&server, "/rpc")).send_string("nope").unwrap());
        assert_eq!(bad["error"]["code"], RpcError::PARSE_ERROR);

        let metrics = ureq::get(&url(&server, "/metrics")).call().unwrap();
        assert!(metrics.content_type().starts_with("application/openmetrics-text"));
        let text = metrics.into_string().unwrap();
        assert!(text.contains("gitpilot_requests_total 2"), "{}", text);
        assert!(text.contains("gitpilot_errors_total 1"), "{}", text);
        assert!(text.contains("gitpilot_cache_capacity 32"), "{}", text);
        assert!(text.ends_with("# EOF\n"));
    }

    #[test]
    fn rpc_accepts_a_bearer_header() {
        let dir = tempdir().unwrap();
        let server = serve(guarded_context(&dir));
        let line = r#"{"jsonrpc":"2.0","method":"cache_stats","id":1}"#;

        let denied = json(ureq::post(&url(&server, "/rpc")).send_string(line).unwrap());
        assert_eq!(denied["error"]["code"], RpcError::UNAUTHORIZED);

        let allowed = json(
            ureq::post(&url(&server, "/rpc"))
                .set("Authorization", "Bearer s3cret")
                .send_string(line)
                .unwrap(),
        );
        assert_eq!(allowed["result"]["size"], 0);
    }

    #[test]
    fn commit_endpoint_requires_a_token_and_commits() {
        let dir = tempdir().unwrap();
        let repo = init_repo(&dir.path().join("repo"));
        commit_file(&repo, "README.md", "# x\n", "initial");
        std::fs::write(dir.path().join("repo/notes.md"), "notes\n").unwrap();
        let server = serve(guarded_context(&dir));
        let endpoint = url(&server, "/mcp/tools/git_commit_and_push");

        match ureq::post(&endpoint)
            .set("Content-Type", "application/json")
            .send_string("{}")
        {
            Err(ureq::Error::Status(code, response)) => {
                assert_eq!(code, 401);
                let body = json(response);
                assert_eq!(body["success"], false);
                assert_eq!(body["error"]["code"], RpcError::UNAUTHORIZED);
            }
            other => panic!("expected 401, got {:?}", other.map(|r| r.status())),
        }

        let result = json(
            ureq::post(&endpoint)
                .set("Content-Type", "application/json")
                .set("Authorization", "Bearer s3cret")
                .send_string(r#"{"confirm_push":false}"#)
                .unwrap(),
        );
        assert_eq!(result["success"], true);
        assert_eq!(result["files_changed"], 1);
        assert_eq!(result["pushed"], false);
    }

    #[test]
    fn event_stream_opens_with_connected() {
        let dir = tempdir().unwrap();
        let (ctx, _stop) = crate::daemon::handler::tests::test_context(&dir);
        let mut server = serve(ctx);

        let response = ureq::get(&url(&server, "/mcp/sse")).call().unwrap();
        assert!(response.content_type().starts_with("text/event-stream"));

        let mut reader = BufReader::new(response.into_reader());
        let mut lines = Vec::new();
        while lines.len() < 2 {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end().to_string();
            if !line.is_empty() && !line.starts_with(':') {
                lines.push(line);
            }
        }
        assert_eq!(lines, ["event: connected", "data: gitpilot ready"]);

        // Shutdown ends the stream instead of waiting on the next heartbeat.
        drop(reader);
        server.shutdown();
    }
}
