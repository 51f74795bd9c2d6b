//! Request dispatch shared by the socket and stdio transports.

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::auth::AccessControl;
use crate::cache::{CacheStats, Credentials, RepoError, RepositoryManager};
use crate::config::Config;
use crate::protocol::{
    CleanupAllResult, CleanupResult, ClearCacheResult, CommitParams, MetricsSnapshot, Request,
    Response, RpcError, RpcErrorResponse, RpcResponse, StatusResult, VersionResult, error_chain,
    parse_request, write_message,
};
use crate::types::RepoId;
use crate::workflow::{CommitResult, Target, Workflow};

/// Process-wide counters, exported in Prometheus text format.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    requests: Counter,
    errors: Counter,
    commits: Counter,
    pushes: Counter,
    cache_entries: Gauge,
    cache_capacity: Gauge,
    uptime_seconds: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests = Counter::default();
        registry.register(
            "gitpilot_requests",
            "Requests received over any transport",
            requests.clone(),
        );

        let errors = Counter::default();
        registry.register(
            "gitpilot_errors",
            "Requests that ended in an error or a failed commit",
            errors.clone(),
        );

        let commits = Counter::default();
        registry.register("gitpilot_commits", "Commits created", commits.clone());

        let pushes = Counter::default();
        registry.register("gitpilot_pushes", "Commits pushed", pushes.clone());

        let cache_entries: Gauge = Gauge::default();
        registry.register(
            "gitpilot_cache_entries",
            "Repository handles currently cached",
            cache_entries.clone(),
        );

        let cache_capacity: Gauge = Gauge::default();
        registry.register(
            "gitpilot_cache_capacity",
            "Maximum number of cached repository handles",
            cache_capacity.clone(),
        );

        let uptime_seconds: Gauge = Gauge::default();
        registry.register(
            "gitpilot_uptime_seconds",
            "Seconds since the server started",
            uptime_seconds.clone(),
        );

        Self {
            registry,
            requests,
            errors,
            commits,
            pushes,
            cache_entries,
            cache_capacity,
            uptime_seconds,
        }
    }

    fn record_commit(&self, result: &CommitResult) {
        if result.commit_hash.is_some() {
            self.commits.inc();
        }
        if result.pushed {
            self.pushes.inc();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.get(),
            errors: self.errors.get(),
            commits: self.commits.get(),
            pushes: self.pushes.get(),
        }
    }

    /// Render every metric, refreshing the gauges from `cache` and `uptime`.
    pub fn encode(&self, cache: &CacheStats, uptime: Duration) -> Result<String, std::fmt::Error> {
        self.cache_entries.set(gauge_value(cache.size as u64));
        self.cache_capacity.set(gauge_value(cache.max_size as u64));
        self.uptime_seconds.set(gauge_value(uptime.as_secs()));

        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Context shared by request handlers.
pub struct Context {
    pub config: Config,
    pub manager: RepositoryManager,
    pub workflow: Workflow,
    pub access: AccessControl,
    pub metrics: Metrics,
    pub start_time: Instant,
    stop: Sender<()>,
}

impl Context {
    /// Build the context, returning the receiver that fires on `stop`.
    pub fn new(config: Config) -> (Self, Receiver<()>) {
        let (stop, stopped) = bounded(1);
        let manager = RepositoryManager::new(
            config.workspace_paths(),
            config.cache_ttl,
            config.max_cache_entries,
        );
        let ctx = Self {
            workflow: Workflow::new(&config),
            access: AccessControl::new(&config.auth),
            manager,
            metrics: Metrics::default(),
            start_time: Instant::now(),
            stop,
            config,
        };
        (ctx, stopped)
    }

    /// Sender that asks the daemon to shut down.
    pub fn stop_sender(&self) -> Sender<()> {
        self.stop.clone()
    }

    fn request_stop(&self) {
        // A full channel means a stop is already pending.
        let _ = self.stop.try_send(());
    }
}

fn repo_error(err: RepoError) -> RpcError {
    let message = error_chain(&err);
    match err {
        RepoError::Validation(_) | RepoError::InvalidInput(_) => RpcError::invalid_params(message),
        RepoError::NotFound(_) => RpcError::not_found(message),
        RepoError::Git { .. } | RepoError::Io { .. } => RpcError::internal(message),
    }
}

fn commit(ctx: &Context, params: CommitParams) -> CommitResult {
    let target = match (params.repo_url, params.repository_path) {
        (Some(url), _) => Target::Remote(url),
        (None, Some(path)) => Target::Local(PathBuf::from(path)),
        (None, None) => Target::Local(ctx.config.default_repo_path.clone()),
    };
    let credentials = params
        .credentials
        .or_else(|| ctx.config.default_credentials());

    log::info!(
        "Commit requested for {:?} (push: {}, credentials: {})",
        target,
        params.confirm_push,
        credentials.as_ref().map_or("none", Credentials::kind)
    );
    ctx.workflow.commit_and_push(
        &ctx.manager,
        &target,
        credentials.as_ref(),
        params.confirm_push,
    )
}

/// Handle a single JSON-RPC request.
pub fn handle_request(ctx: &Context, request: Request) -> Result<Response, RpcError> {
    match request {
        Request::GitCommitAndPush(params) => {
            let result = commit(ctx, params);
            ctx.metrics.record_commit(&result);
            if !result.success {
                ctx.metrics.errors.inc();
            }
            Ok(Response::Commit(result))
        }

        Request::CacheStats => Ok(Response::CacheStats(ctx.manager.cache_stats())),

        Request::ClearCache => {
            let cleared = ctx.manager.clear_cache();
            log::info!("Cleared {} cached handles", cleared);
            Ok(Response::ClearCache(ClearCacheResult { cleared }))
        }

        Request::CleanupWorkspace { repo_id } => {
            let id: RepoId = repo_id
                .parse()
                .map_err(|e| RpcError::invalid_params(format!("invalid repo_id: {}", e)))?;
            let existed = ctx.manager.paths().repo_dir(&id).exists();
            ctx.manager.cleanup(&id).map_err(repo_error)?;
            Ok(Response::Cleanup(CleanupResult {
                repo_id,
                removed: existed,
            }))
        }

        Request::CleanupAll => Ok(Response::CleanupAll(CleanupAllResult {
            removed: ctx.manager.cleanup_all(),
        })),

        Request::Status => Ok(Response::Status(StatusResult {
            running: true,
            workspace: ctx.manager.paths().root().display().to_string(),
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            cache: ctx.manager.cache_stats(),
            metrics: ctx.metrics.snapshot(),
        })),

        Request::Version => Ok(Response::Version(VersionResult {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        })),

        Request::Stop => {
            log::info!("Stop requested");
            ctx.request_stop();
            Ok(Response::Ok(()))
        }
    }
}

/// Authorize, count and handle one request.
///
/// `token` is the caller's bearer token, whatever transport carried it.
pub fn dispatch(
    ctx: &Context,
    request: Request,
    token: Option<&str>,
) -> Result<Response, RpcError> {
    ctx.metrics.requests.inc();
    let result = ctx
        .access
        .check(token, request.is_rate_limited())
        .and_then(|()| handle_request(ctx, request));
    if result.is_err() {
        ctx.metrics.errors.inc();
    }
    result
}

/// Parse, authorize and handle one request line.
pub fn handle_line(ctx: &Context, line: &str) -> Result<RpcResponse, RpcErrorResponse> {
    handle_line_as(ctx, line, None)
}

/// Like [`handle_line`], falling back to `bearer` when the request carries
/// no `auth` field.
pub fn handle_line_as(
    ctx: &Context,
    line: &str,
    bearer: Option<&str>,
) -> Result<RpcResponse, RpcErrorResponse> {
    let req = match parse_request(line) {
        Ok(req) => req,
        Err(error) => {
            ctx.metrics.requests.inc();
            ctx.metrics.errors.inc();
            return Err(error);
        }
    };

    let id = req.id;
    let method = req.request.method();
    log::debug!("Handling {} (id {})", method, id);
    let token = req.auth.as_deref().or(bearer);
    dispatch(ctx, req.request, token)
        .map(|result| RpcResponse::new(result, id.clone()))
        .map_err(|error| {
            log::warn!("{} failed: {}", method, error.message);
            RpcErrorResponse::new(error, id)
        })
}

/// Write whichever response `handle_line` produced.
pub fn write_reply<W: Write>(
    writer: &mut W,
    reply: &Result<RpcResponse, RpcErrorResponse>,
) -> std::io::Result<()> {
    match reply {
        Ok(response) => write_message(writer, response),
        Err(error) => write_message(writer, error),
    }
}
