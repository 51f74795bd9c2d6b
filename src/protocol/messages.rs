use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, Credentials};
use crate::workflow::CommitResult;

/// Parameters of `git_commit_and_push`.
///
/// `repo_url` wins over `repository_path`. With neither, the daemon's
/// default repository path is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub confirm_push: bool,
}

/// All RPC methods supported by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Commit every change in a repository, optionally pushing
    GitCommitAndPush(CommitParams),

    /// Get handle cache occupancy
    CacheStats,

    /// Drop every cached handle
    ClearCache,

    /// Remove one cloned workspace
    CleanupWorkspace { repo_id: String },

    /// Remove every cloned workspace
    CleanupAll,

    /// Get daemon status
    Status,

    /// Get daemon version
    Version,

    /// Stop the daemon
    Stop,
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::GitCommitAndPush(_) => "git_commit_and_push",
            Request::CacheStats => "cache_stats",
            Request::ClearCache => "clear_cache",
            Request::CleanupWorkspace { .. } => "cleanup_workspace",
            Request::CleanupAll => "cleanup_all",
            Request::Status => "status",
            Request::Version => "version",
            Request::Stop => "stop",
        }
    }

    /// Methods that are cheap enough to skip rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        !matches!(self, Request::Status | Request::Version)
    }
}

/// Process counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub commits: u64,
    pub pushes: u64,
}

/// Status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub running: bool,
    pub workspace: String,
    pub uptime_secs: u64,
    pub version: String,
    pub pid: u32,
    pub cache: CacheStats,
    pub metrics: MetricsSnapshot,
}

/// `cleanup_workspace` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResult {
    pub repo_id: String,
    pub removed: bool,
}

/// `cleanup_all` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupAllResult {
    pub removed: usize,
}

/// `clear_cache` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearCacheResult {
    pub cleared: usize,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResult {
    pub version: String,
    pub pid: u32,
}

/// All possible success responses
///
/// Variants are tried in order when deserializing, so ones with more
/// required fields come first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status(StatusResult),
    Commit(CommitResult),
    CacheStats(CacheStats),
    Cleanup(CleanupResult),
    CleanupAll(CleanupAllResult),
    ClearCache(ClearCacheResult),
    Version(VersionResult),
    Ok(()), // For stop - unit type serializes as null
}

/// RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32603;
    pub const NOT_FOUND: i32 = -1;
    pub const UNAUTHORIZED: i32 = -32001;
    pub const RATE_LIMITED: i32 = -32002;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, msg)
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(Self::UNAUTHORIZED, msg)
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::new(Self::RATE_LIMITED, msg)
    }
}

/// Render `err` followed by every source whose text it does not already
/// contain, joined with `": "`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !text.contains(&message) {
            text.push_str(": ");
            text.push_str(&message);
        }
        source = cause.source();
    }
    text
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_commit_request() {
        let req = Request::GitCommitAndPush(CommitParams {
            repository_path: Some("/tmp/repo".to_string()),
            confirm_push: true,
            ..Default::default()
        });
        let json = serde_json::to_string(&req).unwrap();

        assert!(json.contains(r#""method":"git_commit_and_push""#));
        assert!(json.contains(r#""repository_path":"/tmp/repo""#));
        assert!(json.contains(r#""confirm_push":true"#));
        assert!(!json.contains("repo_url"));
        assert!(!json.contains("credentials"));
    }

    #[test]
    fn test_serialize_request_without_params() {
        let req = Request::Status;
        let json = serde_json::to_string(&req).unwrap();

        assert!(json.contains(r#""method":"status""#));
        assert!(!json.contains(r#""params""#));
    }

    #[test]
    fn test_deserialize_commit_request_with_credentials() {
        let json = r#"{"method":"git_commit_and_push","params":{
            "repo_url":"https://example.com/o/r.git",
            "credentials":{"auth_type":"token","token":"t0k"}}}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        match req {
            Request::GitCommitAndPush(params) => {
                assert_eq!(params.repo_url.as_deref(), Some("https://example.com/o/r.git"));
                assert!(params.repository_path.is_none());
                assert!(!params.confirm_push);
                assert_eq!(
                    params.credentials,
                    Some(Credentials::Token {
                        token: "t0k".to_string()
                    })
                );
            }
            other => panic!("Expected GitCommitAndPush, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_cleanup_workspace() {
        let json = r#"{"method":"cleanup_workspace","params":{"repo_id":"0123456789abcdef"}}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        match req {
            Request::CleanupWorkspace { repo_id } => assert_eq!(repo_id, "0123456789abcdef"),
            other => panic!("Expected CleanupWorkspace, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"method":"sync"}"#).is_err());
    }

    #[test]
    fn test_method_names_match_wire_names() {
        for req in [
            Request::CacheStats,
            Request::ClearCache,
            Request::CleanupAll,
            Request::Status,
            Request::Version,
            Request::Stop,
        ] {
            let json = serde_json::to_value(&req).unwrap();
            assert_eq!(json["method"], req.method());
        }
    }

    #[test]
    fn test_status_and_version_skip_rate_limit() {
        assert!(!Request::Status.is_rate_limited());
        assert!(!Request::Version.is_rate_limited());
        assert!(Request::CleanupAll.is_rate_limited());
    }

    #[test]
    fn test_response_variants_deserialize_to_their_own_shape() {
        let cleanup: Response =
            serde_json::from_str(r#"{"repo_id":"0123456789abcdef","removed":true}"#).unwrap();
        assert!(matches!(cleanup, Response::Cleanup(_)));

        let all: Response = serde_json::from_str(r#"{"removed":3}"#).unwrap();
        assert!(matches!(all, Response::CleanupAll(CleanupAllResult { removed: 3 })));

        let stats: Response = serde_json::from_str(
            r#"{"size":1,"max_size":4,"ttl_secs":60,"total_access_count":2}"#,
        )
        .unwrap();
        assert!(matches!(stats, Response::CacheStats(_)));

        let commit = serde_json::to_string(&Response::Commit(CommitResult {
            success: true,
            message: "No changes to commit".to_string(),
            ..Default::default()
        }))
        .unwrap();
        assert!(matches!(
            serde_json::from_str::<Response>(&commit).unwrap(),
            Response::Commit(_)
        ));
    }

    #[test]
    fn test_response_ok_serializes_as_null() {
        let resp = Response::Ok(());
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, "null");
    }

    #[test]
    fn test_error_chain_skips_repeated_sources() {
        #[derive(Debug, thiserror::Error)]
        enum Inner {
            #[error("exit 128: could not read Username")]
            Failed,
        }
        #[derive(Debug, thiserror::Error)]
        enum Outer {
            #[error("clone failed")]
            Wrapped(#[source] Inner),
            #[error("clone failed: {0}")]
            Repeated(#[source] Inner),
        }

        assert_eq!(
            error_chain(&Outer::Wrapped(Inner::Failed)),
            "clone failed: exit 128: could not read Username"
        );
        assert_eq!(
            error_chain(&Outer::Repeated(Inner::Failed)),
            "clone failed: exit 128: could not read Username"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(RpcError::invalid_params("bad param").code, -32602);
        assert_eq!(RpcError::internal("server error").code, -32603);
        assert_eq!(RpcError::not_found("repo not found").code, -1);
        assert_eq!(RpcError::parse_error("x").code, -32700);
        assert_eq!(RpcError::unauthorized("x").code, -32001);
        assert_eq!(RpcError::rate_limited("x").code, -32002);
    }
}
