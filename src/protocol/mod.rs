//! JSON-RPC 2.0 messages exchanged with the daemon, one JSON object per line

mod messages;
mod rpc;

pub use messages::{
    CleanupAllResult, CleanupResult, ClearCacheResult, CommitParams, MetricsSnapshot, Request,
    Response, RpcError, StatusResult, VersionResult, error_chain,
};
pub use rpc::{
    RpcErrorResponse, RpcRequest, RpcResponse, parse_request, read_line, read_request,
    read_response, write_message,
};
