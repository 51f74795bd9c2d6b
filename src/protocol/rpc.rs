use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};

use super::messages::{Request, Response, RpcError};

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: Value,
    /// Bearer token, required when the daemon has tokens configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

/// JSON-RPC 2.0 success response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Response,
    pub id: Value,
}

/// JSON-RPC 2.0 error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: Value,
}

impl RpcRequest {
    pub fn new(request: Request, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            request,
            id: id.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth = token;
        self
    }
}

impl RpcResponse {
    pub fn new(result: Response, id: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result,
            id,
        }
    }
}

impl RpcErrorResponse {
    pub fn new(error: RpcError, id: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            error,
            id,
        }
    }
}

/// Write a JSON-RPC message as a single line (JSONL)
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> std::io::Result<()> {
    let json = serde_json::to_string(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}

/// Parse one request line.
///
/// A line that is not JSON yields a parse error with a null id. A JSON line
/// that is not a valid request keeps its id when it has one.
pub fn parse_request(line: &str) -> Result<RpcRequest, RpcErrorResponse> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        RpcErrorResponse::new(RpcError::parse_error(format!("parse error: {}", e)), Value::Null)
    })?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);

    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(RpcErrorResponse::new(
            RpcError::invalid_request("jsonrpc must be \"2.0\""),
            id,
        ));
    }

    serde_json::from_value(value).map_err(|e| {
        RpcErrorResponse::new(RpcError::invalid_request(format!("invalid request: {}", e)), id)
    })
}

/// Read one non-empty line, or `None` at EOF.
pub fn read_line<R: BufRead>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None); // EOF
        }
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
}

/// Read a JSON-RPC request from a line
pub fn read_request<R: BufRead>(reader: &mut R) -> std::io::Result<Option<RpcRequest>> {
    let Some(line) = read_line(reader)? else {
        return Ok(None);
    };
    let req: RpcRequest = serde_json::from_str(&line)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(req))
}

/// Read a JSON-RPC response (success or error) from a line
pub fn read_response<R: BufRead>(
    reader: &mut R,
) -> std::io::Result<Result<RpcResponse, RpcErrorResponse>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
    }

    // Errors first: an untagged `Response::Ok(())` would accept any object
    // with a null result.
    if let Ok(err) = serde_json::from_str::<RpcErrorResponse>(&line) {
        return Ok(Err(err));
    }

    if let Ok(resp) = serde_json::from_str::<RpcResponse>(&line) {
        return Ok(Ok(resp));
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "invalid JSON-RPC response",
    ))
}
