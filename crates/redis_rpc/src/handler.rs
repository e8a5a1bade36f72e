use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

/// Contract between [`RpcServer`](crate::RpcServer) and user code.
///
/// One handler may claim several method names; the server routes each
/// inbound request to the handler claiming its method, matched
/// case-insensitively. How `params` is destructured is entirely the
/// handler's choice.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Method names this handler serves.
    fn supported_methods(&self) -> Vec<String>;

    /// Handles one invocation.
    ///
    /// `params` is the decoded parameter value (JSON null when the request
    /// carried none). `cancel` fires when the server's per-request deadline
    /// expires or the server shuts down; long-running handlers should
    /// observe it. The returned value must be JSON-serializable.
    async fn handle(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError>;
}
