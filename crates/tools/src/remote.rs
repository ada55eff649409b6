//! The remote tool boundary.
//!
//! A registration with `HostType::Remote` is executed by a peer that owns the
//! remote workspace. Requests and responses are plain serde types so any
//! transport can carry them; [`ChannelPeer`] carries them as JSON over an
//! in-process channel.

use crate::router::Router;
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skein_core::tool::{ToolCall, ToolOutcome};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A tool invocation forwarded to a remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolRequest {
    pub session_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// The caller already approved this exact call.
    #[serde(default)]
    pub approved: bool,
}

/// The peer's answer to a [`RemoteToolRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolResponse {
    pub call_id: String,
    pub outcome: ToolOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote peer disconnected: {0}")]
    Disconnected(String),

    #[error("Malformed remote message: {0}")]
    Protocol(String),
}

/// The calling side of the remote boundary.
#[async_trait]
pub trait RemotePeer: Send + Sync {
    fn name(&self) -> &str;

    /// Send one request and wait for its response. Callers bound the wait.
    async fn invoke(&self, request: RemoteToolRequest) -> Result<RemoteToolResponse, RemoteError>;
}

/// The serving side: dispatches incoming requests through its own router
/// and session, so paths are re-resolved against the serving workspace.
#[derive(Clone)]
pub struct RemoteEndpoint {
    router: Arc<Router>,
    session: Arc<Session>,
}

impl RemoteEndpoint {
    pub fn new(router: Arc<Router>, session: Arc<Session>) -> Self {
        Self { router, session }
    }

    /// Serve one request. Approval belongs to the caller: a gated tool is
    /// granted when the request says so, and otherwise comes back as
    /// `PendingApproval` without leaving a hold in the serving session.
    pub async fn handle(&self, request: RemoteToolRequest) -> RemoteToolResponse {
        debug!(
            call_id = %request.call_id,
            tool = %request.tool_name,
            approved = request.approved,
            "Serving remote tool call"
        );
        let call = ToolCall::parsed(request.call_id, request.tool_name, request.arguments);
        if request.approved {
            self.session.grant(&call);
        }
        let result = self
            .router
            .dispatch(&call, &self.session, &CancellationToken::new())
            .await;
        self.session.forget(&call.id);
        RemoteToolResponse {
            call_id: result.call_id,
            outcome: result.outcome,
        }
    }

    /// Decode, handle, and encode one JSON message.
    pub async fn handle_json(&self, message: &str) -> Result<String, RemoteError> {
        let request: RemoteToolRequest =
            serde_json::from_str(message).map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let response = self.handle(request).await;
        serde_json::to_string(&response).map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}

/// One JSON request plus the slot its JSON response goes into.
pub type Envelope = (String, oneshot::Sender<String>);

/// An in-process peer that exchanges JSON messages over `mpsc` + `oneshot`.
pub struct ChannelPeer {
    name: String,
    sender: mpsc::Sender<Envelope>,
}

impl ChannelPeer {
    /// A peer plus the receiving end of its transport.
    pub fn channel(name: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            Self {
                name: name.into(),
                sender,
            },
            receiver,
        )
    }

    /// A peer served by `endpoint` on a background task. Each request is
    /// handled on its own task so a slow call does not block the others.
    pub fn spawn(name: impl Into<String>, endpoint: RemoteEndpoint) -> Self {
        let (peer, mut receiver) = Self::channel(name, 64);
        tokio::spawn(async move {
            while let Some((message, reply)) = receiver.recv().await {
                let endpoint = endpoint.clone();
                tokio::spawn(async move {
                    match endpoint.handle_json(&message).await {
                        Ok(response) => {
                            let _ = reply.send(response);
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed remote request"),
                    }
                });
            }
        });
        peer
    }
}

#[async_trait]
impl RemotePeer for ChannelPeer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: RemoteToolRequest) -> Result<RemoteToolResponse, RemoteError> {
        let message = serde_json::to_string(&request).map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let (reply, response) = oneshot::channel();
        self.sender
            .send((message, reply))
            .await
            .map_err(|_| RemoteError::Disconnected(self.name.clone()))?;
        let response = response
            .await
            .map_err(|_| RemoteError::Disconnected(self.name.clone()))?;
        serde_json::from_str(&response).map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}
