//! The tool router: validates, gates, and executes tool calls.
//!
//! Dispatch order for one call:
//! 1. look up the registration (`UnknownTool`)
//! 2. require parsed arguments that satisfy the schema (`InvalidArguments`)
//! 3. hold permission-gated calls the session has not approved; a call
//!    grant is used up by the dispatch it authorizes
//! 4. resolve declared path arguments against the session's workspace root
//!    (`PathEscape`, before any I/O)
//! 5. execute in-process, or forward to the remote peer under a timeout
//!
//! Every step short-circuits into a [`ToolResult`]; the router never fails.

use crate::handler::{ResolvedPaths, ToolHandler, ToolInput, ToolOutput};
use crate::remote::RemoteToolRequest;
use crate::schema;
use crate::session::Session;
use skein_core::error::ToolFailure;
use skein_core::tool::{CallStatus, HostType, ToolCall, ToolDefinition, ToolOutcome, ToolResult};
use skein_security::{AuditEvent, AuditLogger, AuditOutcome, PathError, lexically_contained};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on a remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// A handler plus where and how it may run.
#[derive(Clone)]
pub struct Registration {
    pub handler: Arc<dyn ToolHandler>,
    pub host: HostType,
    pub requires_permission: bool,
}

impl Registration {
    pub fn local(handler: Arc<dyn ToolHandler>) -> Self {
        let requires_permission = handler.requires_permission();
        Self {
            handler,
            host: HostType::Local,
            requires_permission,
        }
    }

    pub fn remote(handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            host: HostType::Remote,
            ..Self::local(handler)
        }
    }

    pub fn requiring_permission(mut self, required: bool) -> Self {
        self.requires_permission = required;
        self
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.handler.name())
            .field("host", &self.host)
            .field("requires_permission", &self.requires_permission)
            .finish()
    }
}

/// Registry and dispatcher. One canonical registration per tool name.
pub struct Router {
    registrations: HashMap<String, Registration>,
    audit: Arc<AuditLogger>,
    remote_timeout: Duration,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
            audit: Arc::new(AuditLogger::tracing()),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing registration with the same name.
    pub fn register(&mut self, registration: Registration) -> &mut Self {
        let name = registration.handler.name().to_string();
        if self.registrations.insert(name.clone(), registration).is_some() {
            warn!(tool = %name, "Tool registration replaced");
        }
        self
    }

    /// Register an in-process tool with its own permission default.
    pub fn register_local(&mut self, handler: Arc<dyn ToolHandler>) -> &mut Self {
        self.register(Registration::local(handler))
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.registrations.get(name)
    }

    /// Definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .registrations
            .values()
            .map(|r| r.handler.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registrations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Dispatch one call within `session`. Cancelling `cancel` abandons the
    /// call (a pending remote wait is dropped along with its timer).
    pub async fn dispatch(&self, call: &ToolCall, session: &Session, cancel: &CancellationToken) -> ToolResult {
        let started = Instant::now();
        let outcome = self.route(call, session, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            ToolOutcome::Success { .. } => {
                debug!(call_id = %call.id, tool = %call.name, elapsed_ms, "Tool call succeeded");
            }
            ToolOutcome::Failed { failure } => {
                info!(call_id = %call.id, tool = %call.name, elapsed_ms, %failure, "Tool call failed");
            }
            ToolOutcome::PendingApproval => {
                info!(call_id = %call.id, tool = %call.name, "Tool call awaiting approval");
            }
        }
        if !matches!(outcome, ToolOutcome::PendingApproval) {
            let audit_outcome = match &outcome {
                ToolOutcome::Success { .. } => AuditOutcome::Success,
                _ => AuditOutcome::Failure,
            };
            self.audit.log(
                AuditEvent::ToolExecution {
                    tool_name: call.name.clone(),
                },
                session.id(),
                &call.name,
                audit_outcome,
                None,
            );
        }

        ToolResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome,
        }
    }

    async fn route(&self, call: &ToolCall, session: &Session, cancel: &CancellationToken) -> ToolOutcome {
        let Some(registration) = self.registrations.get(&call.name) else {
            return failed(ToolFailure::UnknownTool {
                name: call.name.clone(),
            });
        };

        let arguments = match &call.status {
            CallStatus::Parsed(value) => value.clone(),
            CallStatus::Invalid(reason) => return failed(ToolFailure::invalid_arguments(reason.to_string())),
            CallStatus::Accumulating => {
                return failed(ToolFailure::invalid_arguments("arguments are still streaming"));
            }
        };
        if let Err(failure) = schema::validate(&registration.handler.parameters_schema(), &arguments) {
            return failed(failure);
        }

        let approved = if registration.requires_permission {
            if !session.take_approval(call) {
                self.request_approval(session, call);
                return ToolOutcome::PendingApproval;
            }
            self.audit.log(
                AuditEvent::ApprovalGranted {
                    tool_name: call.name.clone(),
                    call_id: call.id.clone(),
                },
                session.id(),
                &call.name,
                AuditOutcome::Success,
                None,
            );
            true
        } else {
            false
        };

        if cancel.is_cancelled() {
            return failed(ToolFailure::Cancelled);
        }

        let result = match registration.host {
            HostType::Local => self.run_local(registration, call, arguments, session, cancel).await,
            HostType::Remote => {
                self.run_remote(registration, call, arguments, approved, session, cancel)
                    .await
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(failure) => failed(failure),
        }
    }

    fn request_approval(&self, session: &Session, call: &ToolCall) {
        session.hold(call);
        self.audit.log(
            AuditEvent::ApprovalRequested {
                tool_name: call.name.clone(),
                call_id: call.id.clone(),
            },
            session.id(),
            &call.name,
            AuditOutcome::Denied,
            None,
        );
    }

    async fn run_local(
        &self,
        registration: &Registration,
        call: &ToolCall,
        arguments: serde_json::Value,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, ToolFailure> {
        let handler = &registration.handler;
        let paths = self.resolve_paths(handler.as_ref(), call, &arguments, session)?;
        let input = ToolInput {
            call_id: call.id.clone(),
            arguments,
            paths,
        };

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ToolFailure::Cancelled),
            output = handler.execute(input) => output,
        };
        output.map(success).map_err(|failure| name_failure(failure, &call.name))
    }

    /// Resolve every declared path argument. Resolution is redone on every
    /// call; nothing about a path is remembered between calls.
    fn resolve_paths(
        &self,
        handler: &dyn ToolHandler,
        call: &ToolCall,
        arguments: &serde_json::Value,
        session: &Session,
    ) -> Result<ResolvedPaths, ToolFailure> {
        let declared = handler.path_arguments();
        let root = session.root(HostType::Local);
        let mut paths = ResolvedPaths::new(root.map(|r| r.path().to_path_buf()));
        if declared.is_empty() {
            return Ok(paths);
        }
        let Some(root) = root else {
            return Err(ToolFailure::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: "no workspace root is configured for local tools".into(),
            });
        };

        for name in declared {
            let Some(raw) = arguments.get(*name).and_then(|v| v.as_str()) else {
                continue;
            };
            match root.resolve(raw) {
                Ok(resolved) => paths.insert(*name, resolved),
                Err(PathError::Escape { path, root }) => {
                    self.deny_path(session, call, &path);
                    return Err(ToolFailure::PathEscape { path, root });
                }
                Err(e) => return Err(ToolFailure::invalid_arguments(e.to_string())),
            }
        }
        Ok(paths)
    }

    fn deny_path(&self, session: &Session, call: &ToolCall, path: &str) {
        warn!(call_id = %call.id, tool = %call.name, path = %path, "Path escapes workspace root");
        self.audit.log(
            AuditEvent::PathDenied { path: path.into() },
            session.id(),
            &call.name,
            AuditOutcome::Denied,
            Some(format!("call {}", call.id)),
        );
    }

    async fn run_remote(
        &self,
        registration: &Registration,
        call: &ToolCall,
        arguments: serde_json::Value,
        approved: bool,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, ToolFailure> {
        // The serving side resolves against its own root; reject what can
        // already be seen to climb out.
        for name in registration.handler.path_arguments() {
            if let Some(raw) = arguments.get(*name).and_then(|v| v.as_str())
                && !lexically_contained(raw)
            {
                self.deny_path(session, call, raw);
                return Err(ToolFailure::PathEscape {
                    path: raw.into(),
                    root: "remote workspace".into(),
                });
            }
        }

        let peer = session
            .peer(HostType::Remote)
            .ok_or_else(|| ToolFailure::RemoteUnavailable {
                reason: "no remote peer is attached to this session".into(),
            })?;
        let request = RemoteToolRequest {
            session_id: session.id().to_string(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments,
            // The serving side may gate a tool this side does not; a grant
            // held here answers for it.
            approved: approved || session.take_approval(call),
        };

        let timeout_ms = self.remote_timeout.as_millis() as u64;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ToolFailure::Cancelled),
            response = tokio::time::timeout(self.remote_timeout, peer.invoke(request)) => response,
        };
        match response {
            Err(_) => {
                warn!(call_id = %call.id, tool = %call.name, timeout_ms, "Remote tool call timed out");
                Err(ToolFailure::RemoteTimeout { timeout_ms })
            }
            Ok(Err(e)) => Err(ToolFailure::RemoteUnavailable { reason: e.to_string() }),
            Ok(Ok(response)) if matches!(response.outcome, ToolOutcome::PendingApproval) => {
                // Approval is decided on this side, so the hold lives here.
                self.request_approval(session, call);
                Ok(ToolOutcome::PendingApproval)
            }
            Ok(Ok(response)) => Ok(response.outcome),
        }
    }
}

fn failed(failure: ToolFailure) -> ToolOutcome {
    ToolOutcome::Failed { failure }
}

fn success(output: ToolOutput) -> ToolOutcome {
    ToolOutcome::Success {
        output: output.output,
        data: output.data,
    }
}

/// Handlers may leave `tool_name` blank on execution failures.
fn name_failure(failure: ToolFailure, tool: &str) -> ToolFailure {
    match failure {
        ToolFailure::ExecutionFailed { tool_name, reason } if tool_name.is_empty() => {
            ToolFailure::ExecutionFailed {
                tool_name: tool.to_string(),
                reason,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Typed, TypedTool};
    use crate::remote::{ChannelPeer, RemoteEndpoint};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use skein_core::tool::InvalidReason;
    use skein_security::WorkspaceRoot;

    /// Writes `content` to `path`; gated behind approval.
    struct Touch;

    #[derive(Deserialize)]
    struct TouchArgs {
        content: String,
    }

    #[async_trait]
    impl TypedTool for Touch {
        type Args = TouchArgs;

        fn name(&self) -> &str {
            "touch"
        }

        fn description(&self) -> &str {
            "Write a file"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"]
            })
        }

        fn path_arguments(&self) -> &[&'static str] {
            &["path"]
        }

        fn requires_permission(&self) -> bool {
            true
        }

        async fn run(&self, args: TouchArgs, paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
            let path = paths.get("path")?;
            std::fs::write(path, &args.content).map_err(|e| ToolFailure::ExecutionFailed {
                tool_name: String::new(),
                reason: e.to_string(),
            })?;
            Ok(ToolOutput::text(format!("wrote {}", path.display())))
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"path": {"type": "string"}}})
        }

        fn path_arguments(&self) -> &[&'static str] {
            &["path"]
        }

        async fn execute(&self, input: ToolInput) -> Result<ToolOutput, ToolFailure> {
            Ok(ToolOutput::text(input.arguments.to_string()))
        }
    }

    fn workspace() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path(), HostType::Local).unwrap();
        (dir, Session::new("test").with_root(root))
    }

    fn router() -> Router {
        let mut router = Router::new().with_audit(Arc::new(AuditLogger::new()));
        router.register_local(Arc::new(Typed(Touch)));
        router.register_local(Arc::new(Echo));
        router
    }

    async fn dispatch(router: &Router, call: &ToolCall, session: &Session) -> ToolResult {
        router.dispatch(call, session, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn unknown_tool() {
        let (_dir, session) = workspace();
        let call = ToolCall::parsed("c1", "nope", json!({}));
        let result = dispatch(&router(), &call, &session).await;
        assert_eq!(result.failure(), Some(&ToolFailure::UnknownTool { name: "nope".into() }));
    }

    #[tokio::test]
    async fn unparsed_call_is_invalid_arguments() {
        let (_dir, session) = workspace();
        let mut call = ToolCall::open("c1", "echo");
        call.status = CallStatus::Invalid(InvalidReason::Truncated);
        let result = dispatch(&router(), &call, &session).await;
        assert!(matches!(
            result.failure(),
            Some(ToolFailure::InvalidArguments { reason: Some(r), .. }) if r.contains("stream ended")
        ));
    }

    #[tokio::test]
    async fn missing_required_fields_are_listed() {
        let (_dir, session) = workspace();
        session.approve_tool("touch");
        let call = ToolCall::parsed("c1", "touch", json!({"path": "a.txt"}));
        let result = dispatch(&router(), &call, &session).await;
        assert!(matches!(
            result.failure(),
            Some(ToolFailure::InvalidArguments { missing, .. }) if missing == &["content"]
        ));
    }

    #[tokio::test]
    async fn gated_call_waits_for_approval_then_runs() {
        let (dir, session) = workspace();
        let router = router();
        let call = ToolCall::parsed("c1", "touch", json!({"path": "out.txt", "content": "hi"}));

        let result = dispatch(&router, &call, &session).await;
        assert!(result.is_pending());
        assert!(!dir.path().join("out.txt").exists());
        assert_eq!(session.pending_calls(), vec![call.clone()]);

        session.approve_call("c1");
        let held = session.take_pending();
        let result = dispatch(&router, &held[0], &session).await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn reused_call_id_needs_its_own_approval() {
        let (dir, session) = workspace();
        let mut router = router();
        router.register(Registration::local(Arc::new(Echo)).requiring_permission(true));

        let write = ToolCall::parsed("c1", "touch", json!({"path": "out.txt", "content": "hi"}));
        assert!(dispatch(&router, &write, &session).await.is_pending());
        assert!(session.approve_call("c1"));
        let held = session.take_pending();
        assert!(dispatch(&router, &held[0], &session).await.is_success());
        session.clear_call_approvals();

        // A later turn reuses the id for a different gated tool.
        let other = ToolCall::parsed("c1", "echo", json!({"path": "x"}));
        assert!(dispatch(&router, &other, &session).await.is_pending());

        // The grant was used by the first dispatch.
        std::fs::remove_file(dir.path().join("out.txt")).unwrap();
        session.take_pending();
        assert!(dispatch(&router, &write, &session).await.is_pending());
        assert!(!dir.path().join("out.txt").exists());

        let granted = router
            .audit()
            .entries()
            .into_iter()
            .filter(|e| matches!(e.event, AuditEvent::ApprovalGranted { .. }))
            .count();
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn path_escape_performs_no_io() {
        let (dir, session) = workspace();
        session.approve_tool("touch");
        let router = router();
        let outside = dir.path().parent().unwrap().join("escaped.txt");
        let call = ToolCall::parsed("c1", "touch", json!({"path": "../escaped.txt", "content": "x"}));

        let result = dispatch(&router, &call, &session).await;
        let failure = result.failure().unwrap();
        assert!(matches!(failure, ToolFailure::PathEscape { .. }));
        assert!(failure.is_halting());
        assert!(!outside.exists());
        assert_eq!(router.audit().entries_by_outcome(&AuditOutcome::Denied).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_execution() {
        let (_dir, session) = workspace();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let call = ToolCall::parsed("c1", "echo", json!({}));
        let result = router().dispatch(&call, &session, &cancel).await;
        assert_eq!(result.failure(), Some(&ToolFailure::Cancelled));
    }

    #[tokio::test]
    async fn remote_call_round_trips_through_endpoint() {
        // Serving side: its own router and its own workspace root.
        let served = tempfile::tempdir().unwrap();
        let mut serving_router = Router::new();
        serving_router.register_local(Arc::new(Echo));
        let serving_session = Session::new("serving")
            .with_root(WorkspaceRoot::new(served.path(), HostType::Local).unwrap());
        let endpoint = RemoteEndpoint::new(Arc::new(serving_router), Arc::new(serving_session));

        let mut router = Router::new();
        router.register(Registration::remote(Arc::new(Echo)));
        let session = Session::new("caller")
            .with_peer(HostType::Remote, Arc::new(ChannelPeer::spawn("peer", endpoint)));

        let call = ToolCall::parsed("c1", "echo", json!({"path": "docs/a.md"}));
        let result = dispatch(&router, &call, &session).await;
        assert!(result.is_success(), "{result:?}");
        assert!(result.render().contains("docs/a.md"));

        let call = ToolCall::parsed("c2", "echo", json!({"path": "../../etc/passwd"}));
        let result = dispatch(&router, &call, &session).await;
        assert!(matches!(result.failure(), Some(ToolFailure::PathEscape { .. })));
    }

    #[tokio::test]
    async fn remote_gated_tool_is_held_by_the_caller() {
        let served = tempfile::tempdir().unwrap();
        let mut serving_router = Router::new();
        serving_router.register(Registration::local(Arc::new(Echo)).requiring_permission(true));
        let serving_session = Arc::new(
            Session::new("serving").with_root(WorkspaceRoot::new(served.path(), HostType::Local).unwrap()),
        );
        let endpoint = RemoteEndpoint::new(Arc::new(serving_router), serving_session.clone());

        let mut router = Router::new();
        router.register(Registration::remote(Arc::new(Echo)));
        let session = Session::new("caller")
            .with_peer(HostType::Remote, Arc::new(ChannelPeer::spawn("peer", endpoint)));

        let call = ToolCall::parsed("c1", "echo", json!({"path": "notes.md"}));
        assert!(dispatch(&router, &call, &session).await.is_pending());
        assert_eq!(session.pending_calls(), vec![call.clone()]);
        assert!(!serving_session.has_pending());

        assert!(session.approve_call("c1"));
        let held = session.take_pending();
        let result = dispatch(&router, &held[0], &session).await;
        assert!(result.is_success(), "{result:?}");
        assert!(result.render().contains("notes.md"));

        // The approval does not carry over to the next call.
        let again = ToolCall::parsed("c2", "echo", json!({"path": "notes.md"}));
        assert!(dispatch(&router, &again, &session).await.is_pending());
    }

    #[tokio::test]
    async fn remote_without_peer_is_unavailable() {
        let mut router = Router::new();
        router.register(Registration::remote(Arc::new(Echo)));
        let call = ToolCall::parsed("c1", "echo", json!({}));
        let result = dispatch(&router, &call, &Session::new("s")).await;
        assert!(matches!(result.failure(), Some(ToolFailure::RemoteUnavailable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (peer, _receiver) = ChannelPeer::channel("silent", 4);
        let mut router = Router::new().with_remote_timeout(Duration::from_millis(250));
        router.register(Registration::remote(Arc::new(Echo)));
        let session = Session::new("s").with_peer(HostType::Remote, Arc::new(peer));

        let call = ToolCall::parsed("c1", "echo", json!({}));
        let result = dispatch(&router, &call, &session).await;
        assert_eq!(result.failure(), Some(&ToolFailure::RemoteTimeout { timeout_ms: 250 }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_remote_wait() {
        let (peer, _receiver) = ChannelPeer::channel("silent", 4);
        let mut router = Router::new();
        router.register(Registration::remote(Arc::new(Echo)));
        let session = Session::new("s").with_peer(HostType::Remote, Arc::new(peer));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let call = ToolCall::parsed("c1", "echo", json!({}));
        let result = router.dispatch(&call, &session, &cancel).await;
        assert_eq!(result.failure(), Some(&ToolFailure::Cancelled));
        assert!(started.elapsed() < DEFAULT_REMOTE_TIMEOUT);
    }
}
