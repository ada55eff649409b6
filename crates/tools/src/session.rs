//! Per-session tool state: workspace roots, remote peers, and approvals.

use crate::remote::RemotePeer;
use skein_core::tool::{HostType, ToolCall};
use skein_security::WorkspaceRoot;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct ApprovalLedger {
    tools: HashSet<String>,
    /// Calls held for approval, in the order they were held.
    pending: Vec<ToolCall>,
    /// One-shot grants. Each matches a single call (id, name and arguments)
    /// and is used up by the dispatch it authorizes.
    grants: Vec<ToolCall>,
}

/// State one conversation's tool calls run against.
///
/// A session owns its ledger; nothing about approvals is global.
pub struct Session {
    id: String,
    roots: HashMap<HostType, WorkspaceRoot>,
    peers: HashMap<HostType, Arc<dyn RemotePeer>>,
    approvals: Mutex<ApprovalLedger>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("roots", &self.roots)
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roots: HashMap::new(),
            peers: HashMap::new(),
            approvals: Mutex::new(ApprovalLedger::default()),
        }
    }

    /// Bind a workspace root; it serves the host type it was created for.
    pub fn with_root(mut self, root: WorkspaceRoot) -> Self {
        self.roots.insert(root.host(), root);
        self
    }

    pub fn with_peer(mut self, host: HostType, peer: Arc<dyn RemotePeer>) -> Self {
        self.peers.insert(host, peer);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self, host: HostType) -> Option<&WorkspaceRoot> {
        self.roots.get(&host)
    }

    pub fn peer(&self, host: HostType) -> Option<Arc<dyn RemotePeer>> {
        self.peers.get(&host).cloned()
    }

    fn ledger(&self) -> MutexGuard<'_, ApprovalLedger> {
        self.approvals.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Approve the held call with this id. Returns false when no such
    /// call is held; an id alone never authorizes anything.
    pub fn approve_call(&self, call_id: &str) -> bool {
        let mut ledger = self.ledger();
        let Some(call) = ledger.pending.iter().find(|c| c.id == call_id).cloned() else {
            return false;
        };
        if !ledger.grants.contains(&call) {
            ledger.grants.push(call);
        }
        true
    }

    /// Grant exactly `call`, held or not. Used where the approval was
    /// decided elsewhere, such as a remote caller.
    pub fn grant(&self, call: &ToolCall) {
        let mut ledger = self.ledger();
        if !ledger.grants.contains(call) {
            ledger.grants.push(call.clone());
        }
    }

    /// Approve every call to `tool` for the rest of the session.
    pub fn approve_tool(&self, tool: impl Into<String>) {
        self.ledger().tools.insert(tool.into());
    }

    /// Whether `call` may run. A standing tool approval always answers; a
    /// call grant answers once and is then gone.
    pub fn take_approval(&self, call: &ToolCall) -> bool {
        let mut ledger = self.ledger();
        if ledger.tools.contains(&call.name) {
            return true;
        }
        match ledger.grants.iter().position(|g| g == call) {
            Some(index) => {
                ledger.grants.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop unused call grants. Tool approvals survive.
    pub fn clear_call_approvals(&self) {
        self.ledger().grants.clear();
    }

    /// Drop any hold or grant for this call id.
    pub fn forget(&self, call_id: &str) {
        let mut ledger = self.ledger();
        ledger.pending.retain(|c| c.id != call_id);
        ledger.grants.retain(|c| c.id != call_id);
    }

    /// Hold `call` until it is approved. Holding the same id twice keeps
    /// one entry.
    pub fn hold(&self, call: &ToolCall) {
        let mut ledger = self.ledger();
        if !ledger.pending.iter().any(|c| c.id == call.id) {
            ledger.pending.push(call.clone());
        }
    }

    pub fn pending_calls(&self) -> Vec<ToolCall> {
        self.ledger().pending.clone()
    }

    /// Remove and return every held call.
    pub fn take_pending(&self) -> Vec<ToolCall> {
        std::mem::take(&mut self.ledger().pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.ledger().pending.is_empty()
    }
}
