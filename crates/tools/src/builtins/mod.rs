//! Built-in tools: workspace files, the job backlog and memory notes.

pub mod fs;
pub mod jobs;
pub mod memory;

use crate::handler::Typed;
use crate::router::Router;
use skein_jobs::JobStore;
use skein_memory::NoteStore;
use std::sync::Arc;

/// Stores the stateful built-ins operate on. Tools whose store is absent are
/// not registered.
#[derive(Default, Clone)]
pub struct BuiltinDeps {
    pub jobs: Option<Arc<JobStore>>,
    pub notes: Option<Arc<NoteStore>>,
}

/// Register every built-in tool whose dependencies are available.
pub fn register_builtins(router: &mut Router, deps: BuiltinDeps) {
    router
        .register_local(Arc::new(Typed(fs::ReadFile)))
        .register_local(Arc::new(Typed(fs::WriteFile)))
        .register_local(Arc::new(Typed(fs::ListDir)));

    if let Some(store) = deps.jobs {
        router
            .register_local(Arc::new(Typed(jobs::CreateJob::new(store.clone()))))
            .register_local(Arc::new(Typed(jobs::UpdateJob::new(store.clone()))))
            .register_local(Arc::new(Typed(jobs::ListJobs::new(store.clone()))))
            .register_local(Arc::new(Typed(jobs::DeleteJob::new(store.clone()))))
            .register_local(Arc::new(Typed(jobs::PruneJobs::new(store))));
    }
    if let Some(notes) = deps.notes {
        router.register_local(Arc::new(Typed(memory::CreateMemory::new(notes))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use serde_json::json;
    use skein_core::tool::{HostType, ToolCall};
    use skein_jobs::InMemoryJobBackend;
    use skein_security::WorkspaceRoot;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn registers_only_available_tools() {
        let mut router = Router::new();
        register_builtins(&mut router, BuiltinDeps::default());
        assert_eq!(router.names(), vec!["list_dir", "read_file", "write_file"]);

        let jobs = JobStore::open(Arc::new(InMemoryJobBackend::default())).await.unwrap();
        let mut router = Router::new();
        register_builtins(
            &mut router,
            BuiltinDeps {
                jobs: Some(Arc::new(jobs)),
                notes: Some(Arc::new(NoteStore::in_memory())),
            },
        );
        assert_eq!(router.definitions().len(), 9);
        assert!(router.get("delete_job").unwrap().requires_permission);
        assert!(router.get("prune_jobs").unwrap().requires_permission);
        assert!(!router.get("list_jobs").unwrap().requires_permission);
    }

    #[tokio::test]
    async fn write_file_is_gated_through_the_router() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("s").with_root(WorkspaceRoot::new(dir.path(), HostType::Local).unwrap());
        let mut router = Router::new();
        register_builtins(&mut router, BuiltinDeps::default());
        let cancel = CancellationToken::new();

        let call = ToolCall::parsed("w1", "write_file", json!({"path": "notes/todo.md", "content": "- ship"}));
        assert!(router.dispatch(&call, &session, &cancel).await.is_pending());

        session.approve_tool("write_file");
        assert!(router.dispatch(&call, &session, &cancel).await.is_success());

        let read = ToolCall::parsed("r1", "read_file", json!({"path": "notes/todo.md"}));
        assert_eq!(router.dispatch(&read, &session, &cancel).await.render(), "- ship");
    }
}
