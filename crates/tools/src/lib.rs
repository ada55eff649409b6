//! Tool routing for Skein.
//!
//! The [`Router`] validates each call against its handler's schema, holds
//! permission-gated calls for approval, resolves path arguments inside the
//! session's workspace root and executes the call in-process or on a remote
//! peer. Failures come back as [`ToolResult`](skein_core::tool::ToolResult)s;
//! dispatch itself never errors.

pub mod builtins;
pub mod handler;
pub mod remote;
pub mod router;
pub mod schema;
pub mod session;

pub use builtins::{BuiltinDeps, register_builtins};
pub use handler::{ResolvedPaths, ToolHandler, ToolInput, ToolOutput, Typed, TypedTool};
pub use remote::{ChannelPeer, RemoteEndpoint, RemoteError, RemotePeer, RemoteToolRequest, RemoteToolResponse};
pub use router::{DEFAULT_REMOTE_TIMEOUT, Registration, Router};
pub use session::Session;
