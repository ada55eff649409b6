//! Tool handlers: the executable half of a tool registration.
//!
//! Handlers never see raw path strings: every argument a handler declares in
//! [`ToolHandler::path_arguments`] is resolved against the session's workspace
//! root by the router before `execute` runs.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use skein_core::error::ToolFailure;
use skein_core::tool::ToolDefinition;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Paths the router resolved for this invocation.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPaths {
    root: Option<PathBuf>,
    paths: HashMap<String, PathBuf>,
}

impl ResolvedPaths {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            paths: HashMap::new(),
        }
    }

    pub fn insert(&mut self, argument: impl Into<String>, path: PathBuf) {
        self.paths.insert(argument.into(), path);
    }

    /// The resolved path for a required argument.
    pub fn get(&self, argument: &str) -> Result<&Path, ToolFailure> {
        self.paths
            .get(argument)
            .map(PathBuf::as_path)
            .ok_or_else(|| ToolFailure::InvalidArguments {
                missing: vec![argument.to_string()],
                mismatched: vec![],
                reason: None,
            })
    }

    /// The resolved path for an optional argument, defaulting to the root.
    pub fn get_or_root(&self, argument: &str) -> Result<&Path, ToolFailure> {
        if let Some(path) = self.paths.get(argument) {
            return Ok(path);
        }
        self.root.as_deref().ok_or_else(|| ToolFailure::ExecutionFailed {
            tool_name: String::new(),
            reason: "no workspace root is configured".into(),
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

/// Everything a handler receives for one call.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub call_id: String,
    /// Arguments already validated against the parameter schema.
    pub arguments: serde_json::Value,
    pub paths: ResolvedPaths,
}

/// What a handler returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub output: String,
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A named capability the model can invoke.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Arguments holding workspace paths.
    fn path_arguments(&self) -> &[&'static str] {
        &[]
    }

    /// Whether calls need explicit approval before they run.
    fn requires_permission(&self) -> bool {
        false
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput, ToolFailure>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A tool whose arguments decode into a concrete type.
///
/// Wrap it in [`Typed`] to register it; decoding happens exactly once, after
/// schema validation, and a decode failure is `InvalidArguments`.
#[async_trait]
pub trait TypedTool: Send + Sync {
    type Args: DeserializeOwned + Send;

    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    fn path_arguments(&self) -> &[&'static str] {
        &[]
    }

    fn requires_permission(&self) -> bool {
        false
    }

    async fn run(&self, args: Self::Args, paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure>;
}

/// Adapter from [`TypedTool`] to [`ToolHandler`].
pub struct Typed<T>(pub T);

#[async_trait]
impl<T: TypedTool> ToolHandler for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.0.parameters_schema()
    }

    fn path_arguments(&self) -> &[&'static str] {
        self.0.path_arguments()
    }

    fn requires_permission(&self) -> bool {
        self.0.requires_permission()
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput, ToolFailure> {
        let args: T::Args = serde_json::from_value(input.arguments)
            .map_err(|e| ToolFailure::invalid_arguments(e.to_string()))?;
        self.0.run(args, &input.paths).await
    }
}
