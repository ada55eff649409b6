//! Workspace file tools. Every path arrives already resolved inside the
//! session's workspace root.

use crate::handler::{ResolvedPaths, ToolOutput, TypedTool};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use skein_core::error::ToolFailure;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Files larger than this are truncated on read.
const MAX_READ_BYTES: usize = 256 * 1024;

fn io_failure(tool: &str, path: &Path, e: std::io::Error) -> ToolFailure {
    ToolFailure::ExecutionFailed {
        tool_name: tool.into(),
        reason: format!("{}: {e}", path.display()),
    }
}

pub struct ReadFile;

/// `path` is consumed by resolution; nothing else to decode.
#[derive(Debug, Deserialize)]
pub struct ReadFileArgs {}

#[async_trait]
impl TypedTool for ReadFile {
    type Args = ReadFileArgs;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    fn path_arguments(&self) -> &[&'static str] {
        &["path"]
    }

    async fn run(&self, _args: ReadFileArgs, paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let path = paths.get("path")?;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| io_failure(self.name(), path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_failure(self.name(), path, e))?
            .len();

        // One byte past the limit tells us the file was cut short.
        let mut bytes = Vec::with_capacity(MAX_READ_BYTES.min(size as usize) + 1);
        file.take(MAX_READ_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| io_failure(self.name(), path, e))?;

        let truncated = bytes.len() > MAX_READ_BYTES;
        bytes.truncate(MAX_READ_BYTES);
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if truncated {
            text.push_str(&format!("\n[truncated: {MAX_READ_BYTES} of {size} bytes shown]"));
        }
        Ok(ToolOutput::text(text).with_data(json!({"bytes": size, "truncated": truncated})))
    }
}

pub struct WriteFile;

#[derive(Debug, Deserialize)]
pub struct WriteFileArgs {
    content: String,
}

#[async_trait]
impl TypedTool for WriteFile {
    type Args = WriteFileArgs;

    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a workspace file, creating parent directories. Overwrites existing files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"},
                "content": {"type": "string", "description": "The content to write"}
            },
            "required": ["path", "content"]
        })
    }

    fn path_arguments(&self) -> &[&'static str] {
        &["path"]
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn run(&self, args: WriteFileArgs, paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let path = paths.get("path")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure(self.name(), parent, e))?;
        }
        tokio::fs::write(path, &args.content)
            .await
            .map_err(|e| io_failure(self.name(), path, e))?;
        Ok(ToolOutput::text(format!(
            "Wrote {} bytes to {}",
            args.content.len(),
            path.display()
        )))
    }
}

pub struct ListDir;

#[derive(Debug, Deserialize)]
pub struct ListDirArgs {}

#[async_trait]
impl TypedTool for ListDir {
    type Args = ListDirArgs;

    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory (defaults to the workspace root)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the workspace root"}
            }
        })
    }

    fn path_arguments(&self) -> &[&'static str] {
        &["path"]
    }

    async fn run(&self, _args: ListDirArgs, paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let dir = paths.get_or_root("path").map_err(|failure| match failure {
            ToolFailure::ExecutionFailed { reason, .. } => ToolFailure::ExecutionFailed {
                tool_name: self.name().into(),
                reason,
            },
            other => other,
        })?;

        let mut reader = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| io_failure(self.name(), dir, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_failure(self.name(), dir, e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let output = if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        };
        Ok(ToolOutput::text(output).with_data(json!({"entries": entries})))
    }
}
