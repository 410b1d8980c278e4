//! Built-in tools.
//!
//! A small default toolbox covering the filesystem, the web, and text
//! utilities. Each tool is a concrete value implementing [`Tool`]; the
//! controller registers the set returned by [`default_toolbox`] at startup.
//!
//! Bodies are intentionally thin — real capability lives behind the
//! [`Tool`] contract, and anything heavier belongs in a plugin.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tool::{Permission, Tool, ToolCategory, ToolDefinition, ToolOutput};

/// The tools registered by default at controller startup.
#[must_use]
pub fn default_toolbox() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(EchoTool),
        Arc::new(FsReadTool),
        Arc::new(FsWriteTool),
        Arc::new(FsListDirTool),
        Arc::new(WebFetchTool::default()),
        Arc::new(SentimentTool),
    ]
}

fn str_param(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Echoes its input back. Useful for wiring and scheduler tests.
#[derive(Debug, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("utility.echo", "Echo the given text back", ToolCategory::Utility)
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to echo"}
                },
                "required": ["text"]
            }))
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        match str_param(&params, "text") {
            Some(text) => ToolOutput::ok(json!({ "text": text })),
            None => ToolOutput::fail("missing 'text' parameter"),
        }
    }
}

/// Reads a UTF-8 file from disk.
#[derive(Debug, Clone, Copy)]
pub struct FsReadTool;

#[async_trait]
impl Tool for FsReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "filesystem.read_file",
            "Read the contents of a text file",
            ToolCategory::Filesystem,
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to read"}
            },
            "required": ["path"]
        }))
        .with_permission(Permission::FilesystemRead)
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        let Some(path) = str_param(&params, "path") else {
            return ToolOutput::fail("missing 'path' parameter");
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolOutput::ok(json!({ "path": path, "content": content }))
                .with_metadata("bytes", json!(content.len())),
            Err(err) => ToolOutput::fail(format!("failed to read '{path}': {err}")),
        }
    }
}

/// Writes a UTF-8 file to disk, creating parent directories as needed.
#[derive(Debug, Clone, Copy)]
pub struct FsWriteTool;

#[async_trait]
impl Tool for FsWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "filesystem.write_file",
            "Write text content to a file",
            ToolCategory::Filesystem,
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Destination path"},
                "content": {"type": "string", "description": "Text to write"}
            },
            "required": ["path", "content"]
        }))
        .with_permission(Permission::FilesystemWrite)
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        let (Some(path), Some(content)) =
            (str_param(&params, "path"), str_param(&params, "content"))
        else {
            return ToolOutput::fail("missing 'path' or 'content' parameter");
        };
        if let Some(parent) = std::path::Path::new(&path).parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            return ToolOutput::fail(format!("failed to create parent dirs: {err}"));
        }
        match tokio::fs::write(&path, content.as_bytes()).await {
            Ok(()) => ToolOutput::ok(json!({ "path": path, "bytes_written": content.len() })),
            Err(err) => ToolOutput::fail(format!("failed to write '{path}': {err}")),
        }
    }
}

/// Lists the entries of a directory.
#[derive(Debug, Clone, Copy)]
pub struct FsListDirTool;

#[async_trait]
impl Tool for FsListDirTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "filesystem.list_dir",
            "List the entries of a directory",
            ToolCategory::Filesystem,
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list"}
            },
            "required": ["path"]
        }))
        .with_permission(Permission::FilesystemRead)
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        let Some(path) = str_param(&params, "path") else {
            return ToolOutput::fail("missing 'path' parameter");
        };
        let mut read_dir = match tokio::fs::read_dir(&path).await {
            Ok(read_dir) => read_dir,
            Err(err) => return ToolOutput::fail(format!("failed to list '{path}': {err}")),
        };
        let mut entries = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => entries.push(entry.file_name().to_string_lossy().into_owned()),
                Ok(None) => break,
                Err(err) => return ToolOutput::fail(format!("failed to list '{path}': {err}")),
            }
        }
        entries.sort();
        ToolOutput::ok(json!({ "path": path, "entries": entries }))
    }
}

/// Fetches a URL and returns the response body as text.
#[derive(Debug, Clone, Copy)]
pub struct WebFetchTool {
    /// Maximum body length in characters before truncation.
    pub max_output_length: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self {
            max_output_length: 40_000,
            timeout_secs: 20,
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "web.fetch",
            "Fetch a URL over HTTP(S) and return the response body as text",
            ToolCategory::Web,
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "format": "uri",
                    "description": "The URL to fetch (http or https)"
                }
            },
            "required": ["url"]
        }))
        .with_permission(Permission::Network)
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        let Some(url) = str_param(&params, "url") else {
            return ToolOutput::fail("missing 'url' parameter");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::fail("URL must start with http:// or https://");
        }

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(err) => return ToolOutput::fail(format!("failed to build client: {err}")),
        };

        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return ToolOutput::fail("request timed out"),
            Err(err) => return ToolOutput::fail(format!("error fetching '{url}': {err}")),
        };
        let status = response.status();
        if !status.is_success() {
            return ToolOutput::fail(format!("HTTP error: {status}"));
        }

        match response.text().await {
            Ok(mut body) => {
                let truncated = body.len() > self.max_output_length;
                if truncated {
                    body.truncate(self.max_output_length);
                }
                ToolOutput::ok(json!({ "url": url, "body": body }))
                    .with_metadata("truncated", json!(truncated))
            }
            Err(err) => ToolOutput::fail(format!("failed to read response: {err}")),
        }
    }
}

/// Rule-based sentiment classifier over a small lexicon.
#[derive(Debug, Clone, Copy)]
pub struct SentimentTool;

const POSITIVE: &[&str] = &[
    "great", "good", "excellent", "wonderful", "happy", "love", "amazing", "fantastic",
];
const NEGATIVE: &[&str] = &[
    "bad", "terrible", "awful", "horrible", "hate", "poor", "dreadful", "worst",
];

#[async_trait]
impl Tool for SentimentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "text.sentiment",
            "Classify text sentiment as positive, negative, or neutral",
            ToolCategory::Data,
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Text to analyse"}
            },
            "required": ["text"]
        }))
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        let Some(text) = str_param(&params, "text") else {
            return ToolOutput::fail("missing 'text' parameter");
        };
        let lowered = text.to_lowercase();
        let words: HashSet<&str> = lowered.split_whitespace().collect();
        let pos = words.iter().filter(|w| POSITIVE.contains(*w)).count();
        let neg = words.iter().filter(|w| NEGATIVE.contains(*w)).count();
        let total = words.len().max(1) as f64;

        let (label, score) = if pos > neg {
            ("positive", pos as f64 / total)
        } else if neg > pos {
            ("negative", -(neg as f64) / total)
        } else {
            ("neutral", 0.0)
        };

        ToolOutput::ok(json!({
            "label": label,
            "score": (score * 1000.0).round() / 1000.0,
            "word_count": words.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[tokio::test]
    async fn test_echo_tool() {
        let output = EchoTool.execute(json!({"text": "hi"})).await;
        assert!(output.success);
        assert_eq!(output.data.expect("data")["text"], "hi");
    }

    #[tokio::test]
    async fn test_fs_read_write_round_trip() {
        let dir = assert_fs::TempDir::new().expect("temp dir");
        let path = dir.child("note.txt");

        let output = FsWriteTool
            .execute(json!({"path": path.path(), "content": "hello"}))
            .await;
        assert!(output.success);

        let output = FsReadTool.execute(json!({"path": path.path()})).await;
        assert!(output.success);
        assert_eq!(output.data.expect("data")["content"], "hello");
    }

    #[tokio::test]
    async fn test_fs_read_missing_file_fails_totally() {
        let output = FsReadTool
            .execute(json!({"path": "/nonexistent/definitely-not-here"}))
            .await;
        assert!(!output.success);
        assert!(output.error.is_some());
    }

    #[tokio::test]
    async fn test_fs_list_dir() {
        let dir = assert_fs::TempDir::new().expect("temp dir");
        dir.child("b.txt").touch().expect("touch");
        dir.child("a.txt").touch().expect("touch");

        let output = FsListDirTool.execute(json!({"path": dir.path()})).await;
        assert!(output.success);
        let entries = output.data.expect("data")["entries"].clone();
        assert_eq!(entries, json!(["a.txt", "b.txt"]));
    }

    #[tokio::test]
    async fn test_web_fetch_rejects_non_http() {
        let output = WebFetchTool::default()
            .execute(json!({"url": "file:///etc/passwd"}))
            .await;
        assert!(!output.success);
    }

    #[tokio::test]
    async fn test_sentiment_labels() {
        let positive = SentimentTool
            .execute(json!({"text": "what a great and wonderful day"}))
            .await;
        assert_eq!(positive.data.expect("data")["label"], "positive");

        let negative = SentimentTool
            .execute(json!({"text": "that was a terrible awful experience"}))
            .await;
        assert_eq!(negative.data.expect("data")["label"], "negative");

        let neutral = SentimentTool
            .execute(json!({"text": "the package arrived on tuesday"}))
            .await;
        assert_eq!(neutral.data.expect("data")["label"], "neutral");
    }

    #[test]
    fn test_default_toolbox_has_unique_names() {
        let toolbox = default_toolbox();
        let names: HashSet<String> = toolbox.iter().map(|t| t.definition().name).collect();
        assert_eq!(names.len(), toolbox.len());
    }
}
