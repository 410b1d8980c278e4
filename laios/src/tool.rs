//! Tool trait, capability records, and the tool registry.
//!
//! A tool is a named capability with a JSON-schema-shaped parameter
//! definition and an async body. The registry maps fully-qualified names
//! (e.g. `filesystem.read_file`) to tool instances and drives the
//! validation pipeline on every invocation:
//!
//! 1. look up the tool;
//! 2. validate parameters against the declared schema;
//! 3. run the tool's optional extra `validate` hook;
//! 4. invoke the body;
//! 5. wrap any error into a failed [`ToolOutput`].
//!
//! Tool bodies must be total — no error escapes step 4 as anything other
//! than `success=false`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Functional category of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Local filesystem access.
    Filesystem,
    /// Shell and process execution.
    Shell,
    /// Network and web access.
    Web,
    /// Data transformation.
    Data,
    /// Miscellaneous helpers.
    Utility,
}

/// Permission a tool requires before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Read files from disk.
    FilesystemRead,
    /// Write files to disk.
    FilesystemWrite,
    /// Execute shell commands.
    ShellExec,
    /// Open network connections.
    Network,
    /// Read or write agent memory.
    Memory,
    /// Inspect system state.
    System,
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Output payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolOutput {
    /// Create a successful output.
    #[must_use]
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed output.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Capability record describing a tool to the registry and to LLM prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Fully-qualified tool name (e.g. `filesystem.read_file`).
    pub name: String,
    /// What the tool does; shown to the model for tool choice.
    pub description: String,
    /// Functional category.
    pub category: ToolCategory,
    /// JSON-schema-shaped parameter definition.
    pub parameters: Value,
    /// Permissions required to run the tool.
    #[serde(default)]
    pub required_permissions: HashSet<Permission>,
}

impl ToolDefinition {
    /// Create a definition with an empty object schema.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            parameters: json!({"type": "object", "properties": {}, "required": []}),
            required_permissions: HashSet::new(),
        }
    }

    /// Replace the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add a required permission.
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.required_permissions.insert(permission);
        self
    }
}

/// Trait for executable tools.
///
/// Implementations are registered with the [`ToolRegistry`] and invoked by
/// the executor. `execute` must be total: every failure is reported through
/// [`ToolOutput::fail`], never by panicking.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The capability record for this tool.
    fn definition(&self) -> ToolDefinition;

    /// Optional extra validation beyond the parameter schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the parameters are structurally
    /// valid but semantically unacceptable.
    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    /// Execute the tool body.
    async fn execute(&self, params: Value) -> ToolOutput;
}

/// Validate `params` against a JSON-schema-shaped `parameters` value.
///
/// Checks that every `required` property is present and that each provided
/// property matches its declared primitive `type` tag. Unknown properties
/// are allowed.
///
/// # Errors
///
/// Returns [`Error::Validation`] describing the first mismatch.
pub fn validate_against_schema(schema: &Value, params: &Value) -> Result<()> {
    let Some(obj) = params.as_object() else {
        return Err(Error::validation("parameters must be a JSON object"));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(Error::validation(format!(
                    "missing required parameter '{name}'"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in obj {
            let Some(expected) = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(Error::validation(format!(
                    "parameter '{name}' should be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}

/// Name-keyed registry of tool instances.
///
/// Shared across sessions; safe for concurrent reads and infrequent writes.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the definition is missing a name
    /// or description, or when the name is already taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let definition = tool.definition();
        if definition.name.is_empty() {
            return Err(Error::validation("tool is missing a name"));
        }
        if definition.description.is_empty() {
            return Err(Error::validation(format!(
                "tool '{}' is missing a description",
                definition.name
            )));
        }
        if !definition.parameters.is_object() {
            return Err(Error::validation(format!(
                "tool '{}' has a non-object parameter schema",
                definition.name
            )));
        }

        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        if tools.contains_key(&definition.name) {
            return Err(Error::validation(format!(
                "tool '{}' is already registered",
                definition.name
            )));
        }
        tools.insert(definition.name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .map(Arc::clone)
    }

    /// Returns `true` if a tool with this name is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .contains_key(name)
    }

    /// List the definitions of every registered tool, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .values()
            .map(|t| t.definition())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Remove a tool. Returns `true` if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Remove every tool.
    pub fn clear(&self) {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .clear();
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().expect("tool registry lock poisoned").len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The OpenAI-function-shaped schema for one tool, for LLM tool choice.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<Value> {
        self.get(name).map(|tool| {
            let definition = tool.definition();
            json!({
                "name": definition.name,
                "description": definition.description,
                "parameters": definition.parameters,
            })
        })
    }

    /// Execute a tool through the full validation pipeline.
    ///
    /// Never returns an error: every failure mode is reported through a
    /// failed [`ToolOutput`].
    pub async fn execute(&self, name: &str, params: Value) -> ToolOutput {
        let Some(tool) = self.get(name) else {
            return ToolOutput::fail(format!("Tool not found: {name}"));
        };
        let definition = tool.definition();

        if let Err(err) = validate_against_schema(&definition.parameters, &params) {
            return ToolOutput::fail(format!("Invalid parameters: {err}"));
        }
        if let Err(err) = tool.validate(&params) {
            return ToolOutput::fail(format!("Validation failed: {err}"));
        }

        tool.execute(params).await
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.len())
            .finish()
    }
}
