//! Input sanitization for tool parameters.
//!
//! Four checks, dispatched by parameter kind:
//!
//! - **text**: length cap, ASCII NUL stripping
//! - **command**: shell metacharacter blocklist (`;`, `|`, backtick,
//!   `$()`, `&&`, `||`, pipelines into `bash`/`sh`/`zsh`)
//! - **path**: logical `..` resolution and a blocked-prefix list
//! - **url**: scheme allow-list (`http`, `https` by default)
//!
//! Sanitization is idempotent: re-sanitizing accepted output is a no-op.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use url::Url;

use crate::config::SanitizerConfig;
use crate::error::{Error, Result};

const SHELL_METACHARACTERS: &[&str] = &[";", "|", "`", "$(", "&&", "||"];
const SHELL_PIPELINES: &[&str] = &["| bash", "| sh", "| zsh", "|bash", "|sh", "|zsh"];

/// Validates and normalizes tool inputs.
#[derive(Debug, Clone)]
pub struct InputSanitizer {
    config: SanitizerConfig,
}

impl InputSanitizer {
    /// Create a sanitizer from configuration.
    #[must_use]
    pub fn new(config: SanitizerConfig) -> Self {
        Self { config }
    }

    /// Cap length and strip ASCII NUL bytes.
    ///
    /// # Errors
    ///
    /// [`Error::Sanitization`] when the input exceeds `max_input_length`.
    pub fn sanitize_text(&self, input: &str) -> Result<String> {
        if input.len() > self.config.max_input_length {
            return Err(Error::Sanitization(format!(
                "input of {} bytes exceeds maximum of {}",
                input.len(),
                self.config.max_input_length
            )));
        }
        Ok(input.replace('\0', ""))
    }

    /// Reject strings containing shell-injection metacharacters.
    ///
    /// # Errors
    ///
    /// [`Error::Sanitization`] naming the offending sequence.
    pub fn check_command(&self, command: &str) -> Result<String> {
        let command = self.sanitize_text(command)?;
        for pipeline in SHELL_PIPELINES {
            if command.contains(pipeline) {
                return Err(Error::Sanitization(format!(
                    "command contains a pipeline to a shell: '{pipeline}'"
                )));
            }
        }
        for meta in SHELL_METACHARACTERS {
            if command.contains(meta) {
                return Err(Error::Sanitization(format!(
                    "command contains shell metacharacter '{meta}'"
                )));
            }
        }
        Ok(command)
    }

    /// Resolve `.` and `..` components without touching the filesystem and
    /// reject blocked prefixes.
    ///
    /// # Errors
    ///
    /// [`Error::Sanitization`] when `..` escapes the root or the resolved
    /// path matches a blocked prefix.
    pub fn sanitize_path(&self, path: &str) -> Result<String> {
        let path = self.sanitize_text(path)?;
        let mut resolved = PathBuf::new();
        for component in Path::new(&path).components() {
            match component {
                Component::ParentDir => {
                    // Popping the root or an empty relative path means the
                    // input tried to escape upward.
                    if !resolved.pop() {
                        return Err(Error::Sanitization(format!(
                            "path '{path}' escapes its root"
                        )));
                    }
                }
                Component::CurDir => {}
                other => resolved.push(other),
            }
        }
        let resolved = resolved.to_string_lossy().into_owned();

        for blocked in &self.config.blocked_paths {
            if resolved.starts_with(blocked.as_str()) {
                return Err(Error::Sanitization(format!(
                    "path '{resolved}' is under blocked prefix '{blocked}'"
                )));
            }
        }
        Ok(resolved)
    }

    /// Reject URLs whose scheme is not on the allow-list.
    ///
    /// # Errors
    ///
    /// [`Error::Sanitization`] for unparsable URLs or disallowed schemes
    /// (`file`, `javascript`, `data`, …).
    pub fn check_url(&self, input: &str) -> Result<String> {
        let input = self.sanitize_text(input)?;
        let url = Url::parse(&input)
            .map_err(|err| Error::Sanitization(format!("invalid URL '{input}': {err}")))?;
        if !self
            .config
            .allowed_url_schemes
            .iter()
            .any(|scheme| scheme == url.scheme())
        {
            return Err(Error::Sanitization(format!(
                "URL scheme '{}' is not allowed",
                url.scheme()
            )));
        }
        Ok(input)
    }

    /// Sanitize a tool's parameter object, dispatching each string
    /// property by its name: `path`-ish keys get path handling, `url`
    /// keys get scheme checks, `command` keys get the metacharacter
    /// blocklist, everything else is treated as text.
    ///
    /// # Errors
    ///
    /// The first failing check, as [`Error::Sanitization`].
    pub fn sanitize_tool_params(&self, tool_name: &str, params: &Value) -> Result<Value> {
        let Some(object) = params.as_object() else {
            return Ok(params.clone());
        };

        let mut sanitized = serde_json::Map::with_capacity(object.len());
        for (key, value) in object {
            let updated = match value.as_str() {
                Some(text) => {
                    let cleaned = match ParamKind::of(key) {
                        ParamKind::Path => self.sanitize_path(text),
                        ParamKind::Url => self.check_url(text),
                        ParamKind::Command => self.check_command(text),
                        ParamKind::Text => self.sanitize_text(text),
                    }
                    .map_err(|err| {
                        Error::Sanitization(format!("{tool_name}.{key}: {err}"))
                    })?;
                    Value::String(cleaned)
                }
                None => value.clone(),
            };
            sanitized.insert(key.clone(), updated);
        }
        Ok(Value::Object(sanitized))
    }
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self::new(SanitizerConfig::default())
    }
}

/// Parameter classification by key name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Path,
    Url,
    Command,
    Text,
}

impl ParamKind {
    fn of(key: &str) -> Self {
        let lowered = key.to_lowercase();
        if lowered == "path" || lowered.ends_with("_path") || lowered == "file" {
            Self::Path
        } else if lowered == "url" || lowered.ends_with("_url") {
            Self::Url
        } else if lowered == "command" || lowered == "cmd" {
            Self::Command
        } else {
            Self::Text
        }
    }
}
