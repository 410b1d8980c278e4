//! Plugin registry: lifecycle hooks, dependency-ordered loading, and
//! hook chaining.
//!
//! A plugin declares [`PluginMeta`] and implements any subset of the
//! [`Plugin`] hooks — every hook has a default no-op body. Two hooks are
//! *chains* (`on_before_task`, `on_message`): each enabled plugin in load
//! order may replace the working value, and a `None` return means "no
//! change". The rest are broadcasts whose return values are ignored.
//!
//! Loading a batch computes a topological order over declared
//! `dependencies`; a cycle or missing dependency fails the whole batch with
//! [`Error::Dependency`] and loads nothing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventBus, PLUGIN_LOADED, PLUGIN_UNLOADED};
use crate::tool::ToolRegistry;

/// Static description of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Unique plugin name.
    pub name: String,
    /// Semantic version string.
    pub version: String,
    /// What the plugin does.
    pub description: String,
    /// Names of plugins that must load before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PluginMeta {
    /// Create a minimal meta record.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            dependencies: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a dependency on another plugin.
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// Services handed to plugins at load time.
#[derive(Clone)]
pub struct PluginContext {
    /// The shared tool registry; plugins may register tools here.
    pub tools: Arc<ToolRegistry>,
    /// The shared event bus; plugins may subscribe here.
    pub events: Arc<EventBus>,
    /// The runtime configuration.
    pub config: Arc<Config>,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext").finish_non_exhaustive()
    }
}

/// Lifecycle and interception hooks. Implement any subset.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The plugin's static description.
    fn meta(&self) -> PluginMeta;

    /// Called once when the plugin is loaded.
    ///
    /// # Errors
    ///
    /// A load error is fatal to this plugin only; the registry logs it and
    /// skips the plugin.
    async fn on_load(&self, _context: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Called once when the plugin is unloaded.
    async fn on_unload(&self) {}

    /// Called when a session is created.
    async fn on_session_start(&self, _session_id: &str, _user_id: &str) {}

    /// Called when a session is shut down.
    async fn on_session_end(&self, _session_id: &str) {}

    /// Chance to rewrite task parameters before the tool runs.
    ///
    /// Return `Some(params)` to replace the working parameters, `None` to
    /// leave them unchanged.
    async fn on_before_task(
        &self,
        _task_id: &str,
        _tool_name: &str,
        _params: &Value,
    ) -> Option<Value> {
        None
    }

    /// Called after a task finishes, successfully or not.
    async fn on_after_task(&self, _task_id: &str, _tool_name: &str, _success: bool, _result: &Value) {
    }

    /// Chance to rewrite a chat message before it reaches the LLM.
    ///
    /// Same chain semantics as [`Plugin::on_before_task`].
    async fn on_message(&self, _session_id: &str, _role: &str, _content: &str) -> Option<String> {
        None
    }
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    meta: PluginMeta,
    enabled: bool,
}

/// Registry of loaded plugins in dependency order.
pub struct PluginRegistry {
    plugins: RwLock<Vec<LoadedPlugin>>,
    events: Arc<EventBus>,
}

impl PluginRegistry {
    /// Create an empty registry that announces loads on `events`.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Register and load a single plugin.
    ///
    /// # Errors
    ///
    /// [`Error::Dependency`] if a declared dependency is not already
    /// loaded, or [`Error::Validation`] if the name is already taken.
    pub async fn register(&self, plugin: Arc<dyn Plugin>, context: &PluginContext) -> Result<()> {
        let meta = plugin.meta();
        {
            let plugins = self.plugins.read().expect("plugin registry lock poisoned");
            if plugins.iter().any(|p| p.meta.name == meta.name) {
                return Err(Error::validation(format!(
                    "plugin '{}' is already registered",
                    meta.name
                )));
            }
            let loaded: HashSet<&str> = plugins.iter().map(|p| p.meta.name.as_str()).collect();
            let missing: Vec<&str> = meta
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|d| !loaded.contains(d))
                .collect();
            if !missing.is_empty() {
                return Err(Error::Dependency(format!(
                    "plugin '{}' is missing dependencies: {}",
                    meta.name,
                    missing.join(", ")
                )));
            }
        }

        plugin.on_load(context).await?;
        debug!(plugin = %meta.name, version = %meta.version, "plugin loaded");
        self.events
            .emit(PLUGIN_LOADED, json!({ "plugin": meta.name }));

        self.plugins
            .write()
            .expect("plugin registry lock poisoned")
            .push(LoadedPlugin {
                plugin,
                meta,
                enabled: true,
            });
        Ok(())
    }

    /// Register a batch of plugins in topological dependency order.
    ///
    /// All-or-nothing: a cycle or missing dependency fails the whole batch
    /// and loads no plugin from it.
    ///
    /// # Errors
    ///
    /// [`Error::Dependency`] naming the cycle or the missing dependencies.
    pub async fn register_all(
        &self,
        plugins: Vec<Arc<dyn Plugin>>,
        context: &PluginContext,
    ) -> Result<()> {
        let order = Self::topological_order(&plugins)?;
        for index in order {
            self.register(Arc::clone(&plugins[index]), context).await?;
        }
        Ok(())
    }

    /// Compute a load order over a batch, honoring `dependencies`.
    fn topological_order(plugins: &[Arc<dyn Plugin>]) -> Result<Vec<usize>> {
        let metas: Vec<PluginMeta> = plugins.iter().map(|p| p.meta()).collect();
        let by_name: HashMap<&str, usize> = metas
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.as_str(), i))
            .collect();

        let mut missing: Vec<String> = Vec::new();
        let mut in_degree = vec![0usize; metas.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); metas.len()];
        for (i, meta) in metas.iter().enumerate() {
            for dep in &meta.dependencies {
                match by_name.get(dep.as_str()) {
                    Some(&dep_index) => {
                        in_degree[i] += 1;
                        dependents[dep_index].push(i);
                    }
                    None => missing.push(format!("{} (required by {})", dep, meta.name)),
                }
            }
        }
        if !missing.is_empty() {
            return Err(Error::Dependency(format!(
                "missing plugin dependencies: {}",
                missing.join(", ")
            )));
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(metas.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != metas.len() {
            let cycle: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| metas[i].name.as_str())
                .collect();
            return Err(Error::Dependency(format!(
                "circular plugin dependencies among: {}",
                cycle.join(", ")
            )));
        }
        Ok(order)
    }

    /// Unload every plugin in reverse load order.
    pub async fn unload_all(&self) {
        let unloading: Vec<(Arc<dyn Plugin>, String)> = {
            let mut plugins = self.plugins.write().expect("plugin registry lock poisoned");
            plugins
                .drain(..)
                .rev()
                .map(|p| (p.plugin, p.meta.name))
                .collect()
        };
        for (plugin, name) in unloading {
            plugin.on_unload().await;
            debug!(plugin = %name, "plugin unloaded");
            self.events.emit(PLUGIN_UNLOADED, json!({ "plugin": name }));
        }
    }

    /// Enable or disable a plugin by name. Returns `true` if it exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut plugins = self.plugins.write().expect("plugin registry lock poisoned");
        match plugins.iter_mut().find(|p| p.meta.name == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Metas of every loaded plugin, in load order, with enabled flags.
    #[must_use]
    pub fn list(&self) -> Vec<(PluginMeta, bool)> {
        self.plugins
            .read()
            .expect("plugin registry lock poisoned")
            .iter()
            .map(|p| (p.meta.clone(), p.enabled))
            .collect()
    }

    /// Number of loaded plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins
            .read()
            .expect("plugin registry lock poisoned")
            .len()
    }

    /// Returns `true` if no plugins are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enabled_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .expect("plugin registry lock poisoned")
            .iter()
            .filter(|p| p.enabled)
            .map(|p| Arc::clone(&p.plugin))
            .collect()
    }

    /// Run the `on_before_task` chain over `params`.
    ///
    /// Each enabled plugin in load order may replace the working
    /// parameters; the final mapping is what the executor passes on.
    pub async fn dispatch_before_task(
        &self,
        task_id: &str,
        tool_name: &str,
        params: Value,
    ) -> Value {
        let mut working = params;
        for plugin in self.enabled_plugins() {
            if let Some(replaced) = plugin.on_before_task(task_id, tool_name, &working).await {
                working = replaced;
            }
        }
        working
    }

    /// Run the `on_message` chain over `content`.
    pub async fn dispatch_message(&self, session_id: &str, role: &str, content: String) -> String {
        let mut working = content;
        for plugin in self.enabled_plugins() {
            if let Some(replaced) = plugin.on_message(session_id, role, &working).await {
                working = replaced;
            }
        }
        working
    }

    /// Broadcast task completion to every enabled plugin.
    pub async fn dispatch_after_task(
        &self,
        task_id: &str,
        tool_name: &str,
        success: bool,
        result: &Value,
    ) {
        for plugin in self.enabled_plugins() {
            plugin
                .on_after_task(task_id, tool_name, success, result)
                .await;
        }
    }

    /// Broadcast session creation to every enabled plugin.
    pub async fn dispatch_session_start(&self, session_id: &str, user_id: &str) {
        for plugin in self.enabled_plugins() {
            plugin.on_session_start(session_id, user_id).await;
        }
    }

    /// Broadcast session shutdown to every enabled plugin.
    pub async fn dispatch_session_end(&self, session_id: &str) {
        for plugin in self.enabled_plugins() {
            plugin.on_session_end(session_id).await;
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> PluginContext {
        PluginContext {
            tools: Arc::new(ToolRegistry::new()),
            events: Arc::new(EventBus::new()),
            config: Arc::new(Config::default()),
        }
    }

    struct NamedPlugin {
        meta: PluginMeta,
        load_order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for NamedPlugin {
        fn meta(&self) -> PluginMeta {
            self.meta.clone()
        }

        async fn on_load(&self, _context: &PluginContext) -> Result<()> {
            self.load_order
                .lock()
                .expect("lock poisoned")
                .push(self.meta.name.clone());
            Ok(())
        }
    }

    struct ParamInjector {
        key: &'static str,
        value: &'static str,
    }

    #[async_trait]
    impl Plugin for ParamInjector {
        fn meta(&self) -> PluginMeta {
            PluginMeta::new(self.key, "1.0.0")
        }

        async fn on_before_task(
            &self,
            _task_id: &str,
            _tool_name: &str,
            params: &Value,
        ) -> Option<Value> {
            let mut updated = params.clone();
            if let Some(obj) = updated.as_object_mut() {
                obj.insert(self.key.to_owned(), json!(self.value));
            }
            Some(updated)
        }
    }

    #[tokio::test]
    async fn test_register_all_loads_in_dependency_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |name: &str, deps: &[&str]| -> Arc<dyn Plugin> {
            let mut meta = PluginMeta::new(name, "1.0.0");
            for dep in deps {
                meta = meta.with_dependency(*dep);
            }
            Arc::new(NamedPlugin {
                meta,
                load_order: Arc::clone(&order),
            })
        };

        let registry = PluginRegistry::new(Arc::new(EventBus::new()));
        registry
            .register_all(
                vec![make("c", &["b"]), make("a", &[]), make("b", &["a"])],
                &context(),
            )
            .await
            .expect("batch should load");

        assert_eq!(
            *order.lock().expect("lock poisoned"),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_register_all_rejects_cycle_and_loads_nothing() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |name: &str, dep: &str| -> Arc<dyn Plugin> {
            Arc::new(NamedPlugin {
                meta: PluginMeta::new(name, "1.0.0").with_dependency(dep),
                load_order: Arc::clone(&order),
            })
        };

        let registry = PluginRegistry::new(Arc::new(EventBus::new()));
        let err = registry
            .register_all(vec![make("a", "b"), make("b", "a")], &context())
            .await
            .expect_err("cycle should fail");

        assert!(matches!(err, Error::Dependency(_)));
        assert!(err.to_string().contains('a') && err.to_string().contains('b'));
        assert!(registry.is_empty());
        assert!(order.lock().expect("lock poisoned").is_empty());
    }

    #[tokio::test]
    async fn test_register_all_rejects_missing_dependency() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let plugin: Arc<dyn Plugin> = Arc::new(NamedPlugin {
            meta: PluginMeta::new("needy", "1.0.0").with_dependency("ghost"),
            load_order: order,
        });

        let registry = PluginRegistry::new(Arc::new(EventBus::new()));
        let err = registry
            .register_all(vec![plugin], &context())
            .await
            .expect_err("missing dep should fail");
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_before_task_chain_applies_in_load_order() {
        let registry = PluginRegistry::new(Arc::new(EventBus::new()));
        let ctx = context();
        registry
            .register(
                Arc::new(ParamInjector {
                    key: "p1",
                    value: "first",
                }),
                &ctx,
            )
            .await
            .expect("register p1");
        registry
            .register(
                Arc::new(ParamInjector {
                    key: "p2",
                    value: "second",
                }),
                &ctx,
            )
            .await
            .expect("register p2");

        let result = registry
            .dispatch_before_task("t1", "utility.echo", json!({"original": true}))
            .await;
        // P2's transform is applied on top of P1's output.
        assert_eq!(result["original"], true);
        assert_eq!(result["p1"], "first");
        assert_eq!(result["p2"], "second");
    }

    #[tokio::test]
    async fn test_disabled_plugin_is_skipped() {
        let registry = PluginRegistry::new(Arc::new(EventBus::new()));
        registry
            .register(
                Arc::new(ParamInjector {
                    key: "p1",
                    value: "x",
                }),
                &context(),
            )
            .await
            .expect("register");

        assert!(registry.set_enabled("p1", false));
        let result = registry.dispatch_before_task("t", "tool", json!({})).await;
        assert!(result.get("p1").is_none());

        assert!(registry.set_enabled("p1", true));
        let result = registry.dispatch_before_task("t", "tool", json!({})).await;
        assert_eq!(result["p1"], "x");
    }

    #[tokio::test]
    async fn test_load_and_unload_emit_bus_events() {
        let events = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        events.subscribe("plugin.*", move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let registry = PluginRegistry::new(Arc::clone(&events));
        registry
            .register(
                Arc::new(ParamInjector {
                    key: "p1",
                    value: "x",
                }),
                &context(),
            )
            .await
            .expect("register");
        registry.unload_all().await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }
}
