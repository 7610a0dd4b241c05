//! Script units and their two-tier resolution (site overrides, then bundled).
use crate::error::{ApsError, ApsResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Logical names of the bundled algorithm scripts.
pub mod names {
    pub const PREPARE_LOG: &str = "prepare/log.js";
    pub const PREPARE_IOB: &str = "prepare/iob.js";
    pub const BUNDLE_IOB: &str = "bundle/iob.js";
    pub const PREPARE_MEAL: &str = "prepare/meal.js";
    pub const BUNDLE_MEAL: &str = "bundle/meal.js";
    pub const PREPARE_AUTOSENS: &str = "prepare/autosens.js";
    pub const BUNDLE_AUTOSENS: &str = "bundle/autosens.js";
    pub const PREPARE_PROFILE: &str = "prepare/profile.js";
    pub const BUNDLE_PROFILE: &str = "bundle/profile.js";
    pub const PREPARE_DETERMINE_BASAL: &str = "prepare/determine-basal.js";
    pub const BUNDLE_BASAL_SET_TEMP: &str = "bundle/basal-set-temp.js";
    pub const BUNDLE_GET_LAST_GLUCOSE: &str = "bundle/glucose-get-last.js";
    pub const BUNDLE_DETERMINE_BASAL: &str = "bundle/determine-basal.js";

    /// Site-supplied hook evaluated right before the determine entry point.
    pub const MIDDLEWARE_DETERMINE_BASAL: &str = "determine-basal.js";
}

/// Entry functions every phase script set exposes.
pub mod functions {
    pub const GENERATE: &str = "generate";
    pub const EXPORT_DEFAULTS: &str = "exportDefaults";
}

/// An immutable named payload of algorithm code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    body: Arc<str>,
}

impl Script {
    pub fn new(name: impl Into<String>, body: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Last path component, used to tag diagnostics.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Raw text lookup keyed by logical script name.
pub trait ScriptStore: Send + Sync {
    fn load(&self, name: &str) -> ApsResult<Option<String>>;
}

/// One file per logical name under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryScriptStore {
    root: PathBuf,
}

impl DirectoryScriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ScriptStore for DirectoryScriptStore {
    fn load(&self, name: &str) -> ApsResult<Option<String>> {
        let path = self.root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ApsError::DataAccess(format!(
                "reading script {}: {}",
                path.display(),
                err
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryScriptStore {
    scripts: RwLock<HashMap<String, String>>,
}

impl MemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(name, body);
        self
    }

    pub fn insert(&self, name: impl Into<String>, body: impl Into<String>) {
        if let Ok(mut scripts) = self.scripts.write() {
            scripts.insert(name.into(), body.into());
        }
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut scripts) = self.scripts.write() {
            scripts.remove(name);
        }
    }
}

impl ScriptStore for MemoryScriptStore {
    fn load(&self, name: &str) -> ApsResult<Option<String>> {
        let scripts = self
            .scripts
            .read()
            .map_err(|_| ApsError::DataAccess("script store lock poisoned".to_string()))?;
        Ok(scripts.get(name).cloned())
    }
}

/// Resolves a logical name against the override store first, then the bundle.
#[derive(Clone)]
pub struct ScriptResolver {
    overrides: Arc<dyn ScriptStore>,
    bundled: Arc<dyn ScriptStore>,
}

impl ScriptResolver {
    pub fn new(overrides: Arc<dyn ScriptStore>, bundled: Arc<dyn ScriptStore>) -> Self {
        Self { overrides, bundled }
    }

    /// `None` when neither tier has the script (normal for optional middleware).
    pub fn resolve(&self, name: &str) -> ApsResult<Option<Script>> {
        if let Some(body) = self.overrides.load(name)? {
            tracing::debug!(script = name, "using site override");
            return Ok(Some(Script::new(name, body)));
        }
        Ok(self.bundled.load(name)?.map(|body| Script::new(name, body)))
    }

    pub fn resolve_required(&self, name: &str) -> ApsResult<Script> {
        self.resolve(name)?
            .ok_or_else(|| ApsError::ScriptNotFound(name.to_string()))
    }

    pub fn resolve_all(&self, names: &[&str]) -> ApsResult<Vec<Script>> {
        names.iter().map(|name| self.resolve_required(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(overrides: MemoryScriptStore, bundled: MemoryScriptStore) -> ScriptResolver {
        ScriptResolver::new(Arc::new(overrides), Arc::new(bundled))
    }

    #[test]
    fn override_takes_precedence() {
        let r = resolver(
            MemoryScriptStore::new().with("bundle/iob.js", "site"),
            MemoryScriptStore::new().with("bundle/iob.js", "bundled"),
        );
        let script = r.resolve_required("bundle/iob.js").unwrap();
        assert_eq!(script.body(), "site");
        assert_eq!(script.file_name(), "iob.js");
    }

    #[test]
    fn missing_optional_is_none_and_missing_required_is_error() {
        let r = resolver(MemoryScriptStore::new(), MemoryScriptStore::new());
        assert!(r.resolve(names::MIDDLEWARE_DETERMINE_BASAL).unwrap().is_none());
        assert_eq!(
            r.resolve_required(names::BUNDLE_MEAL),
            Err(ApsError::ScriptNotFound(names::BUNDLE_MEAL.to_string()))
        );
    }

    #[test]
    fn directory_store_reports_absent_files_as_none() {
        let store = DirectoryScriptStore::new(std::env::temp_dir().join("aps-core-no-such-dir"));
        assert!(store.load("bundle/iob.js").unwrap().is_none());
    }
}
