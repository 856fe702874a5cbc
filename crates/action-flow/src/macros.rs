//! Named command-template sequences

use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::FlowError;

static MACRO_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_]+$").unwrap());

/// Looks up macro bodies. Treated as read-only configuration.
#[async_trait]
pub trait MacroResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Option<Vec<String>>;
}

/// In-memory macro table, loadable from `{"name": ["cmd", ...]}` JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroLibrary {
    macros: BTreeMap<String, Vec<String>>,
}

impl MacroLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, FlowError> {
        let parsed: BTreeMap<String, Vec<String>> = serde_json::from_str(raw)
            .map_err(|err| FlowError::Configuration(format!("macro library: {}", err)))?;
        let mut library = Self::new();
        for (name, commands) in parsed {
            library.insert(&name, commands)?;
        }
        Ok(library)
    }

    /// Adds or replaces a macro. Names are case-insensitive.
    pub fn insert(&mut self, name: &str, commands: Vec<String>) -> Result<(), FlowError> {
        let key = name.trim().to_lowercase();
        if !MACRO_NAME_RE.is_match(&key) {
            return Err(FlowError::Configuration(format!(
                "invalid macro name '{}': use letters and underscores",
                name
            )));
        }
        let commands: Vec<String> = commands
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if commands.is_empty() {
            return Err(FlowError::Configuration(format!(
                "macro '{}' has no commands",
                key
            )));
        }
        self.macros.insert(key, commands);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

#[async_trait]
impl MacroResolver for MacroLibrary {
    async fn resolve(&self, name: &str) -> Option<Vec<String>> {
        self.macros.get(&name.trim().to_lowercase()).cloned()
    }
}
