use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::read_to_string;
use std::path::Path;

use crate::error::{Error, Result};

/// One entry of the target specification
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetFunction {
    pub selected: bool,
    pub function_name: String,
    /// Only the call with this zero-based index is targeted. Every call is
    /// targeted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// Strip the `A`/`W` character-width suffix of a Win32 API name
pub fn family(name: &str) -> &str {
    let mut chars = name.chars().rev();
    match (chars.next(), chars.next()) {
        (Some('A' | 'W'), Some(prev)) if prev.is_ascii_lowercase() => &name[..name.len() - 1],
        _ => name,
    }
}

/// The selected target functions plus how often each hooked function has
/// been called so far
#[derive(Debug, Default, Clone)]
pub struct Targets {
    functions: Vec<TargetFunction>,
    counts: HashMap<String, u32>,
}

impl Targets {
    pub fn new(functions: Vec<TargetFunction>) -> Self {
        Self {
            functions,
            counts: HashMap::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let functions: Vec<TargetFunction> = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("malformed target specification: {}", e)))?;
        Ok(Self::new(functions))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "cannot read target specification {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    fn selected(&self) -> impl Iterator<Item = &TargetFunction> {
        self.functions.iter().filter(|f| f.selected)
    }

    /// Whether some selected entry names `name` or its family
    pub fn is_selected(&self, name: &str) -> bool {
        self.selected()
            .any(|f| f.function_name == name || family(&f.function_name) == family(name))
    }

    pub fn count(&self, name: &str) -> u32 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Account for one completed call to `name` and return whether that call
    /// is targeted
    pub fn on_call(&mut self, name: &str) -> bool {
        let earlier = self.count(name);
        let targeted = self.selected().any(|f| {
            (f.function_name == name || family(&f.function_name) == family(name))
                && f.index.map_or(true, |index| index == earlier)
        });
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
        targeted
    }
}
