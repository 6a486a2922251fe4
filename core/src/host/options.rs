//! Option command table
//!
//! `-name args...` lines escape to the host. The table maps each option
//! name to its argument signature; the compiler validates calls against it.
//! Built-in entries can be extended or overridden from the `[options]`
//! config section.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::interpreter::types::DataType;

/// Argument kind in a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Int,
    Uint,
    Bool,
    String,
    Any,
}

impl ArgKind {
    /// Type a value in this position is compiled towards
    pub fn expected_type(self) -> Option<DataType> {
        match self {
            ArgKind::Int => Some(DataType::Int),
            ArgKind::Uint => Some(DataType::UInt),
            ArgKind::Bool => Some(DataType::Bool),
            ArgKind::String => Some(DataType::Str),
            ArgKind::Any => None,
        }
    }

    /// Whether a value of `ty` can be passed here
    pub fn accepts(self, ty: DataType) -> bool {
        match self {
            ArgKind::Int | ArgKind::Uint => ty.is_numeric(),
            ArgKind::Bool => ty == DataType::Bool,
            ArgKind::String => !ty.is_array(),
            ArgKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionTable {
    entries: BTreeMap<String, Vec<ArgKind>>,
}

impl Default for OptionTable {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("beep".to_string(), vec![ArgKind::Int]);
        entries.insert("wait".to_string(), vec![ArgKind::Int]);
        entries.insert("log".to_string(), vec![ArgKind::String]);
        entries.insert("title".to_string(), vec![ArgKind::String]);
        Self { entries }
    }
}

impl OptionTable {
    /// Defaults plus configured entries; configured names win
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<ArgKind>>) -> Self {
        let mut table = Self::default();
        for (name, args) in overrides {
            table.entries.insert(name.to_ascii_lowercase(), args.clone());
        }
        table
    }

    pub fn signature(&self, name: &str) -> Option<&[ArgKind]> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_defaults_and_overrides() {
        let table = OptionTable::with_overrides(&btreemap! {
            "Beep".to_string() => vec![ArgKind::Int, ArgKind::Int],
            "notify".to_string() => vec![ArgKind::String],
        });

        assert_eq!(table.signature("BEEP"), Some(&[ArgKind::Int, ArgKind::Int][..]));
        assert_eq!(table.signature("notify"), Some(&[ArgKind::String][..]));
        assert_eq!(table.signature("wait"), Some(&[ArgKind::Int][..]));
        assert_eq!(table.signature("missing"), None);
    }

    #[test]
    fn test_arg_kind_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            args: Vec<ArgKind>,
        }
        let parsed: Wrapper = toml::from_str(r#"args = ["int", "string", "any"]"#).unwrap();
        assert_eq!(parsed.args, vec![ArgKind::Int, ArgKind::String, ArgKind::Any]);
    }

    #[test]
    fn test_accepts() {
        assert!(ArgKind::Int.accepts(DataType::UInt));
        assert!(ArgKind::String.accepts(DataType::Int));
        assert!(!ArgKind::String.accepts(DataType::StrArray));
        assert!(!ArgKind::Bool.accepts(DataType::Int));
    }
}
