//! Dispatch errors reported by the chain in `System.ExtrinsicFailed`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A module (pallet) error: pallet index plus error index, with the
/// human-readable names when the node (or metadata lookup) supplied them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleError {
    pub index: u8,
    pub error: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Why an included extrinsic failed to dispatch.
///
/// JSON shape follows the node: `{"module":{"index":36,"error":4}}`,
/// `{"badOrigin":null}` or `"badOrigin"`, `{"arithmetic":"Overflow"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatchError {
    Module(ModuleError),
    BadOrigin,
    CannotLookup,
    Arithmetic(String),
    Token(String),
    Other(String),
}

impl DispatchError {
    /// Build a module error carrying its names.
    #[must_use]
    pub fn module(index: u8, error: u8, section: &str, name: &str) -> Self {
        Self::Module(ModuleError {
            index,
            error,
            section: Some(section.to_string()),
            name: Some(name.to_string()),
        })
    }

    /// Returns the `section.Name` pair if this is a named module error.
    #[must_use]
    pub fn module_name(&self) -> Option<(&str, &str)> {
        match self {
            Self::Module(ModuleError {
                section: Some(section),
                name: Some(name),
                ..
            }) => Some((section.as_str(), name.as_str())),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(ModuleError {
                section: Some(section),
                name: Some(name),
                ..
            }) => write!(f, "{section}.{name}"),
            Self::Module(m) => write!(f, "Module{{index: {}, error: {}}}", m.index, m.error),
            Self::BadOrigin => write!(f, "BadOrigin"),
            Self::CannotLookup => write!(f, "CannotLookup"),
            Self::Arithmetic(e) => write!(f, "Arithmetic({e})"),
            Self::Token(e) => write!(f, "Token({e})"),
            Self::Other(e) => write!(f, "Other({e})"),
        }
    }
}
