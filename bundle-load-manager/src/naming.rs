use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{LoadManagerError, Result};

/// Namespace reserved for the cluster's own system topics.
pub const SYSTEM_NAMESPACE: &str = "pulse/system";

/// A contiguous range of a namespace's routing key space.
///
/// The textual form is `<namespace>/<range>`, where the namespace may itself contain
/// `/` separators (e.g. `tenant/ns/0x00000000_0x40000000`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceBundle {
    pub namespace: String,
    pub range: String,
}

impl NamespaceBundle {
    pub fn new(namespace: impl Into<String>, range: impl Into<String>) -> Self {
        NamespaceBundle {
            namespace: namespace.into(),
            range: range.into(),
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.rsplit_once('/') {
            Some((namespace, range)) if !namespace.is_empty() && !range.is_empty() => {
                Ok(NamespaceBundle::new(namespace, range))
            }
            _ => Err(LoadManagerError::InvalidBundle(name.to_string())),
        }
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.namespace, self.range)
    }

    pub fn is_system(&self) -> bool {
        self.namespace == SYSTEM_NAMESPACE
    }
}

impl fmt::Display for NamespaceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.range)
    }
}

/// Namespace part of a bundle name; the whole name when it has no range part.
pub fn namespace_of(bundle: &str) -> &str {
    bundle.rsplit_once('/').map(|(ns, _)| ns).unwrap_or(bundle)
}

/// Range part of a bundle name.
pub fn range_of(bundle: &str) -> &str {
    bundle.rsplit_once('/').map(|(_, range)| range).unwrap_or("")
}
