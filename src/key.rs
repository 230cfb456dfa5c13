//! Queue keys identifying one object by namespace and name

use std::fmt;
use std::str::FromStr;

use kube::{Resource, ResourceExt};

use crate::error::{Error, Result};

/// `namespace/name` identity of an object
///
/// Keys carry no object snapshot; workers re-read the cache when they
/// process one. An empty namespace denotes a cluster-scoped object and is
/// formatted as the bare name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object, or `None` when the object carries no name
    pub fn for_object<K: Resource>(obj: &K) -> Option<Self> {
        let name = obj.meta().name.as_deref().filter(|n| !n.is_empty())?;
        Some(Self::new(obj.namespace().unwrap_or_default(), name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        let mut parts = key.split('/');
        let parsed = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => Self::new("", name),
            (Some(namespace), Some(name), None) => Self::new(namespace, name),
            _ => return Err(Error::InvalidKey(key.to_string())),
        };
        if parsed.name.is_empty() {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(parsed)
    }
}
