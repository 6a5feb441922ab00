//! Value keys.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::builtins;
use crate::esf::ScenePath;

/// Names a computation on a scene object: what a request asks for, and
/// the unit of deduplication in the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueKey {
    provider: ScenePath,
    computation: Arc<str>,
    disambiguating_id: Option<Arc<str>>,
    /// Schema whose dispatched computation applies to `provider`.
    dispatched_from: Option<Arc<str>>,
}

impl ValueKey {
    pub fn new(provider: ScenePath, computation: &str) -> Self {
        Self {
            provider,
            computation: Arc::from(computation),
            disambiguating_id: None,
            dispatched_from: None,
        }
    }

    pub fn with_disambiguating_id(mut self, id: &str) -> Self {
        self.disambiguating_id = Some(Arc::from(id));
        self
    }

    /// The resolved value of an attribute.
    pub fn attribute_value(attribute: ScenePath) -> Self {
        Self::new(attribute, builtins::COMPUTE_VALUE)
    }

    /// The value of metadata field `key` on any object.
    pub fn metadata(provider: ScenePath, key: &str) -> Self {
        Self::new(provider, builtins::COMPUTE_METADATA).with_disambiguating_id(key)
    }

    /// The current evaluation time.
    pub fn time() -> Self {
        Self::new(ScenePath::absolute_root(), builtins::COMPUTE_TIME)
    }

    pub(crate) fn dispatched(mut self, schema: &str) -> Self {
        self.dispatched_from = Some(Arc::from(schema));
        self
    }

    pub fn provider(&self) -> &ScenePath {
        &self.provider
    }

    pub fn computation(&self) -> &str {
        &self.computation
    }

    pub fn disambiguating_id(&self) -> Option<&str> {
        self.disambiguating_id.as_deref()
    }

    pub fn dispatched_from(&self) -> Option<&str> {
        self.dispatched_from.as_deref()
    }

    /// Whether the key is well formed. Whether it can be compiled is only
    /// known once the compiler looks at the scene.
    pub fn is_valid(&self) -> bool {
        !self.computation.is_empty() && self.disambiguating_id.as_deref() != Some("")
    }
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}", self.provider, self.computation)?;
        if let Some(id) = &self.disambiguating_id {
            write!(f, ":{id}")?;
        }
        if let Some(schema) = &self.dispatched_from {
            write!(f, " via {schema}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_validity() {
        let path = ScenePath::new("/A").unwrap();
        let key = ValueKey::metadata(path.clone(), "hidden");
        assert_eq!(key.to_string(), "/A [computeMetadata:hidden]");
        assert!(key.is_valid());
        assert!(!ValueKey::new(path.clone(), "").is_valid());
        assert!(!ValueKey::new(path, "x").with_disambiguating_id("").is_valid());
        assert_eq!(ValueKey::time().provider(), &ScenePath::absolute_root());
    }
}
