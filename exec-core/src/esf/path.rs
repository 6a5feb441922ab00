//! Scene paths.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An absolute path to a prim (`/World/Ball`) or a property
/// (`/World/Ball.radius`). The pseudo-root is `/`.
///
/// Paths are validated on construction and cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScenePath(Arc<str>);

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Property names may be namespaced: `xformOp:transform`.
fn is_property_name(name: &str) -> bool {
    !name.is_empty() && name.split(':').all(is_identifier)
}

impl ScenePath {
    /// Parse `path`, returning `None` if it is not a valid absolute path.
    pub fn new(path: &str) -> Option<Self> {
        if path == "/" {
            return Some(Self::absolute_root());
        }
        let rest = path.strip_prefix('/')?;
        let (prim, property) = match rest.split_once('.') {
            Some((prim, property)) => (prim, Some(property)),
            None => (rest, None),
        };
        if !prim.split('/').all(is_identifier) {
            return None;
        }
        if let Some(property) = property {
            if !is_property_name(property) {
                return None;
            }
        }
        Some(Self(Arc::from(path)))
    }

    pub fn absolute_root() -> Self {
        Self(Arc::from("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute_root(&self) -> bool {
        &*self.0 == "/"
    }

    pub fn is_property_path(&self) -> bool {
        self.0.contains('.')
    }

    pub fn is_prim_path(&self) -> bool {
        !self.is_absolute_root() && !self.is_property_path()
    }

    /// The prim part of this path. Prim paths return themselves.
    pub fn prim_path(&self) -> ScenePath {
        match self.0.split_once('.') {
            Some((prim, _)) => Self(Arc::from(prim)),
            None => self.clone(),
        }
    }

    /// The owning prim of a property, or the parent prim of a prim.
    pub fn parent(&self) -> Option<ScenePath> {
        if self.is_absolute_root() {
            return None;
        }
        if self.is_property_path() {
            return Some(self.prim_path());
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::absolute_root()),
            Some(i) => Some(Self(Arc::from(&self.0[..i]))),
            None => None,
        }
    }

    /// The last element: a prim name or a property name.
    pub fn name(&self) -> &str {
        if let Some((_, property)) = self.0.split_once('.') {
            return property;
        }
        match self.0.rfind('/') {
            Some(i) => &self.0[i + 1..],
            None => &self.0,
        }
    }

    pub fn append_child(&self, name: &str) -> Option<ScenePath> {
        if self.is_property_path() || !is_identifier(name) {
            return None;
        }
        if self.is_absolute_root() {
            return Self::new(&format!("/{name}"));
        }
        Some(Self(Arc::from(format!("{}/{name}", self.0))))
    }

    pub fn append_property(&self, name: &str) -> Option<ScenePath> {
        if !self.is_prim_path() || !is_property_name(name) {
            return None;
        }
        Some(Self(Arc::from(format!("{}.{name}", self.0))))
    }

    /// Whether `self` is `prefix` or lies beneath it.
    pub fn has_prefix(&self, prefix: &ScenePath) -> bool {
        if prefix.is_absolute_root() || self == prefix {
            return true;
        }
        self.0
            .strip_prefix(&*prefix.0)
            .is_some_and(|rest| !prefix.is_property_path() && (rest.starts_with('/') || rest.starts_with('.')))
    }

    /// Prim ancestors from the parent up to, excluding, the pseudo-root.
    pub fn ancestors(&self) -> impl Iterator<Item = ScenePath> {
        std::iter::successors(self.parent(), ScenePath::parent).filter(|p| !p.is_absolute_root())
    }
}

impl fmt::Display for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

impl Serialize for ScenePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ScenePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ScenePath::new(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid scene path '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ScenePath {
        ScenePath::new(s).unwrap()
    }

    #[test]
    fn parses_valid_paths() {
        assert!(p("/").is_absolute_root());
        assert!(p("/World/Ball").is_prim_path());
        assert!(p("/World/Ball.radius").is_property_path());
        assert!(p("/A.xformOp:transform").is_property_path());
        for bad in ["", "World", "/World/", "//A", "/A.", "/A.b.c", "/1A", "/A.b:"] {
            assert!(ScenePath::new(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn parents_and_names() {
        assert_eq!(p("/A/B.x").parent(), Some(p("/A/B")));
        assert_eq!(p("/A/B").parent(), Some(p("/A")));
        assert_eq!(p("/A").parent(), Some(p("/")));
        assert_eq!(p("/").parent(), None);
        assert_eq!(p("/A/B.x").name(), "x");
        assert_eq!(p("/A/B").name(), "B");
        assert_eq!(p("/A/B.x").prim_path(), p("/A/B"));
        let ancestors: Vec<_> = p("/A/B/C.x").ancestors().collect();
        assert_eq!(ancestors, vec![p("/A/B/C"), p("/A/B"), p("/A")]);
    }

    #[test]
    fn appending() {
        assert_eq!(p("/").append_child("A"), Some(p("/A")));
        assert_eq!(p("/A").append_property("radius"), Some(p("/A.radius")));
        assert_eq!(p("/A.r").append_child("B"), None);
        assert_eq!(p("/").append_property("r"), None);
    }

    #[test]
    fn prefixes() {
        assert!(p("/A/B.x").has_prefix(&p("/A")));
        assert!(p("/A.x").has_prefix(&p("/A")));
        assert!(p("/A").has_prefix(&p("/A")));
        assert!(!p("/AB").has_prefix(&p("/A")));
        assert!(!p("/A.xy").has_prefix(&p("/A.x")));
        assert!(p("/A").has_prefix(&p("/")));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&p("/A.x")).unwrap();
        assert_eq!(json, "\"/A.x\"");
        let back: ScenePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("/A.x"));
        assert!(serde_json::from_str::<ScenePath>("\"nope\"").is_err());
    }
}
