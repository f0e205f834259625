use serde::{Deserialize, Serialize};
use std::fmt;

/// A hierarchical register name.
///
/// Path segments are joined by `/`; a leading `/` is implied and accepted on
/// input. The last segment may additionally carry a `.`-separated qualifier
/// (e.g. `MODULE/REG.DUMMY_WRITEABLE`), which backends use to select
/// alternative views of the same register.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RegisterPath {
    components: Vec<String>,
}

impl RegisterPath {
    /// Creates a path from its textual form. Empty segments are dropped, so
    /// `"/APP/REG"`, `"APP/REG"` and `"APP//REG"` all name the same register.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            components: path
                .as_ref()
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// The individual path segments, without separators.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The last path segment, or `None` for the root path.
    pub fn last_component(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Number of path segments.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether this is the root path.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns the path with the last segment removed.
    pub fn parent(&self) -> RegisterPath {
        let mut components = self.components.clone();
        components.pop();
        RegisterPath { components }
    }

    /// Returns the path extended by one segment.
    pub fn join(&self, segment: impl AsRef<str>) -> RegisterPath {
        let mut components = self.components.clone();
        components.extend(
            segment
                .as_ref()
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_owned),
        );
        RegisterPath { components }
    }

    /// Splits a `.`-separated qualifier off the last segment.
    ///
    /// For `MODULE/REG.PUSH_READ` this returns the base path `MODULE/REG`
    /// and the qualifier `PUSH_READ`. Returns `None` if the last segment has
    /// no dot. Only the part after the last dot is treated as qualifier.
    pub fn split_qualifier(&self) -> Option<(RegisterPath, &str)> {
        let last = self.components.last()?;
        let dot = last.rfind('.')?;
        let (base_last, qualifier) = last.split_at(dot);
        if base_last.is_empty() {
            return None;
        }
        let mut components = self.components.clone();
        *components.last_mut().expect("checked above") = base_last.to_owned();
        Some((RegisterPath { components }, &qualifier[1..]))
    }
}

impl fmt::Display for RegisterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.components.join("/"))
    }
}

impl From<&str> for RegisterPath {
    fn from(path: &str) -> Self {
        RegisterPath::new(path)
    }
}

impl From<String> for RegisterPath {
    fn from(path: String) -> Self {
        RegisterPath::new(path)
    }
}

impl From<RegisterPath> for String {
    fn from(path: RegisterPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalisation() {
        assert_eq!(RegisterPath::new("/APP/REG"), RegisterPath::new("APP/REG"));
        assert_eq!(RegisterPath::new("APP//REG"), RegisterPath::new("APP/REG"));
        assert_eq!(RegisterPath::new("/APP/REG").to_string(), "/APP/REG");
    }

    #[test]
    fn parent_and_join() {
        let path = RegisterPath::new("APP/0/REG");
        assert_eq!(path.parent(), RegisterPath::new("APP/0"));
        assert_eq!(path.parent().join("REG"), path);
        assert_eq!(path.last_component(), Some("REG"));
    }

    #[test]
    fn qualifier_splitting() {
        let path = RegisterPath::new("MOD/REG.PUSH_READ");
        let (base, qualifier) = path.split_qualifier().unwrap();
        assert_eq!(base, RegisterPath::new("MOD/REG"));
        assert_eq!(qualifier, "PUSH_READ");

        assert!(RegisterPath::new("MOD/REG").split_qualifier().is_none());
        // a leading dot is not a qualifier separator
        assert!(RegisterPath::new("MOD/.hidden").split_qualifier().is_none());
    }
}
