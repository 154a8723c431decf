use std::fmt;
use std::str::FromStr;

/// Normalized absolute path inside the repository.
///
/// The repository root is the empty path. Every other path starts with `/` and has no trailing
/// slash, no empty components and no `.` components, so mountpoints compare and hash cheaply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatalogPath(String);

impl CatalogPath {
    /// The repository root.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize `raw` into a catalog path. `..` pops the previous component and never escapes
    /// the root.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let mut parts: Vec<&str> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }

        let mut out = String::with_capacity(raw.len() + 1);
        for part in parts {
            out.push('/');
            out.push_str(part);
        }
        Self(out)
    }

    /// The normalized text; empty for the root.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Component-wise prefix test. The root is a prefix of every path and every path is a
    /// prefix of itself; `/a` is not a prefix of `/ab`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        if self.is_root() {
            return true;
        }
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Like [`is_prefix_of`](Self::is_prefix_of), excluding equality.
    #[must_use]
    pub fn is_strict_prefix_of(&self, other: &Self) -> bool {
        self != other && self.is_prefix_of(other)
    }

    /// The enclosing directory, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind('/').unwrap_or(0);
        Some(Self(self.0[..idx].to_owned()))
    }

    /// The last component, or `None` for the root.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Append `name`, which may itself contain several components.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        Self::new(&format!("{}/{name}", self.0))
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of components; zero for the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// This path and all of its ancestors, deepest first, ending with the root.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::with_capacity(self.depth() + 1);
        let mut cur = Some(self.clone());
        while let Some(path) = cur {
            cur = path.parent();
            out.push(path);
        }
        out
    }
}

impl fmt::Display for CatalogPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for CatalogPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl FromStr for CatalogPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
