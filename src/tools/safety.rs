use std::io;
use std::path::{Component, Path, PathBuf};

/// A requested path normalized to somewhere outside the sandbox root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path \"{path}\" is outside the permitted working directory")]
pub struct ContainmentError {
    /// The path exactly as the caller supplied it.
    pub path: String,
}

/// Absolute, normalized directory that every tool operation is confined to.
///
/// The root is fixed at construction. Tools never build a path on their own;
/// they go through [`SandboxRoot::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRoot {
    path: PathBuf,
}

impl SandboxRoot {
    /// Make `path` absolute (against the current directory) and normalize it.
    ///
    /// Symbolic links are not followed.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let absolute = std::path::absolute(path.as_ref())?;
        Ok(Self {
            path: normalize(&absolute),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Join `relative` onto the root and check the result stays inside it.
    ///
    /// Containment is decided on whole path segments, so `/srv/app` does not
    /// contain `/srv/application`. An absolute `relative` is accepted only
    /// when it already lies under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ContainmentError> {
        let target = normalize(&self.path.join(relative));
        if target.starts_with(&self.path) {
            Ok(target)
        } else {
            Err(ContainmentError {
                path: relative.to_string(),
            })
        }
    }
}

/// Lexically normalize a path: drop `.`, apply `..` against the preceding
/// segment. `..` at the filesystem root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => clean.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            Component::Normal(segment) => clean.push(segment),
        }
    }
    clean
}

/// Truncate to at most `max_chars` characters. The flag reports whether
/// anything was cut.
pub fn truncate_string(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (s[..byte_idx].to_string(), true),
        None => (s.to_string(), false),
    }
}
