//! Command and path authorization
//!
//! Provides a whitelist-based security model for sandboxed runs. Commands
//! must be named in the whitelist to run; paths must fall under a configured
//! root for the intended kind of access. An empty policy denies everything
//! except the always-permitted device paths.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Paths any policy permits, whatever the intent.
const DEVICE_PATHS: &[&str] = &["/dev/null"];

/// Side-effect-free text utilities permitted by [`Policy::default_pure`].
const PURE_COMMANDS: &[&str] = &[
    "echo", "printf", "sed", "grep", "tr", "cut", "cat", "head", "tail", "seq", "wc", "ls", "pwd",
    "basename", "dirname", "realpath", "sleep", "uniq", "sort",
];

/// What a path is about to be opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathIntent {
    /// `<`, `<<<` sources and file tests
    Read,
    /// `>` truncating write
    Write,
    /// `>>` append
    Append,
    /// Creating a file that does not exist yet
    Create,
}

impl PathIntent {
    fn writes(self) -> bool {
        !matches!(self, PathIntent::Read)
    }
}

/// Authorization policy for one or more runs.
///
/// Immutable once a run starts; the engine shares it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use shsandbox::{PathIntent, Policy};
/// use std::path::Path;
///
/// let policy = Policy::new()
///     .allow_commands(["echo", "sed"])
///     .allow_write_root("/tmp/out");
///
/// assert!(policy.is_command_allowed("sed"));
/// assert!(!policy.is_command_allowed("rm"));
/// assert!(policy.is_path_allowed(Path::new("/tmp/out/a.txt"), PathIntent::Write));
/// assert!(!policy.is_path_allowed(Path::new("/tmp/out/../etc"), PathIntent::Read));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Policy {
    commands: HashSet<String>,
    read_roots: Vec<PathBuf>,
    write_roots: Vec<PathBuf>,
    /// If true, allow every command name (testing only)
    allow_all_commands: bool,
    /// If true, match paths by where their symlinks lead
    resolve_symlinks: bool,
}

impl Policy {
    /// Create an empty policy (denies every command and path).
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy permitting the side-effect-free text utilities and no
    /// filesystem roots.
    pub fn default_pure() -> Self {
        Self::new().allow_commands(PURE_COMMANDS.iter().copied())
    }

    /// Permit a command name.
    pub fn allow_command(mut self, name: impl Into<String>) -> Self {
        self.commands.insert(name.into());
        self
    }

    /// Permit several command names.
    pub fn allow_commands(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for name in names {
            self.commands.insert(name.into());
        }
        self
    }

    /// Permit every command name.
    ///
    /// # Warning
    ///
    /// This disables the whitelist entirely and should only be used for
    /// testing or fully trusted scripts. Path rules still apply.
    pub fn allow_all_commands(mut self) -> Self {
        self.allow_all_commands = true;
        self
    }

    /// Permit reads anywhere under `root`.
    pub fn allow_read_root(mut self, root: impl AsRef<Path>) -> Self {
        self.read_roots.push(normalize(root.as_ref()));
        self
    }

    /// Permit reads and writes anywhere under `root`.
    pub fn allow_write_root(mut self, root: impl AsRef<Path>) -> Self {
        self.write_roots.push(normalize(root.as_ref()));
        self
    }

    /// Match paths by their physical location as well as their lexical one.
    ///
    /// Each check then consults the filesystem: symlinks in the path and in
    /// the roots are followed, and a path whose link cannot be resolved is
    /// denied. Without this, a link inside a root pointing elsewhere is
    /// written through.
    pub fn resolve_symlinks(mut self, enabled: bool) -> Self {
        self.resolve_symlinks = enabled;
        self
    }

    /// Whether `name` is in the whitelist (exact match).
    pub fn is_command_allowed(&self, name: &str) -> bool {
        self.allow_all_commands || self.commands.contains(name)
    }

    /// Whether `path` may be opened for `intent`.
    ///
    /// The path is normalized lexically. Relative paths never match, so
    /// callers resolve them against the working directory first.
    ///
    /// # Limitations
    ///
    /// By default the filesystem is never consulted, so a symlink under a
    /// root that points outside every root still matches. Enable
    /// [`Policy::resolve_symlinks`] when scripts can create links or the
    /// roots already hold some.
    pub fn is_path_allowed(&self, path: &Path, intent: PathIntent) -> bool {
        let path = normalize(path);
        if DEVICE_PATHS.iter().any(|dev| path == Path::new(dev)) {
            return true;
        }
        if !path.is_absolute() {
            return false;
        }

        let roots: Vec<&PathBuf> = if intent.writes() {
            self.write_roots.iter().collect()
        } else {
            self.read_roots.iter().chain(&self.write_roots).collect()
        };
        if !roots.iter().any(|root| path.starts_with(root)) {
            return false;
        }
        if !self.resolve_symlinks {
            return true;
        }

        let Some(physical) = physical(&path) else {
            return false;
        };
        roots.iter().any(|root| {
            let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
            physical.starts_with(root)
        })
    }

    /// Names in the whitelist, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// `..` above the root stays at the root; on a relative path it is kept, so
/// the result can never be mistaken for a path under a configured root.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => result.push("/"),
            Component::Normal(name) => result.push(name),
            Component::ParentDir => {
                if !result.pop() && !result.has_root() {
                    result.push("..");
                }
            }
            Component::CurDir | Component::Prefix(_) => {}
        }
    }
    result
}

/// Where a normalized absolute path really leads: the deepest existing
/// ancestor is canonicalized and the rest appended. `None` when an existing
/// entry cannot be resolved, such as a dangling link.
fn physical(path: &Path) -> Option<PathBuf> {
    for existing in path.ancestors() {
        match std::fs::canonicalize(existing) {
            Ok(real) => {
                let rest = path.strip_prefix(existing).ok()?;
                return Some(real.join(rest));
            }
            Err(_) if std::fs::symlink_metadata(existing).is_ok() => return None,
            Err(_) => {}
        }
    }
    Some(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_policy_denies_everything() {
        let policy = Policy::new();
        assert!(!policy.is_command_allowed("echo"));
        assert!(!policy.is_path_allowed(Path::new("/tmp/x"), PathIntent::Read));
    }

    #[test]
    fn test_default_pure_whitelist() {
        let policy = Policy::default_pure();
        for name in ["echo", "sed", "grep", "sort", "uniq", "wc"] {
            assert!(policy.is_command_allowed(name), "{} should be allowed", name);
        }
        for name in ["rm", "curl", "sh", "bash", "mv", "env", "xargs"] {
            assert!(!policy.is_command_allowed(name), "{} should be denied", name);
        }
    }

    #[test]
    fn test_exact_match_only() {
        let policy = Policy::new().allow_command("sed");
        assert!(!policy.is_command_allowed("sed2"));
        assert!(!policy.is_command_allowed("/bin/sed"));
        assert!(!policy.is_command_allowed("SED"));
    }

    #[test]
    fn test_allow_all_commands() {
        let policy = Policy::new().allow_all_commands();
        assert!(policy.is_command_allowed("anything"));
        assert!(!policy.is_path_allowed(Path::new("/etc/passwd"), PathIntent::Read));
    }

    #[test]
    fn test_dev_null_always_allowed() {
        let policy = Policy::new();
        for intent in [
            PathIntent::Read,
            PathIntent::Write,
            PathIntent::Append,
            PathIntent::Create,
        ] {
            assert!(policy.is_path_allowed(Path::new("/dev/null"), intent));
        }
        assert!(policy.is_path_allowed(Path::new("/dev/./null"), PathIntent::Write));
    }

    #[test]
    fn test_read_and_write_roots() {
        let policy = Policy::new()
            .allow_read_root("/data/in")
            .allow_write_root("/data/out");
        assert!(policy.is_path_allowed(Path::new("/data/in/a"), PathIntent::Read));
        assert!(!policy.is_path_allowed(Path::new("/data/in/a"), PathIntent::Write));
        assert!(policy.is_path_allowed(Path::new("/data/out/b"), PathIntent::Read));
        assert!(policy.is_path_allowed(Path::new("/data/out/b"), PathIntent::Append));
        assert!(policy.is_path_allowed(Path::new("/data/out"), PathIntent::Create));
    }

    #[test]
    fn test_root_matching_is_component_wise() {
        let policy = Policy::new().allow_write_root("/data");
        assert!(policy.is_path_allowed(Path::new("/data/x"), PathIntent::Write));
        assert!(!policy.is_path_allowed(Path::new("/database"), PathIntent::Write));
    }

    #[test]
    fn test_traversal_is_rejected() {
        let policy = Policy::new().allow_write_root("/sandbox");
        assert!(!policy.is_path_allowed(Path::new("/sandbox/../etc/passwd"), PathIntent::Read));
        assert!(policy.is_path_allowed(Path::new("/sandbox/a/../b"), PathIntent::Write));
    }

    #[test]
    fn test_relative_paths_never_match() {
        let policy = Policy::new().allow_write_root("/");
        assert!(!policy.is_path_allowed(Path::new("some-file"), PathIntent::Write));
        assert!(!policy.is_path_allowed(Path::new("../x"), PathIntent::Read));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("../a")), PathBuf::from("../a"));
    }

    #[test]
    fn test_commands_sorted() {
        let policy = Policy::new().allow_commands(["sed", "echo"]);
        assert_eq!(policy.commands(), vec!["echo", "sed"]);
    }
}
