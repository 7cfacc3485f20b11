//! Loader configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PackageError, PackageResult};
use crate::exec::{CommandRunner, ProcessRunner, ToolCommand};
use crate::export::{BlockCodec, ExportCodec};
use crate::modfile::ModFile;
use crate::package::PackageCache;

/// Default toolchain program.
pub const DEFAULT_TOOL: &str = "go";

/// Environment variable overriding the toolchain program.
pub const TOOL_ENV: &str = "VO_GO_TOOL";

/// Environment variable enabling invocation tracing.
pub const TRACE_ENV: &str = "VO_PACKAGES_TRACE";

/// How the toolchain reports packages it cannot load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Any broken or unknown package fails the whole invocation.
    Strict,
    /// Broken packages are reported per package (`go list -e`).
    Tolerant,
}

impl ListMode {
    pub(crate) fn flag(self) -> Option<&'static str> {
        match self {
            ListMode::Strict => None,
            ListMode::Tolerant => Some("-e"),
        }
    }
}

/// A module root directory and the module path it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRoot {
    /// Filesystem root; empty means the current directory.
    pub root: PathBuf,
    /// Declared module path; empty means "read it from go.mod".
    pub path: String,
}

impl ModuleRoot {
    pub fn new(root: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        ModuleRoot {
            root: root.into(),
            path: path.into(),
        }
    }

    /// Returns the module path, falling back to the go.mod module directive.
    pub fn module_path(&self) -> PackageResult<String> {
        if !self.path.is_empty() {
            return Ok(self.path.clone());
        }
        let root = if self.root.as_os_str().is_empty() {
            Path::new(".")
        } else {
            self.root.as_path()
        };
        ModFile::module_path_in(root)
    }
}

/// Configuration shared by every loading call of a session.
///
/// Cloning a `Config` shares its package cache, so packages loaded through
/// any clone are visible to all of them.
#[derive(Clone)]
pub struct Config {
    /// Loaded packages, keyed by import path.
    pub cache: PackageCache,
    /// Module root directory; empty means the current directory.
    pub mod_root: PathBuf,
    /// Module path of `mod_root`; empty means "read it from go.mod".
    pub mod_path: String,
    /// Additional module roots consulted when translating directories.
    pub modules: Vec<ModuleRoot>,
    /// Toolchain program.
    pub tool: String,
    /// Working directory for toolchain invocations, overriding `mod_root`.
    pub dir: Option<PathBuf>,
    /// Extra environment for toolchain invocations.
    pub env: Vec<(String, String)>,
    /// File extensions that make a directory a package.
    pub source_exts: Vec<String>,
    /// Runs toolchain commands.
    pub runner: Arc<dyn ProcessRunner>,
    /// Export-data encoding requested from and decoded for the toolchain.
    pub codec: Arc<dyn ExportCodec>,
    /// Print toolchain invocations to stderr.
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache: PackageCache::new(),
            mod_root: PathBuf::new(),
            mod_path: String::new(),
            modules: Vec::new(),
            tool: DEFAULT_TOOL.to_string(),
            dir: None,
            env: Vec::new(),
            source_exts: vec!["go".to_string()],
            runner: Arc::new(CommandRunner),
            codec: Arc::new(BlockCodec),
            trace: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config rooted at `project_dir`, honouring environment
    /// overrides.
    pub fn from_env(project_dir: impl Into<PathBuf>) -> Self {
        let tool = std::env::var(TOOL_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOOL.to_string());
        let trace = std::env::var(TRACE_ENV)
            .map(|v| !v.is_empty() && v != "0")
            .unwrap_or(false);

        Config {
            mod_root: project_dir.into(),
            tool,
            trace,
            ..Self::default()
        }
    }

    pub fn with_mod_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mod_root = root.into();
        self
    }

    pub fn with_mod_path(mut self, path: impl Into<String>) -> Self {
        self.mod_path = path.into();
        self
    }

    /// Adds another module search root.
    pub fn with_module(mut self, root: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        self.modules.push(ModuleRoot::new(root, path));
        self
    }

    /// Uses an existing (possibly pre-seeded) cache.
    pub fn with_cache(mut self, cache: PackageCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    pub fn with_codec(mut self, codec: impl ExportCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Directory toolchain commands run in; empty means the current one.
    pub fn working_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => self.mod_root.clone(),
        }
    }

    /// The main module followed by the additional module roots.
    pub fn module_roots(&self) -> Vec<ModuleRoot> {
        let mut roots = Vec::with_capacity(self.modules.len() + 1);
        roots.push(ModuleRoot::new(self.mod_root.clone(), self.mod_path.clone()));
        roots.extend(self.modules.iter().cloned());
        roots
    }

    /// Runs the toolchain with `args` in `dir` and returns its stdout.
    pub(crate) fn run_tool(&self, dir: &Path, args: Vec<String>) -> PackageResult<Vec<u8>> {
        let dir = if dir.as_os_str().is_empty() {
            None
        } else {
            if !dir.is_dir() {
                return Err(PackageError::Io(
                    dir.to_path_buf(),
                    "not a directory".to_string(),
                ));
            }
            Some(dir.to_path_buf())
        };

        let cmd = ToolCommand::new(self.tool.clone())
            .args(args)
            .dir(dir)
            .envs(&self.env);
        self.trace_msg(&cmd);
        Ok(self.runner.run(&cmd)?)
    }

    pub(crate) fn trace_msg(&self, msg: impl fmt::Display) {
        if self.trace {
            eprintln!("[vo-packages] {}", msg);
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("cache", &self.cache)
            .field("mod_root", &self.mod_root)
            .field("mod_path", &self.mod_path)
            .field("modules", &self.modules)
            .field("tool", &self.tool)
            .field("dir", &self.dir)
            .field("env", &self.env)
            .field("source_exts", &self.source_exts)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use parking_lot::Mutex;

    #[test]
    fn test_defaults() {
        let conf = Config::new();
        assert_eq!(conf.tool, "go");
        assert!(conf.mod_root.as_os_str().is_empty());
        assert_eq!(conf.working_dir(), PathBuf::new());
        assert_eq!(conf.source_exts, vec!["go".to_string()]);
        assert!(!conf.trace);
    }

    #[test]
    fn test_clone_shares_cache() {
        let conf = Config::new();
        let clone = conf.clone();
        assert!(conf.cache.same_cache(&clone.cache));
    }

    #[test]
    fn test_working_dir_override() {
        let conf = Config::new().with_mod_root("/src/mod");
        assert_eq!(conf.working_dir(), PathBuf::from("/src/mod"));

        let conf = conf.with_dir("/tmp/work");
        assert_eq!(conf.working_dir(), PathBuf::from("/tmp/work"));
    }

    #[test]
    fn test_module_roots_order() {
        let conf = Config::new()
            .with_mod_root("/a")
            .with_mod_path("example.com/a")
            .with_module("/b", "example.com/b");
        let roots = conf.module_roots();

        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0], ModuleRoot::new("/a", "example.com/a"));
        assert_eq!(roots[1], ModuleRoot::new("/b", "example.com/b"));
    }

    #[test]
    fn test_module_path_from_go_mod() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("go.mod"), "module example.com/from/gomod\n").unwrap();

        let root = ModuleRoot::new(temp.path(), "");
        assert_eq!(root.module_path().unwrap(), "example.com/from/gomod");

        let explicit = ModuleRoot::new(temp.path(), "example.com/explicit");
        assert_eq!(explicit.module_path().unwrap(), "example.com/explicit");
    }

    #[test]
    fn test_run_tool_passes_command() {
        let seen: Arc<Mutex<Vec<ToolCommand>>> = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let temp = tempfile::TempDir::new().unwrap();
        let conf = Config::new()
            .with_tool("gotip")
            .with_env("GOFLAGS", "-mod=mod")
            .with_runner(move |cmd: &ToolCommand| -> Result<Vec<u8>, ExecError> {
                log.lock().push(cmd.clone());
                Ok(b"ok".to_vec())
            });

        let out = conf
            .run_tool(temp.path(), vec!["list".to_string(), "fmt".to_string()])
            .unwrap();
        assert_eq!(out, b"ok");

        let seen = seen.lock();
        assert_eq!(seen[0].program, "gotip");
        assert_eq!(seen[0].args, vec!["list", "fmt"]);
        assert_eq!(seen[0].dir.as_deref(), Some(temp.path()));
        assert_eq!(seen[0].env, vec![("GOFLAGS".to_string(), "-mod=mod".to_string())]);
    }

    #[test]
    fn test_run_tool_rejects_missing_dir() {
        let conf = Config::new().with_runner(|_: &ToolCommand| -> Result<Vec<u8>, ExecError> {
            panic!("must not run")
        });
        let err = conf
            .run_tool(Path::new("/.vo-packages-missing"), vec!["list".to_string()])
            .unwrap_err();
        assert!(matches!(err, PackageError::Io(..)));
    }
}
