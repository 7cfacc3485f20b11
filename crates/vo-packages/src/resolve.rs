//! Package pattern resolution.
//!
//! Patterns are either import paths, which pass through unchanged, or local
//! directories (`.`, `..`, `./x`, `../x`, absolute paths), which are
//! translated to import paths through the module that owns them. A
//! directory followed by `/...` expands to every package below it.
//!
//! Directory translation is purely lexical: the same directory always maps
//! to the same import path, no matter how it was spelled.

use std::fs;
use std::path::{Component, Path, PathBuf};

use indexmap::IndexSet;

use crate::config::{Config, ModuleRoot};
use crate::error::{PackageError, PackageResult};
use crate::modfile::MOD_FILE;

/// Recursive-subtree suffix.
const RECURSIVE_SUFFIX: &str = "/...";

/// Expands `pattern` into import paths, deduplicated in discovery order.
pub fn resolve(conf: &Config, pattern: &str) -> PackageResult<Vec<String>> {
    if pattern.trim().is_empty() {
        return Err(PackageError::InvalidPattern(pattern.to_string()));
    }

    let (dir, recursive) = split_recursive(pattern);
    if !is_local(dir) {
        return Ok(vec![pattern.to_string()]);
    }

    let cwd = std::env::current_dir()
        .map_err(|e| PackageError::Io(PathBuf::from("."), e.to_string()))?;
    let abs_dir = clean_path(&cwd.join(dir));
    let roots = absolute_roots(&cwd, conf.module_roots());

    if owning_module(&roots, &abs_dir).is_none() {
        return Err(PackageError::OutsideModule(dir.to_string()));
    }

    let mut pkg_dirs = Vec::new();
    if recursive {
        walk_packages(&abs_dir, &conf.source_exts, &mut pkg_dirs)?;
    } else {
        pkg_dirs.push(abs_dir);
    }

    let mut paths = IndexSet::new();
    for pkg_dir in &pkg_dirs {
        let (root, module) = owning_module(&roots, pkg_dir)
            .ok_or_else(|| PackageError::OutsideModule(pkg_dir.display().to_string()))?;
        paths.insert(import_path_for(&module.module_path()?, root, pkg_dir));
    }
    Ok(paths.into_iter().collect())
}

/// Splits a trailing `/...` off the pattern.
fn split_recursive(pattern: &str) -> (&str, bool) {
    match pattern.strip_suffix(RECURSIVE_SUFFIX) {
        Some("") => ("/", true),
        Some(dir) => (dir, true),
        None => (pattern, false),
    }
}

/// Reports whether a pattern names a filesystem directory.
pub(crate) fn is_local(pattern: &str) -> bool {
    pattern == "."
        || pattern == ".."
        || pattern.starts_with("./")
        || pattern.starts_with("../")
        || Path::new(pattern).is_absolute()
        || (cfg!(windows) && (pattern.starts_with(".\\") || pattern.starts_with("..\\")))
}

fn absolute_roots(cwd: &Path, roots: Vec<ModuleRoot>) -> Vec<(PathBuf, ModuleRoot)> {
    roots
        .into_iter()
        .map(|m| (clean_path(&cwd.join(&m.root)), m))
        .collect()
}

/// Finds the innermost module root containing `dir`.
fn owning_module<'a>(
    roots: &'a [(PathBuf, ModuleRoot)],
    dir: &Path,
) -> Option<(&'a Path, &'a ModuleRoot)> {
    roots
        .iter()
        .filter(|(root, _)| dir.starts_with(root))
        .max_by_key(|(root, _)| root.components().count())
        .map(|(root, module)| (root.as_path(), module))
}

fn import_path_for(module_path: &str, root: &Path, dir: &Path) -> String {
    let rel: Vec<String> = dir
        .strip_prefix(root)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    if rel.is_empty() {
        module_path.to_string()
    } else {
        format!("{}/{}", module_path, rel.join("/"))
    }
}

/// Lexically normalises a path: drops `.` and folds `..`.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Collects package directories under `dir` in pre-order, visiting entries
/// in lexical order.
fn walk_packages(dir: &Path, exts: &[String], out: &mut Vec<PathBuf>) -> PackageResult<()> {
    let read_err = |e: std::io::Error| PackageError::Io(dir.to_path_buf(), e.to_string());

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let file_type = entry.file_type().map_err(read_err)?;
        entries.push((entry.file_name(), entry.path(), file_type));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let has_source = entries.iter().any(|(name, path, file_type)| {
        let is_file = file_type.is_file() || (file_type.is_symlink() && path.is_file());
        is_file && is_source_file(&name.to_string_lossy(), exts)
    });
    if has_source {
        out.push(dir.to_path_buf());
    }

    for (name, path, file_type) in &entries {
        if !file_type.is_dir() || skip_dir(&name.to_string_lossy()) {
            continue;
        }
        // Nested modules are not part of this module's subtree.
        if path.join(MOD_FILE).is_file() {
            continue;
        }
        walk_packages(path, exts, out)?;
    }
    Ok(())
}

fn skip_dir(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_') || name == "testdata" || name == "vendor"
}

fn is_source_file(name: &str, exts: &[String]) -> bool {
    if name.starts_with('.') || name.starts_with('_') {
        return false;
    }
    let path = Path::new(name);
    let ext_ok = path
        .extension()
        .map(|e| exts.iter().any(|x| e == x.as_str()))
        .unwrap_or(false);
    let is_test = path
        .file_stem()
        .map(|s| s.to_string_lossy().ends_with("_test"))
        .unwrap_or(false);
    ext_ok && !is_test
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "package x\n").unwrap();
    }

    fn setup_module() -> (TempDir, Config) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "main.go");
        touch(root, "internal/go/a/a.go");
        touch(root, "internal/go/b/b.go");
        touch(root, "internal/go/b/b_test.go");
        touch(root, "internal/go/onlytests/x_test.go");
        touch(root, "internal/go/testdata/t.go");
        touch(root, "internal/go/vendor/golang.org/x/mod/m.go");
        touch(root, "internal/go/.hidden/h.go");
        touch(root, "internal/go/_skip/s.go");
        touch(root, "internal/go/notes/readme.txt");
        touch(root, "internal/go/nested/go.mod");
        touch(root, "internal/go/nested/n.go");

        let conf = Config::new()
            .with_mod_root(root)
            .with_mod_path("github.com/goplus/gox");
        (temp, conf)
    }

    #[test]
    fn test_plain_import_path_unchanged() {
        let conf = Config::new();
        assert_eq!(resolve(&conf, "fmt").unwrap(), vec!["fmt"]);
        assert_eq!(
            resolve(&conf, "github.com/goplus/gox/...").unwrap(),
            vec!["github.com/goplus/gox/..."]
        );
    }

    #[test]
    fn test_empty_pattern() {
        let err = resolve(&Config::new(), "").unwrap_err();
        assert!(matches!(err, PackageError::InvalidPattern(_)));
    }

    #[test]
    fn test_directory_to_import_path() {
        let (temp, conf) = setup_module();
        let root = temp.path().display().to_string();

        assert_eq!(resolve(&conf, &root).unwrap(), vec!["github.com/goplus/gox"]);
        assert_eq!(
            resolve(&conf, &format!("{}/internal/go/a", root)).unwrap(),
            vec!["github.com/goplus/gox/internal/go/a"]
        );
        // Different spellings of one directory agree.
        assert_eq!(
            resolve(&conf, &format!("{}/internal/./go/b/../a", root)).unwrap(),
            vec!["github.com/goplus/gox/internal/go/a"]
        );
    }

    #[test]
    fn test_recursive_expansion() {
        let (temp, conf) = setup_module();
        let pattern = format!("{}/internal/go/...", temp.path().display());

        let first = resolve(&conf, &pattern).unwrap();
        assert_eq!(
            first,
            vec![
                "github.com/goplus/gox/internal/go/a",
                "github.com/goplus/gox/internal/go/b",
            ]
        );
        assert_eq!(resolve(&conf, &pattern).unwrap(), first);
    }

    #[test]
    fn test_recursive_skips_vendor() {
        let (temp, conf) = setup_module();
        let pattern = format!("{}/...", temp.path().display());

        let paths = resolve(&conf, &pattern).unwrap();
        assert!(paths.iter().all(|p| !p.contains("/vendor/")), "{:?}", paths);

        // Naming the vendored directory directly still translates it.
        let vendored = format!("{}/internal/go/vendor/golang.org/x/mod", temp.path().display());
        assert_eq!(
            resolve(&conf, &vendored).unwrap(),
            vec!["github.com/goplus/gox/internal/go/vendor/golang.org/x/mod"]
        );
    }

    #[test]
    fn test_recursive_from_root_includes_root() {
        let (temp, conf) = setup_module();
        let pattern = format!("{}/...", temp.path().display());

        let paths = resolve(&conf, &pattern).unwrap();
        assert_eq!(paths[0], "github.com/goplus/gox");
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_recursive_empty_subtree() {
        let (temp, conf) = setup_module();
        let pattern = format!("{}/internal/go/notes/...", temp.path().display());
        assert!(resolve(&conf, &pattern).unwrap().is_empty());
    }

    #[test]
    fn test_recursive_missing_dir() {
        let (temp, conf) = setup_module();
        let pattern = format!("{}/nope/...", temp.path().display());
        let err = resolve(&conf, &pattern).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_outside_module() {
        let (_temp, conf) = setup_module();
        let err = resolve(&conf, "/...").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Path);
        assert_eq!(err.to_string(), "directory `/` outside available modules");
    }

    #[test]
    fn test_additional_module_root() {
        let (temp, conf) = setup_module();
        let nested = temp.path().join("internal/go/nested");
        let conf = conf.with_module(&nested, "example.com/nested");

        assert_eq!(
            resolve(&conf, &nested.display().to_string()).unwrap(),
            vec!["example.com/nested"]
        );
    }

    #[test]
    fn test_module_path_from_go_mod() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("go.mod"), "module example.com/m\n").unwrap();
        touch(temp.path(), "pkg/p.go");
        let conf = Config::new().with_mod_root(temp.path());

        let pattern = format!("{}/pkg", temp.path().display());
        assert_eq!(resolve(&conf, &pattern).unwrap(), vec!["example.com/m/pkg"]);
    }

    #[test]
    fn test_custom_source_exts() {
        let (temp, mut conf) = setup_module();
        conf.source_exts = vec!["txt".to_string()];
        let pattern = format!("{}/internal/go/...", temp.path().display());
        assert_eq!(
            resolve(&conf, &pattern).unwrap(),
            vec!["github.com/goplus/gox/internal/go/notes"]
        );
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_split_recursive() {
        assert_eq!(split_recursive("./..."), (".", true));
        assert_eq!(split_recursive("/..."), ("/", true));
        assert_eq!(split_recursive("../internal/go/..."), ("../internal/go", true));
        assert_eq!(split_recursive("."), (".", false));
    }

    #[test]
    fn test_is_source_file() {
        let exts = vec!["go".to_string()];
        assert!(is_source_file("a.go", &exts));
        assert!(!is_source_file("a_test.go", &exts));
        assert!(!is_source_file("_a.go", &exts));
        assert!(!is_source_file(".a.go", &exts));
        assert!(!is_source_file("a.txt", &exts));
    }
}
