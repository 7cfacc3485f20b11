//! Dependency-set loading.

use std::path::Path;

use indexmap::IndexSet;

use crate::config::{Config, ListMode};
use crate::error::PackageResult;

/// Lists every import path reachable from `pkgs`, including `pkgs`
/// themselves, by running `go list -deps` in `root_dir`.
///
/// Paths come back in toolchain order, which lists dependencies before the
/// packages that import them.
pub fn load_deps<S: AsRef<str>>(
    conf: &Config,
    root_dir: &Path,
    pkgs: &[S],
    mode: ListMode,
) -> PackageResult<IndexSet<String>> {
    let mut deps = IndexSet::new();
    if pkgs.is_empty() {
        return Ok(deps);
    }

    let mut args = vec!["list".to_string()];
    args.extend(mode.flag().map(str::to_string));
    args.push("-deps".to_string());
    args.extend(pkgs.iter().map(|p| p.as_ref().to_string()));

    let data = conf.run_tool(root_dir, args)?;
    load_deps_from(&mut deps, &data);
    Ok(deps)
}

/// Adds the whitespace-separated import paths in `data` to `deps`.
pub fn load_deps_from(deps: &mut IndexSet<String>, data: &[u8]) {
    for path in String::from_utf8_lossy(data).split_whitespace() {
        deps.insert(path.to_string());
    }
}
