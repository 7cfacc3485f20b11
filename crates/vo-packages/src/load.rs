//! Loading entry points.

use std::sync::Arc;

use crate::config::{Config, ListMode};
use crate::deps::load_deps;
use crate::error::{PackageError, PackageResult};
use crate::export::load_exports;
use crate::package::Package;
use crate::resolve::{is_local, resolve};

/// Loads `paths` and their dependencies, one package per requested path.
///
/// The toolchain is always asked for the dependency set; export data is
/// only requested for packages not yet complete in `conf.cache`.
///
/// Each path must name exactly one package. Directories (`./x`, absolute
/// paths) are translated to import paths the way [`resolve`] does, and the
/// returned packages carry the translated path. Wildcard patterns fail with
/// [`PackageError::InvalidPattern`] before the toolchain is invoked.
pub fn load_packages<S: AsRef<str>>(
    conf: &Config,
    paths: &[S],
) -> PackageResult<Vec<Arc<Package>>> {
    load_with_mode(conf, paths, ListMode::Strict)
}

/// Like [`load_packages`], but answers from the cache when every requested
/// path is already loaded. `None` loads into a fresh default config.
pub fn load<S: AsRef<str>>(
    conf: Option<&Config>,
    paths: &[S],
) -> PackageResult<Vec<Arc<Package>>> {
    let default_conf;
    let conf = match conf {
        Some(conf) => conf,
        None => {
            default_conf = Config::default();
            &default_conf
        }
    };

    let cached: Option<Vec<Arc<Package>>> = paths
        .iter()
        .map(|p| conf.cache.lookup(p.as_ref()))
        .collect();
    if let Some(pkgs) = cached {
        return Ok(pkgs);
    }
    load_packages(conf, paths)
}

pub(crate) fn load_with_mode<S: AsRef<str>>(
    conf: &Config,
    paths: &[S],
    mode: ListMode,
) -> PackageResult<Vec<Arc<Package>>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    let requested = paths
        .iter()
        .map(|p| canonical_path(conf, p.as_ref()))
        .collect::<PackageResult<Vec<String>>>()?;

    let dir = conf.working_dir();
    let deps = load_deps(conf, &dir, &requested, mode)?;
    let exports = {
        // Another load may have committed part of the closure meanwhile.
        let _loading = conf.cache.lock_loads();
        let missing: Vec<&String> = deps.iter().filter(|p| !conf.cache.is_loaded(p)).collect();
        load_exports(conf, &dir, &missing, mode)?
    };

    requested
        .iter()
        .map(|path| {
            conf.cache.lookup(path).ok_or_else(|| PackageError::NotFound {
                path: path.clone(),
                reason: exports.errors.get(path).cloned(),
            })
        })
        .collect()
}

/// Maps a requested path to the import path the toolchain reports for it.
fn canonical_path(conf: &Config, path: &str) -> PackageResult<String> {
    if path.trim().is_empty() || path.contains("...") {
        return Err(PackageError::InvalidPattern(path.to_string()));
    }
    if !is_local(path) {
        return Ok(path.to_string());
    }
    resolve(conf, path)?
        .pop()
        .ok_or_else(|| PackageError::InvalidPattern(path.to_string()))
}

impl Config {
    /// Returns the cached package for `path`, loading it on a miss.
    ///
    /// Unknown packages yield [`PackageError::NotFound`].
    pub fn get_or_load(&self, path: &str) -> PackageResult<Arc<Package>> {
        self.cache.get_or_load(path, |path| {
            load_with_mode(self, &[path], ListMode::Tolerant)?
                .pop()
                .ok_or_else(|| PackageError::NotFound {
                    path: path.to_string(),
                    reason: None,
                })
        })
    }
}
