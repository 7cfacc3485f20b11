//! Package importer.
//!
//! This module provides the interface a type checker uses to import
//! packages by path.

use std::sync::Arc;

use crate::config::Config;
use crate::error::PackageResult;
use crate::package::Package;
use crate::resolve::resolve;

/// Trait for package importers.
pub trait Importer {
    /// Imports a package by import path.
    ///
    /// A path the toolchain does not know fails with
    /// [`PackageError::NotFound`](crate::PackageError::NotFound).
    fn import(&self, path: &str) -> PackageResult<Arc<Package>>;
}

impl<T: Importer + ?Sized> Importer for &T {
    fn import(&self, path: &str) -> PackageResult<Arc<Package>> {
        (**self).import(path)
    }
}

/// An importer backed by a config's package cache and the host toolchain.
#[derive(Debug, Clone)]
pub struct PackageImporter {
    conf: Config,
}

impl PackageImporter {
    pub fn new(conf: Config) -> Self {
        PackageImporter { conf }
    }

    pub fn config(&self) -> &Config {
        &self.conf
    }
}

impl Importer for PackageImporter {
    fn import(&self, path: &str) -> PackageResult<Arc<Package>> {
        self.conf.get_or_load(path)
    }
}

/// Creates an importer sharing `conf`'s cache, and resolves `pattern` to
/// the import paths it names.
pub fn new_importer(conf: &Config, pattern: &str) -> PackageResult<(PackageImporter, Vec<String>)> {
    let pkg_paths = resolve(conf, pattern)?;
    conf.trace_msg(format_args!("{} -> {:?}", pattern, pkg_paths));
    Ok((PackageImporter::new(conf.clone()), pkg_paths))
}
