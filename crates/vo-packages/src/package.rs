//! Loaded packages and the package cache.
//!
//! A [`Package`] is created either complete or as a placeholder holding only
//! its import path. Placeholders stand in for packages that are referenced
//! before they are loaded (forward references within an export batch, or
//! imports of packages outside the batch). A placeholder's body is filled
//! at most once and never changes after that, so every `Arc<Package>`
//! handed out stays valid and keeps its identity.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::error::PackageResult;
use crate::export::ExportRecord;

/// Kind of an exported declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Const,
    Var,
    Type,
    Func,
}

impl DeclKind {
    /// Parses a directive keyword (`const`, `var`, `type`, `func`).
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "const" => Some(DeclKind::Const),
            "var" => Some(DeclKind::Var),
            "type" => Some(DeclKind::Type),
            "func" => Some(DeclKind::Func),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            DeclKind::Const => "const",
            DeclKind::Var => "var",
            DeclKind::Type => "type",
            DeclKind::Func => "func",
        }
    }
}

/// An exported declaration of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decl {
    pub kind: DeclKind,
    pub name: String,
    /// Type, signature or value text as emitted by the exporter.
    pub spec: String,
}

impl Decl {
    pub fn new(kind: DeclKind, name: impl Into<String>, spec: impl Into<String>) -> Self {
        Decl {
            kind,
            name: name.into(),
            spec: spec.into(),
        }
    }
}

#[derive(Clone)]
struct PackageBody {
    name: String,
    imports: Vec<Arc<Package>>,
    decls: Vec<Decl>,
    export_file: Option<PathBuf>,
}

/// A resolved package.
pub struct Package {
    path: String,
    body: OnceCell<PackageBody>,
}

impl Package {
    /// Creates a complete package.
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        imports: Vec<Arc<Package>>,
        decls: Vec<Decl>,
        export_file: Option<PathBuf>,
    ) -> Arc<Self> {
        let pkg = Package {
            path: path.into(),
            body: OnceCell::new(),
        };
        let _ = pkg.body.set(PackageBody {
            name: name.into(),
            imports,
            decls,
            export_file,
        });
        Arc::new(pkg)
    }

    /// Creates a placeholder that only knows its import path.
    pub fn placeholder(path: impl Into<String>) -> Arc<Self> {
        Arc::new(Package {
            path: path.into(),
            body: OnceCell::new(),
        })
    }

    /// Returns the import path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the declared package name, or "" for a placeholder.
    pub fn name(&self) -> &str {
        self.body.get().map(|b| b.name.as_str()).unwrap_or("")
    }

    /// Reports whether the package has been fully loaded.
    pub fn is_complete(&self) -> bool {
        self.body.get().is_some()
    }

    /// Returns the directly imported packages.
    pub fn imports(&self) -> &[Arc<Package>] {
        self.body.get().map(|b| b.imports.as_slice()).unwrap_or(&[])
    }

    /// Returns the exported declarations.
    pub fn decls(&self) -> &[Decl] {
        self.body.get().map(|b| b.decls.as_slice()).unwrap_or(&[])
    }

    /// Looks up an exported declaration by name.
    pub fn lookup(&self, name: &str) -> Option<&Decl> {
        self.decls().iter().find(|d| d.name == name)
    }

    /// Returns the toolchain's compiled export-data file, if reported.
    pub fn export_file(&self) -> Option<&Path> {
        self.body.get().and_then(|b| b.export_file.as_deref())
    }

    /// Fills a placeholder. Returns false if the body was already set.
    fn fill(&self, body: PackageBody) -> bool {
        self.body.set(body).is_ok()
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Imports are shown by path; following them could revisit packages.
        let imports: Vec<&str> = self.imports().iter().map(|p| p.path()).collect();
        f.debug_struct("Package")
            .field("path", &self.path)
            .field("name", &self.name())
            .field("complete", &self.is_complete())
            .field("imports", &imports)
            .field("decls", &self.decls().len())
            .finish()
    }
}

/// Mapping from import path to loaded package.
///
/// Clones share the same underlying map. There is no eviction: entries
/// live as long as the cache does.
///
/// Loads into a cache are serialized: at most one loader runs at a time, so
/// an import path is fetched from the toolchain at most once. The map lock
/// itself is only held for lookups and commits.
#[derive(Clone, Default)]
pub struct PackageCache {
    packages: Arc<Mutex<HashMap<String, Arc<Package>>>>,
    loads: Arc<ReentrantMutex<()>>,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `path`, complete or not.
    pub fn get(&self, path: &str) -> Option<Arc<Package>> {
        self.packages.lock().get(path).cloned()
    }

    /// Returns the package for `path` if it is fully loaded.
    pub fn lookup(&self, path: &str) -> Option<Arc<Package>> {
        self.packages
            .lock()
            .get(path)
            .filter(|p| p.is_complete())
            .cloned()
    }

    /// Reports whether `path` is present and fully loaded.
    pub fn is_loaded(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.packages.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.packages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.lock().is_empty()
    }

    /// Returns all cached import paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.packages.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Reports whether both handles refer to the same cache instance.
    pub fn same_cache(&self, other: &PackageCache) -> bool {
        Arc::ptr_eq(&self.packages, &other.packages)
    }

    /// Registers a package and returns the instance the cache holds.
    ///
    /// An existing complete entry wins over `pkg`. An existing placeholder
    /// is filled from `pkg`, so references to it see the loaded package.
    /// Imports are rewired to the cache's own instances, registering any
    /// the cache does not know yet.
    pub fn insert(&self, pkg: Arc<Package>) -> Arc<Package> {
        let mut packages = self.packages.lock();
        let existing = packages.get(pkg.path()).cloned();
        if let Some(existing) = &existing {
            if existing.is_complete() {
                return existing.clone();
            }
        }

        let Some(body) = pkg.body.get() else {
            return match existing {
                Some(existing) => existing,
                None => {
                    packages.insert(pkg.path().to_string(), pkg.clone());
                    pkg
                }
            };
        };

        let imports: Vec<Arc<Package>> = body
            .imports
            .iter()
            .map(|import| {
                packages
                    .entry(import.path().to_string())
                    .or_insert_with(|| import.clone())
                    .clone()
            })
            .collect();
        let rewired = imports
            .iter()
            .zip(&body.imports)
            .any(|(cached, given)| !Arc::ptr_eq(cached, given));
        let body = PackageBody {
            imports,
            ..body.clone()
        };

        match existing {
            Some(existing) => {
                existing.fill(body);
                existing
            }
            None => {
                let stored = if rewired {
                    Arc::new(Package {
                        path: pkg.path.clone(),
                        body: OnceCell::with_value(body),
                    })
                } else {
                    pkg
                };
                packages.insert(stored.path().to_string(), stored.clone());
                stored
            }
        }
    }

    /// Returns the cached package for `path`, loading it on a miss.
    ///
    /// `load` is expected to commit what it loads into this cache; the
    /// cached instance is returned in preference to the loader's result.
    /// The miss path holds the cache's load lock, so concurrent callers for
    /// the same path wait for the first load instead of repeating it.
    pub fn get_or_load<F>(&self, path: &str, load: F) -> PackageResult<Arc<Package>>
    where
        F: FnOnce(&str) -> PackageResult<Arc<Package>>,
    {
        if let Some(pkg) = self.lookup(path) {
            return Ok(pkg);
        }
        let _loading = self.lock_loads();
        if let Some(pkg) = self.lookup(path) {
            return Ok(pkg);
        }
        let loaded = load(path)?;
        Ok(self.insert(loaded))
    }

    /// Acquires the load lock. Reentrant, so a loader running under
    /// [`get_or_load`](Self::get_or_load) may take it again.
    pub(crate) fn lock_loads(&self) -> ReentrantMutexGuard<'_, ()> {
        self.loads.lock()
    }

    /// Commits a decoded export batch.
    ///
    /// Placeholders are registered for every record and every import first,
    /// then bodies are filled with imports wired to those entries. Records
    /// that carry a toolchain error are skipped. Packages already complete
    /// are left untouched. Runs under a single lock acquisition.
    pub(crate) fn commit(&self, records: &[ExportRecord]) -> IndexMap<String, Arc<Package>> {
        let mut packages = self.packages.lock();
        let mut committed = IndexMap::new();

        for record in records.iter().filter(|r| r.error.is_none()) {
            let pkg = packages
                .entry(record.path.clone())
                .or_insert_with(|| Package::placeholder(record.path.clone()))
                .clone();
            committed.insert(record.path.clone(), pkg);
        }

        for record in records.iter().filter(|r| r.error.is_none()) {
            let pkg = &committed[&record.path];
            if pkg.is_complete() {
                continue;
            }
            let imports = record
                .imports
                .iter()
                .map(|path| {
                    packages
                        .entry(path.clone())
                        .or_insert_with(|| Package::placeholder(path.clone()))
                        .clone()
                })
                .collect();
            pkg.fill(PackageBody {
                name: record.name.clone(),
                imports,
                decls: record.decls.clone(),
                export_file: record.export_file.clone(),
            });
        }

        committed
    }
}

impl fmt::Debug for PackageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageCache")
            .field("packages", &self.len())
            .finish()
    }
}
