//! Go package loading for Vo.
//!
//! This crate resolves Go import paths through the host toolchain and caches
//! the loaded packages:
//!
//! - **Pattern resolution**: Translate directories (and `dir/...` subtrees)
//!   into import paths relative to a module root
//! - **Dependency sets**: Ask `go list -deps` for the transitive closure
//! - **Export data**: Ask the toolchain for each package's exported API and
//!   decode it into [`Package`] values
//! - **Caching**: One [`Package`] instance per import path for the lifetime
//!   of a [`Config`]'s cache
//!
//! # Example
//!
//! ```ignore
//! use vo_packages::{load, new_importer, Config, Importer};
//!
//! let conf = Config::from_env(".").with_mod_path("github.com/goplus/gox");
//! let pkgs = load(Some(&conf), &["fmt", "strings"])?;
//!
//! let (importer, pkg_paths) = new_importer(&conf, "./internal/...")?;
//! let fmt = importer.import("fmt")?;
//! assert!(std::sync::Arc::ptr_eq(&fmt, &pkgs[0]));
//! ```

mod config;
mod deps;
mod error;
mod exec;
mod export;
mod importer;
mod load;
mod modfile;
mod package;
mod resolve;

pub use config::{Config, ListMode, ModuleRoot, DEFAULT_TOOL, TOOL_ENV, TRACE_ENV};
pub use deps::{load_deps, load_deps_from};
pub use error::{ErrorKind, ExecError, PackageError, PackageResult};
pub use exec::{CommandRunner, ProcessRunner, ToolCommand};
pub use export::{load_exports, load_exports_from, BlockCodec, ExportCodec, ExportRecord, Exports};
pub use importer::{new_importer, Importer, PackageImporter};
pub use load::{load, load_packages};
pub use modfile::{ModFile, MOD_FILE};
pub use package::{Decl, DeclKind, Package, PackageCache};
pub use resolve::resolve;
