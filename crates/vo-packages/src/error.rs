//! Error types for package loading.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// A failed toolchain invocation.
///
/// The stderr text, when present, is the user-visible message. Otherwise the
/// wrapped system error is shown, and failing that the exit status.
#[derive(Debug, Default)]
pub struct ExecError {
    /// Raw stderr output of the tool.
    pub stderr: Vec<u8>,
    /// Lower-level error (spawn failure, bad working directory, ...).
    pub source: Option<io::Error>,
    /// Exit status description, e.g. `exit status: 1`.
    pub status: Option<String>,
}

impl ExecError {
    /// Creates an error carrying the tool's stderr output.
    pub fn with_stderr(stderr: impl Into<Vec<u8>>) -> Self {
        ExecError {
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Creates an error wrapping a system error.
    pub fn with_source(source: io::Error) -> Self {
        ExecError {
            source: Some(source),
            ..Default::default()
        }
    }

    /// Returns the trimmed stderr text.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stderr = self.stderr_text();
        if !stderr.is_empty() {
            return f.write_str(&stderr);
        }
        if let Some(err) = &self.source {
            return write!(f, "{}", err);
        }
        match &self.status {
            Some(status) => f.write_str(status),
            None => f.write_str("command failed"),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as _)
    }
}

/// Coarse classification of a [`PackageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The toolchain failed to start or exited non-zero.
    Invocation,
    /// Malformed export data or go.mod content.
    Parse,
    /// The import path does not exist in the build graph.
    NotFound,
    /// A directory pattern lies outside every module, or is invalid.
    Path,
    /// Filesystem access failed.
    Io,
}

/// Errors that can occur while resolving and loading packages.
#[derive(Debug)]
pub enum PackageError {
    /// Toolchain invocation failed.
    Exec(ExecError),

    /// Malformed export data.
    Parse { line: usize, message: String },

    /// Import path unknown to the toolchain.
    NotFound {
        path: String,
        reason: Option<String>,
    },

    /// Directory pattern outside every configured module root.
    OutsideModule(String),

    /// Pattern that cannot name anything.
    InvalidPattern(String),

    /// Failed to read a file or directory.
    Io(PathBuf, String),

    /// go.mod file not found.
    ModFileNotFound(PathBuf),

    /// Parse error in go.mod.
    ModFileParse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// Missing module directive.
    MissingModuleDecl(PathBuf),

    /// Duplicate module directive.
    DuplicateModuleDecl(PathBuf),
}

impl PackageError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PackageError::Exec(_) => ErrorKind::Invocation,
            PackageError::Parse { .. }
            | PackageError::ModFileParse { .. }
            | PackageError::MissingModuleDecl(_)
            | PackageError::DuplicateModuleDecl(_) => ErrorKind::Parse,
            PackageError::NotFound { .. } => ErrorKind::NotFound,
            PackageError::OutsideModule(_) | PackageError::InvalidPattern(_) => ErrorKind::Path,
            PackageError::Io(..) | PackageError::ModFileNotFound(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        PackageError::Parse {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for PackageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageError::Exec(err) => write!(f, "{}", err),
            PackageError::Parse { line, message } => {
                write!(f, "export data:{}: {}", line, message)
            }
            PackageError::NotFound { path, reason } => match reason {
                Some(reason) => write!(f, "cannot find package \"{}\": {}", path, reason),
                None => write!(f, "cannot find package \"{}\"", path),
            },
            PackageError::OutsideModule(dir) => {
                write!(f, "directory `{}` outside available modules", dir)
            }
            PackageError::InvalidPattern(pattern) => {
                write!(f, "invalid package pattern \"{}\"", pattern)
            }
            PackageError::Io(path, msg) => {
                write!(f, "failed to read {}: {}", path.display(), msg)
            }
            PackageError::ModFileNotFound(path) => {
                write!(f, "go.mod not found at {}", path.display())
            }
            PackageError::ModFileParse { file, line, message } => {
                write!(f, "{}:{}: {}", file.display(), line, message)
            }
            PackageError::MissingModuleDecl(path) => {
                write!(f, "missing module declaration in {}", path.display())
            }
            PackageError::DuplicateModuleDecl(path) => {
                write!(f, "duplicate module declaration in {}", path.display())
            }
        }
    }
}

impl std::error::Error for PackageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PackageError::Exec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ExecError> for PackageError {
    fn from(err: ExecError) -> Self {
        PackageError::Exec(err)
    }
}

impl From<PackageError> for io::Error {
    fn from(err: PackageError) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::Parse => io::ErrorKind::InvalidData,
            ErrorKind::Path => io::ErrorKind::InvalidInput,
            ErrorKind::Invocation | ErrorKind::Io => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_prefers_stderr() {
        let err = ExecError::with_stderr("Hi\n");
        assert_eq!(err.to_string(), "Hi");

        let err = ExecError {
            stderr: b"  boom  ".to_vec(),
            source: Some(io::Error::new(io::ErrorKind::Other, "ignored")),
            status: Some("exit status: 1".to_string()),
        };
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_exec_error_falls_back() {
        let err = ExecError::with_source(io::Error::new(io::ErrorKind::Other, "Hi"));
        assert_eq!(err.to_string(), "Hi");

        let err = ExecError {
            stderr: b" \n".to_vec(),
            status: Some("exit status: 1".to_string()),
            ..Default::default()
        };
        assert_eq!(err.to_string(), "exit status: 1");
    }

    #[test]
    fn test_kind_classification() {
        let exec: PackageError = ExecError::with_stderr("x").into();
        assert_eq!(exec.kind(), ErrorKind::Invocation);

        let missing = PackageError::NotFound {
            path: "not-found".to_string(),
            reason: None,
        };
        assert!(missing.is_not_found());
        assert!(!exec.is_not_found());

        let io_err: io::Error = missing.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_outside_module_message() {
        let err = PackageError::OutsideModule("/".to_string());
        assert_eq!(err.to_string(), "directory `/` outside available modules");
        assert_eq!(err.kind(), ErrorKind::Path);
    }
}
