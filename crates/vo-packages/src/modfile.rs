//! Reader for go.mod files.
//!
//! Only the parts needed to translate directories into import paths are
//! kept:
//! ```text
//! module <module-path>
//! go <version>
//! ```
//!
//! All other directives (`require`, `replace`, ...) are accepted in either
//! single-line or parenthesised block form and skipped.

use std::fs;
use std::path::Path;

use crate::error::{PackageError, PackageResult};

/// The go.mod file name.
pub const MOD_FILE: &str = "go.mod";

/// Directives that are recognised but carry nothing we need.
const SKIPPED_DIRECTIVES: &[&str] = &[
    "require", "replace", "exclude", "retract", "toolchain", "godebug", "tool", "ignore",
];

/// A parsed go.mod file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    /// The module path (e.g., "github.com/goplus/gox").
    pub module: String,

    /// The `go` directive version, if any.
    pub go_version: Option<String>,
}

impl ModFile {
    /// Parses a go.mod file from the given path.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> PackageResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PackageError::ModFileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| PackageError::Io(path.to_path_buf(), e.to_string()))?;

        Self::parse(&content, path)
    }

    /// Parses go.mod content from a string.
    pub fn parse(content: &str, file_path: &Path) -> PackageResult<Self> {
        let mut module: Option<String> = None;
        let mut go_version: Option<String> = None;
        // Line where the open block started.
        let mut block_start: Option<usize> = None;

        let parse_error = |line: usize, message: String| PackageError::ModFileParse {
            file: file_path.to_path_buf(),
            line,
            message,
        };

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1; // 1-indexed
            let line = strip_comment(line).trim();

            if line.is_empty() {
                continue;
            }

            if block_start.is_some() {
                if line == ")" {
                    block_start = None;
                }
                continue;
            }

            let (directive, rest) = match line.split_once(char::is_whitespace) {
                Some((directive, rest)) => (directive, rest.trim()),
                None => (line, ""),
            };

            match directive {
                "module" => {
                    if module.is_some() {
                        return Err(PackageError::DuplicateModuleDecl(file_path.to_path_buf()));
                    }
                    let module_path = unquote_module_path(rest);
                    if !is_valid_module_path(module_path) {
                        return Err(parse_error(
                            line_num,
                            format!("invalid module path: {}", rest),
                        ));
                    }
                    module = Some(module_path.to_string());
                }
                "go" => {
                    if rest.is_empty() {
                        return Err(parse_error(line_num, "go directive needs a version".to_string()));
                    }
                    go_version = Some(rest.to_string());
                }
                d if SKIPPED_DIRECTIVES.contains(&d) => {
                    if rest == "(" {
                        block_start = Some(line_num);
                    }
                }
                _ => {
                    return Err(parse_error(line_num, format!("unknown directive: {}", directive)));
                }
            }
        }

        if let Some(start) = block_start {
            return Err(parse_error(start, "unterminated block".to_string()));
        }

        let module =
            module.ok_or_else(|| PackageError::MissingModuleDecl(file_path.to_path_buf()))?;

        Ok(ModFile { module, go_version })
    }

    /// Reads the module path declared in `<root>/go.mod`.
    pub fn module_path_in(root: &Path) -> PackageResult<String> {
        Ok(Self::parse_file(root.join(MOD_FILE))?.module)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn unquote_module_path(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Validates a module path.
///
/// A valid module path:
/// - Is not empty
/// - Does not start or end with /
/// - Does not contain // or whitespace
fn is_valid_module_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    if path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    if path.contains("//") {
        return false;
    }
    !path.chars().any(char::is_whitespace)
}
