//! Export-data loading.
//!
//! The toolchain is asked for export information about a batch of import
//! paths. The reply is decoded by an [`ExportCodec`] into one
//! [`ExportRecord`] per package, and the whole batch is then committed to
//! the package cache. Decoding finishes before anything is committed, so a
//! malformed reply leaves the cache as it was.
//!
//! # Block encoding
//!
//! [`BlockCodec`], the default codec, reads a sequence of blocks:
//!
//! ```text
//! {
//! "encoding/json" json
//! import "bytes"
//! import "reflect"
//! export "/home/u/.cache/go-build/3f/3f9c...-d"
//! func Marshal func(v any) ([]byte, error)
//! type Decoder struct{...}
//! }
//! ```
//!
//! The header line holds the quoted import path and the package name. Body
//! lines are `import`, `export` and `error` (each with a quoted argument),
//! or a declaration: `const`, `var`, `type` or `func`, followed by the
//! declared name and its spec. Strings use Go quoting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashSet;
use indexmap::IndexMap;

use crate::config::{Config, ListMode};
use crate::error::{PackageError, PackageResult};
use crate::package::{Decl, DeclKind, Package};

/// Export information for one package, as decoded from the toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRecord {
    pub path: String,
    pub name: String,
    pub imports: Vec<String>,
    pub decls: Vec<Decl>,
    pub export_file: Option<PathBuf>,
    /// Toolchain diagnostic for a package that could not be loaded.
    pub error: Option<String>,
}

/// Encoding of export data exchanged with the toolchain.
pub trait ExportCodec: Send + Sync {
    /// Arguments that make `go list` emit this encoding.
    fn list_args(&self) -> Vec<String>;

    /// Decodes a complete reply. Any malformed input fails the whole call.
    fn decode(&self, data: &[u8]) -> PackageResult<Vec<ExportRecord>>;
}

/// The result of an export-data request.
#[derive(Debug, Default)]
pub struct Exports {
    /// Packages of the batch, in reply order.
    pub packages: IndexMap<String, Arc<Package>>,
    /// Packages the toolchain reported as broken, with its diagnostic.
    pub errors: IndexMap<String, String>,
}

/// Requests export data for `paths` and commits it to the cache.
pub fn load_exports<S: AsRef<str>>(
    conf: &Config,
    root_dir: &Path,
    paths: &[S],
    mode: ListMode,
) -> PackageResult<Exports> {
    if paths.is_empty() {
        return Ok(Exports::default());
    }

    let mut args = vec!["list".to_string()];
    args.extend(mode.flag().map(str::to_string));
    args.extend(conf.codec.list_args());
    args.extend(paths.iter().map(|p| p.as_ref().to_string()));

    let data = conf.run_tool(root_dir, args)?;
    load_exports_from(conf, &data)
}

/// Decodes an already captured reply and commits it to the cache.
pub fn load_exports_from(conf: &Config, data: &[u8]) -> PackageResult<Exports> {
    let records = conf.codec.decode(data)?;
    let errors = records
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| (r.path.clone(), e.clone())))
        .collect();
    let packages = conf.cache.commit(&records);
    conf.trace_msg(format_args!(
        "committed {} packages, {} cached",
        packages.len(),
        conf.cache.len()
    ));
    Ok(Exports { packages, errors })
}

/// `go list -f` template producing the block encoding.
const BLOCK_TEMPLATE: &str = concat!(
    "{\n",
    "{{printf \"%q\" .ImportPath}} {{.Name}}\n",
    "{{with .Error}}error {{printf \"%q\" .Err}}\n{{end}}",
    "{{range .Imports}}import {{printf \"%q\" .}}\n{{end}}",
    "{{with .Export}}export {{printf \"%q\" .}}\n{{end}}",
    "}",
);

/// The default, line-oriented block codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockCodec;

impl ExportCodec for BlockCodec {
    fn list_args(&self) -> Vec<String> {
        vec![
            "-export".to_string(),
            "-f".to_string(),
            BLOCK_TEMPLATE.to_string(),
        ]
    }

    fn decode(&self, data: &[u8]) -> PackageResult<Vec<ExportRecord>> {
        let text = std::str::from_utf8(data)
            .map_err(|e| PackageError::parse(0, format!("export data is not UTF-8: {}", e)))?;
        BlockDecoder::default().decode(text)
    }
}

/// An open `{ ... }` block.
struct OpenBlock {
    start: usize,
    record: Option<ExportRecord>,
}

#[derive(Default)]
struct BlockDecoder {
    records: Vec<ExportRecord>,
    seen: HashSet<String>,
}

impl BlockDecoder {
    fn decode(mut self, text: &str) -> PackageResult<Vec<ExportRecord>> {
        let mut block: Option<OpenBlock> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_num = idx + 1;
            let line = raw.trim();

            let Some(open) = block.as_mut() else {
                match line {
                    "" => {}
                    "{" => {
                        block = Some(OpenBlock {
                            start: line_num,
                            record: None,
                        })
                    }
                    "}" => {
                        return Err(PackageError::parse(
                            line_num,
                            "unexpected `}` outside package block",
                        ))
                    }
                    _ => {
                        return Err(PackageError::parse(
                            line_num,
                            format!("unexpected data outside package block: {}", line),
                        ))
                    }
                }
                continue;
            };

            match line {
                "" => {}
                "{" => {
                    return Err(PackageError::parse(
                        line_num,
                        "unexpected `{` inside package block",
                    ))
                }
                "}" => {
                    let record = open.record.take().ok_or_else(|| {
                        PackageError::parse(open.start, "missing package header")
                    })?;
                    self.finish(open.start, record)?;
                    block = None;
                }
                _ => match open.record.as_mut() {
                    None => open.record = Some(parse_header(line_num, line)?),
                    Some(record) => parse_directive(line_num, line, record)?,
                },
            }
        }

        if let Some(open) = block {
            return Err(PackageError::parse(open.start, "unterminated package block"));
        }
        Ok(self.records)
    }

    fn finish(&mut self, start: usize, record: ExportRecord) -> PackageResult<()> {
        if record.name.is_empty() && record.error.is_none() {
            return Err(PackageError::parse(
                start,
                format!("package \"{}\" has no name", record.path),
            ));
        }
        if record.imports.iter().any(|p| *p == record.path) {
            return Err(PackageError::parse(
                start,
                format!("package \"{}\" imports itself", record.path),
            ));
        }
        if !self.seen.insert(record.path.clone()) {
            return Err(PackageError::parse(
                start,
                format!("duplicate package \"{}\"", record.path),
            ));
        }
        self.records.push(record);
        Ok(())
    }
}

fn parse_header(line_num: usize, line: &str) -> PackageResult<ExportRecord> {
    let invalid = || PackageError::parse(line_num, format!("invalid package header: {}", line));
    if !line.starts_with('"') {
        return Err(invalid());
    }
    let (path, rest) =
        unquote_prefix(line).map_err(|msg| PackageError::parse(line_num, msg))?;
    let name = rest.trim();
    if path.is_empty() || (!name.is_empty() && !is_identifier(name)) {
        return Err(invalid());
    }
    Ok(ExportRecord {
        path,
        name: name.to_string(),
        ..Default::default()
    })
}

fn parse_directive(line_num: usize, line: &str, record: &mut ExportRecord) -> PackageResult<()> {
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    if let Some(kind) = DeclKind::from_keyword(word) {
        let (name, spec) = match rest.split_once(char::is_whitespace) {
            Some((name, spec)) => (name, spec.trim()),
            None => (rest, ""),
        };
        if !is_identifier(name) {
            return Err(PackageError::parse(
                line_num,
                format!("invalid {} name: {:?}", kind.keyword(), name),
            ));
        }
        record.decls.push(Decl::new(kind, name, spec));
        return Ok(());
    }

    let value = match word {
        "import" | "export" | "error" => quoted_operand(line_num, word, rest)?,
        _ => {
            return Err(PackageError::parse(
                line_num,
                format!("unknown directive `{}`", word),
            ))
        }
    };
    match word {
        "import" => record.imports.push(value),
        "export" => record.export_file = Some(PathBuf::from(value)),
        _ => record.error = Some(value),
    }
    Ok(())
}

/// Parses a directive operand that must be exactly one quoted string.
fn quoted_operand(line_num: usize, word: &str, rest: &str) -> PackageResult<String> {
    if !rest.starts_with('"') {
        return Err(PackageError::parse(
            line_num,
            format!("{} expects a quoted string", word),
        ));
    }
    let (value, tail) = unquote_prefix(rest).map_err(|msg| PackageError::parse(line_num, msg))?;
    if !tail.trim().is_empty() {
        return Err(PackageError::parse(
            line_num,
            format!("unexpected text after {} operand: {}", word, tail.trim()),
        ));
    }
    if value.is_empty() && word != "error" {
        return Err(PackageError::parse(line_num, format!("empty {} path", word)));
    }
    Ok(value)
}

/// Unquotes a Go string literal at the start of `s`.
///
/// Returns the value and the text after the closing quote.
fn unquote_prefix(s: &str) -> Result<(String, &str), String> {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return Err("expected quoted string".to_string()),
    }

    let mut buf: Vec<u8> = Vec::new();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => {
                let value = String::from_utf8(buf)
                    .map_err(|_| "invalid UTF-8 in quoted string".to_string())?;
                return Ok((value, &s[idx + 1..]));
            }
            '\\' => {
                let (_, esc) = chars.next().ok_or("unterminated escape")?;
                match esc {
                    'a' => buf.push(0x07),
                    'b' => buf.push(0x08),
                    'f' => buf.push(0x0c),
                    'n' => buf.push(b'\n'),
                    'r' => buf.push(b'\r'),
                    't' => buf.push(b'\t'),
                    'v' => buf.push(0x0b),
                    '\\' | '"' | '\'' => buf.push(esc as u8),
                    'x' => buf.push(hex_value(&mut chars, 2)? as u8),
                    'u' | 'U' => {
                        let width = if esc == 'u' { 4 } else { 8 };
                        let code = hex_value(&mut chars, width)?;
                        let ch = char::from_u32(code)
                            .ok_or_else(|| format!("invalid code point \\{}{:x}", esc, code))?;
                        let mut tmp = [0u8; 4];
                        buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
                    }
                    '0'..='7' => {
                        let mut value = esc as u32 - '0' as u32;
                        for _ in 0..2 {
                            let (_, d) = chars.next().ok_or("unterminated escape")?;
                            let digit = d.to_digit(8).ok_or("invalid octal escape")?;
                            value = value * 8 + digit;
                        }
                        if value > 0xff {
                            return Err("octal escape out of range".to_string());
                        }
                        buf.push(value as u8);
                    }
                    other => return Err(format!("unknown escape \\{}", other)),
                }
            }
            '\n' => return Err("newline in quoted string".to_string()),
            _ => {
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
    Err("unterminated quoted string".to_string())
}

fn hex_value(chars: &mut std::str::CharIndices<'_>, width: usize) -> Result<u32, String> {
    let mut value = 0u32;
    for _ in 0..width {
        let (_, c) = chars.next().ok_or("unterminated escape")?;
        let digit = c.to_digit(16).ok_or("invalid hex escape")?;
        value = value * 16 + digit;
    }
    Ok(value)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
