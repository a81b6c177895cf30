use super::{Document, Section};
use crate::error::{InsistError, Result};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Directive that pulls another document into the including one.
pub const INCLUDE_DIRECTIVE: &str = "#include";

/// Maximum include nesting before the chain is treated as runaway.
const MAX_INCLUDE_DEPTH: usize = 32;

fn include_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#include\s+(\S(?:.*\S)?)\s*$").expect("valid include regex"))
}

/// The raw `#include` targets of a document text, in order of appearance.
/// Paths are returned as written (relative to the including file).
pub fn include_targets(text: &str) -> Vec<String> {
    include_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Parse INI text. Blank lines and lines starting with `#` or `;` are
/// ignored; indented lines continue the previous value.
pub fn parse(text: &str) -> Result<Document> {
    let mut doc = Document::new();
    let mut current: Option<Section> = None;
    let mut last_key: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();

        if trimmed.is_empty() {
            last_key = None;
            continue;
        }
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if indented {
            if let (Some(section), Some(key)) = (current.as_mut(), last_key.as_ref()) {
                let value = match section.get(key) {
                    Some(prev) => format!("{prev}\n{trimmed}"),
                    None => trimmed.to_string(),
                };
                section.set(key.clone(), value);
                continue;
            }
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            if let Some(done) = current.take() {
                doc.insert_section(done);
            }
            let name = trimmed[1..trimmed.len() - 1].trim();
            current = Some(Section::new(name));
            last_key = None;
            continue;
        }

        let section = current.as_mut().ok_or_else(|| InsistError::Syntax {
            line: line_no,
            message: format!("key before any section header: {trimmed:?}"),
        })?;

        let split = trimmed
            .find(|c: char| c == '=' || c == ':')
            .ok_or_else(|| InsistError::Syntax {
                line: line_no,
                message: format!("expected 'key = value', found {trimmed:?}"),
            })?;
        let key = trimmed[..split].trim();
        if key.is_empty() {
            return Err(InsistError::Syntax {
                line: line_no,
                message: "empty key".into(),
            });
        }
        let value = trimmed[split + 1..].trim();
        section.set(key, value);
        last_key = Some(key.to_string());
    }

    if let Some(done) = current.take() {
        doc.insert_section(done);
    }
    Ok(doc)
}

/// Render a document in classic INI layout: `[name]`, `key = value` lines
/// (multiline values continue on tab-indented lines), then a blank line.
pub fn write(doc: &Document, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(header) = doc.header() {
        f.write_str(header)?;
        if !header.ends_with('\n') {
            f.write_str("\n")?;
        }
    }
    for section in doc.sections() {
        writeln!(f, "[{}]", section.name())?;
        for (key, value) in section.iter() {
            writeln!(f, "{} = {}", key, value.replace('\n', "\n\t"))?;
        }
        f.write_str("\n")?;
    }
    Ok(())
}

/// Read `path` and splice the text of every included file in place of its
/// `#include` line, recursively.
pub(crate) fn expand_includes(path: &Path) -> Result<String> {
    let mut chain = Vec::new();
    expand(path, &mut chain)
}

fn expand(path: &Path, chain: &mut Vec<PathBuf>) -> Result<String> {
    let text = std::fs::read_to_string(path)?;
    if !text.contains(INCLUDE_DIRECTIVE) {
        return Ok(text);
    }

    let canonical = std::fs::canonicalize(path)?;
    if chain.contains(&canonical) {
        return Err(InsistError::ConfigurationLoad {
            path: path.to_path_buf(),
            reason: "include cycle".into(),
        });
    }
    if chain.len() >= MAX_INCLUDE_DEPTH {
        return Err(InsistError::ConfigurationLoad {
            path: path.to_path_buf(),
            reason: format!("includes nested deeper than {MAX_INCLUDE_DEPTH}"),
        });
    }
    chain.push(canonical);

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        match include_regex().captures(line) {
            Some(caps) => {
                let target = base.join(&caps[1]);
                if !target.is_file() {
                    return Err(InsistError::ConfigurationLoad {
                        path: target,
                        reason: format!("included from {} but missing", path.display()),
                    });
                }
                let included = expand(&target, chain)?;
                out.push_str(&included);
                if !included.ends_with('\n') {
                    out.push('\n');
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    chain.pop();
    Ok(out)
}
