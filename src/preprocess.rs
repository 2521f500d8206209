//! Textual `include` expansion.
//!
//! Runs before the lexer: `include "path"` and `include_once "path"`
//! directives are replaced by the named file's (expanded) contents.
//! The output carries a line-map table so diagnostics and AST nodes
//! report positions in terms of the original files.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::error::{Result, error};
use crate::span::Span;

/// Preprocessed source: the combined text plus the tables needed to
/// map a byte offset back to an `(original file, original line)` pair.
#[derive(Debug)]
pub struct Source {
    text: String,
    /// `(combined_line_start, file, file_line_start)`, ordered by start.
    line_map: Vec<MapEntry>,
    /// Byte offset of each combined line start; computed lazily from `text`.
    line_offsets: Vec<u32>,
}

#[derive(Debug)]
struct MapEntry {
    combined_start: u32,
    file: Rc<str>,
    file_start: u32,
}

impl Source {
    /// Wrap raw text with an identity line map. Used for `-e` strings
    /// and the REPL, where no includes are expanded.
    pub fn from_str(name: &str, text: &str) -> Source {
        let mut src = Source {
            text: text.to_owned(),
            line_map: vec![MapEntry {
                combined_start: 1,
                file: name.into(),
                file_start: 1,
            }],
            line_offsets: Vec::new(),
        };
        src.index_lines();
        src
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// 1-based combined line containing `offset`.
    fn line_of(&self, offset: u32) -> u32 {
        match self.line_offsets.binary_search(&offset) {
            Ok(i) => i as u32 + 1,
            Err(i) => i as u32,
        }
    }

    /// Map a combined line to its original `(file, line)`.
    ///
    /// Picks the greatest entry whose start is <= the queried line,
    /// then offsets from that entry's file line.
    pub fn resolve_line(&self, combined_line: u32) -> (Rc<str>, u32) {
        let i = self
            .line_map
            .partition_point(|e| e.combined_start <= combined_line);
        // the first entry always starts at line 1
        let entry = &self.line_map[i.saturating_sub(1)];
        let line = entry.file_start + (combined_line - entry.combined_start);
        (Rc::clone(&entry.file), line)
    }

    /// Original `(file, line)` of a span's start.
    pub fn resolve(&self, span: Span) -> (Rc<str>, u32) {
        self.resolve_line(self.line_of(span.start))
    }

    fn index_lines(&mut self) {
        self.line_offsets.clear();
        self.line_offsets.push(0);
        for (i, b) in self.text.bytes().enumerate() {
            if b == b'\n' {
                self.line_offsets.push(i as u32 + 1);
            }
        }
    }
}

/// Read `path` and expand its include directives.
pub fn preprocess_file(path: &Path) -> Result<Source> {
    let mut pp = Preprocessor::default();
    let mut src = Source {
        text: String::new(),
        line_map: Vec::new(),
        line_offsets: Vec::new(),
    };
    pp.expand(path, &mut src)?;
    if src.line_map.is_empty() {
        src.line_map.push(MapEntry {
            combined_start: 1,
            file: path.to_string_lossy().as_ref().into(),
            file_start: 1,
        });
    }
    src.index_lines();
    Ok(src)
}

#[derive(Default)]
struct Preprocessor {
    stack: Vec<PathBuf>,
    once: FxHashSet<PathBuf>,
    combined_line: u32,
}

enum Directive<'a> {
    Include(&'a str),
    IncludeOnce(&'a str),
}

/// `include "path"` / `include_once "path"`, alone on a line.
fn parse_directive(line: &str) -> Result<Option<Directive<'_>>, &'static str> {
    let trimmed = line.trim();
    let (rest, once) = if let Some(rest) = trimmed.strip_prefix("include_once") {
        (rest, true)
    } else if let Some(rest) = trimmed.strip_prefix("include") {
        (rest, false)
    } else {
        return Ok(None);
    };

    // `include` may also be a plain identifier, e.g. `include(x)`
    if !rest.starts_with([' ', '\t', '"']) {
        return Ok(None);
    }

    let rest = rest.trim();
    let inner = rest
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or("malformed include directive, expected a quoted path")?;
    if inner.contains('"') {
        return Err("malformed include directive, expected a single quoted path");
    }

    if once {
        Ok(Some(Directive::IncludeOnce(inner)))
    } else {
        Ok(Some(Directive::Include(inner)))
    }
}

impl Preprocessor {
    fn expand(&mut self, path: &Path, out: &mut Source) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.stack.contains(&canonical) {
            return error(
                format!("include cycle through '{}'", path.display()),
                Span::empty(),
            )
            .into();
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            error(
                format!("cannot read '{}': {e}", path.display()),
                Span::empty(),
            )
        })?;

        self.stack.push(canonical);
        let file: Rc<str> = path.to_string_lossy().as_ref().into();
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let mut file_line = 1u32;
        let mut fresh_entry = true;
        for line in text.split_inclusive('\n') {
            let bare = line.strip_suffix('\n').unwrap_or(line);
            match parse_directive(bare)
                .map_err(|msg| error(format!("{}:{file_line}: {msg}", path.display()), Span::empty()))?
            {
                Some(directive) => {
                    let (target, once) = match directive {
                        Directive::Include(p) => (p, false),
                        Directive::IncludeOnce(p) => (p, true),
                    };
                    let target = dir.join(target);
                    let target_canonical = target
                        .canonicalize()
                        .unwrap_or_else(|_| target.to_path_buf());

                    if once && !self.once.insert(target_canonical) {
                        // already expanded somewhere, keep the line count
                        // stable by emitting an empty line instead
                        out.text.push('\n');
                        self.combined_line += 1;
                    } else {
                        self.expand(&target, out)?;
                        if !out.text.ends_with('\n') {
                            out.text.push('\n');
                            self.combined_line += 1;
                        }
                    }
                    fresh_entry = true;
                }
                None => {
                    if fresh_entry {
                        out.line_map.push(MapEntry {
                            combined_start: self.combined_line + 1,
                            file: Rc::clone(&file),
                            file_start: file_line,
                        });
                        fresh_entry = false;
                    }
                    out.text.push_str(line);
                    if line.ends_with('\n') {
                        self.combined_line += 1;
                    }
                }
            }
            file_line += 1;
        }
        if !out.text.ends_with('\n') && !out.text.is_empty() {
            out.text.push('\n');
            self.combined_line += 1;
        }

        self.stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map_resolves_lines() {
        let src = Source::from_str("main.tn", "a\nb\nc\n");
        let (file, line) = src.resolve(Span::from(2u32..3));
        assert_eq!(&*file, "main.tn");
        assert_eq!(line, 2);
    }

    #[test]
    fn directive_parsing() {
        assert!(matches!(
            parse_directive(r#"include "lib.tn""#),
            Ok(Some(Directive::Include("lib.tn")))
        ));
        assert!(matches!(
            parse_directive(r#"include_once "lib.tn""#),
            Ok(Some(Directive::IncludeOnce("lib.tn")))
        ));
        assert!(matches!(parse_directive("included = 1"), Ok(None)));
        assert!(matches!(parse_directive("include(x)"), Ok(None)));
        assert!(parse_directive(r#"include lib.tn"#).is_err());
    }

    #[test]
    fn include_expansion_maps_lines() {
        let dir = std::env::temp_dir().join("tarn-pp-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("lib.tn"), "var shared = 1\n").unwrap();
        std::fs::write(
            dir.join("main.tn"),
            "include \"lib.tn\"\nprintln(shared)\n",
        )
        .unwrap();

        let src = preprocess_file(&dir.join("main.tn")).unwrap();
        assert_eq!(src.text(), "var shared = 1\nprintln(shared)\n");

        let (file, line) = src.resolve_line(1);
        assert!(file.ends_with("lib.tn"));
        assert_eq!(line, 1);

        let (file, line) = src.resolve_line(2);
        assert!(file.ends_with("main.tn"));
        assert_eq!(line, 2);
    }

    #[test]
    fn include_cycle_is_rejected() {
        let dir = std::env::temp_dir().join("tarn-pp-cycle");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.tn"), "include \"b.tn\"\n").unwrap();
        std::fs::write(dir.join("b.tn"), "include \"a.tn\"\n").unwrap();

        let err = preprocess_file(&dir.join("a.tn")).unwrap_err();
        assert!(err.message().contains("include cycle"));
    }
}
