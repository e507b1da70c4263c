//! Line-level upsert of configuration files.
//!
//! Given a match pattern and a replacement line, the first line matching the
//! pattern is replaced in place and any later matching lines are dropped; when
//! nothing matches, the replacement is appended at end-of-file. An upsert can
//! be confined to one `[Section]` of an INI-style file such as a systemd
//! drop-in, in which case only that section is searched and extended.
//!
//! # Invariants
//!
//! - The replacement line must itself match the pattern. This is what makes the
//!   edit convergent: after one application the file contains exactly one
//!   matching line, and a second application finds that line already in place.
//! - Content is only reported as changed when the resulting text differs.
//! - A missing trailing newline is preserved unless a line had to be appended.
//! - Line endings are preserved: CRLF files stay CRLF.
//!
//! Pure logic: no I/O. The `FileEditor` capability does the reading and writing.

use std::fmt;

use regex::Regex;

use crate::error::{ProvisionError, Result};

// ============================================================================
// Line Pattern
// ============================================================================

/// A compiled, line-anchored match pattern.
#[derive(Clone)]
pub struct LinePattern {
    regex: Regex,
}

impl LinePattern {
    /// Compile a user-supplied pattern (regex syntax).
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            ProvisionError::validation(format!("invalid line pattern '{}': {}", pattern, e))
        })?;
        Ok(Self { regex })
    }

    /// Pattern for a `key = value` setting that tolerates a commented-out default.
    ///
    /// Matches `work_mem = 4MB`, `#work_mem = 4MB` and `# work_mem=4MB` but not
    /// `work_mem_limit = 1` or `#   - work_mem is ...` prose comments.
    pub fn for_setting(key: &str) -> Result<Self> {
        Self::new(&format!(r"^#?\s*{}\s*=", regex::escape(key)))
    }

    /// Returns true if the line matches.
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// The pattern source text.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl fmt::Debug for LinePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinePattern({:?})", self.regex.as_str())
    }
}

impl fmt::Display for LinePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.regex.as_str())
    }
}

impl PartialEq for LinePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for LinePattern {}

// ============================================================================
// Line Upsert
// ============================================================================

/// What an upsert did to the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    /// The line was already present exactly once; nothing to do.
    Unchanged,
    /// A matching line was replaced. `line_number` is 1-based; `removed` counts
    /// further matching lines that were dropped.
    Replaced { line_number: usize, removed: usize },
    /// No line matched; the replacement was placed at the end of its section.
    Inserted { line_number: usize },
    /// No line matched; the replacement (and its section header, if that was
    /// missing too) was appended.
    Appended,
}

/// Result of applying an upsert to some file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub content: String,
    pub action: UpsertAction,
}

impl UpsertOutcome {
    /// Returns true if the content differs from the input.
    pub fn changed(&self) -> bool {
        self.action != UpsertAction::Unchanged
    }
}

/// A validated pattern/line pair, optionally confined to one INI section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineUpsert {
    pattern: LinePattern,
    line: String,
    section: Option<String>,
}

impl LineUpsert {
    /// Pair a pattern with its replacement line.
    ///
    /// # Errors
    ///
    /// - The line contains a newline
    /// - The line does not match the pattern (the edit could never converge)
    pub fn new(pattern: LinePattern, line: impl Into<String>) -> Result<Self> {
        let line = line.into();
        if line.contains('\n') || line.contains('\r') {
            return Err(ProvisionError::validation(format!(
                "replacement line must be a single line: {:?}",
                line
            )));
        }
        if !pattern.is_match(&line) {
            return Err(ProvisionError::validation(format!(
                "replacement line '{}' does not match pattern '{}'",
                line, pattern
            )));
        }
        Ok(Self {
            pattern,
            line,
            section: None,
        })
    }

    /// Upsert for a `key = value` setting.
    pub fn setting(key: &str, value: &str) -> Result<Self> {
        Self::new(LinePattern::for_setting(key)?, format!("{} = {}", key, value))
    }

    /// Confine the upsert to the section opened by `header` (e.g. `[Service]`).
    ///
    /// Only lines between that header and the next one are matched. Without a
    /// match the line goes after the last non-blank line of the section, and a
    /// missing section is appended together with the line.
    pub fn in_section(mut self, header: impl Into<String>) -> Result<Self> {
        let header = header.into();
        if !(header.starts_with('[') && header.ends_with(']')) || header.contains('\n') {
            return Err(ProvisionError::validation(format!(
                "section header must look like [Name]: {:?}",
                header
            )));
        }
        self.section = Some(header);
        Ok(self)
    }

    pub fn pattern(&self) -> &LinePattern {
        &self.pattern
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    /// Apply the upsert to `content`.
    ///
    /// Each kept or replaced line keeps its own terminator. New lines use
    /// `\r\n` if the content has any, `\n` otherwise.
    pub fn apply(&self, content: &str) -> UpsertOutcome {
        let eol = if content.contains("\r\n") { "\r\n" } else { "\n" };
        let lines = split_lines(content);

        let mut out: Vec<(&str, &str)> = Vec::with_capacity(lines.len() + 2);
        let mut replaced_at: Option<usize> = None;
        let mut removed = 0;
        let mut in_scope = self.section.is_none();

        for (text, end) in lines {
            if let Some(header) = self.section.as_deref() {
                if is_section_header(text) {
                    in_scope = text.trim() == header;
                    out.push((text, end));
                    continue;
                }
            }
            if in_scope && self.pattern.is_match(text) {
                if replaced_at.is_none() {
                    replaced_at = Some(out.len());
                    out.push((self.line.as_str(), end));
                } else {
                    removed += 1;
                }
            } else {
                out.push((text, end));
            }
        }

        // A dropped duplicate may have been the unterminated last line
        if !content.is_empty() && !content.ends_with('\n') {
            if let Some(last) = out.last_mut() {
                last.1 = "";
            }
        }

        let action = match replaced_at {
            Some(index) => UpsertAction::Replaced {
                line_number: index + 1,
                removed,
            },
            None => {
                let insert_at = match self.section.as_deref() {
                    None => Some(out.len()),
                    Some(header) => section_end(&out, header),
                };
                match insert_at {
                    Some(index) if index < out.len() => {
                        out.insert(index, (self.line.as_str(), eol));
                        UpsertAction::Inserted {
                            line_number: index + 1,
                        }
                    }
                    _ => {
                        if let Some(last) = out.last_mut().filter(|l| l.1.is_empty()) {
                            last.1 = eol;
                        }
                        if let (None, Some(header)) = (insert_at, self.section.as_deref()) {
                            out.push((header, eol));
                        }
                        out.push((self.line.as_str(), eol));
                        UpsertAction::Appended
                    }
                }
            }
        };

        let result: String = out.iter().flat_map(|(text, end)| [*text, *end]).collect();
        let action = if result == content {
            UpsertAction::Unchanged
        } else {
            action
        };

        UpsertOutcome {
            content: result,
            action,
        }
    }
}

/// Split into `(text, terminator)` pairs; the terminator is `\r\n`, `\n`, or
/// empty for an unterminated last line.
fn split_lines(content: &str) -> Vec<(&str, &str)> {
    let mut lines = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        match rest.find('\n') {
            Some(i) => {
                let (line, tail) = rest.split_at(i + 1);
                let split = if line.ends_with("\r\n") { i - 1 } else { i };
                lines.push(line.split_at(split));
                rest = tail;
            }
            None => {
                lines.push((rest, ""));
                rest = "";
            }
        }
    }
    lines
}

fn is_section_header(text: &str) -> bool {
    text.trim_start().starts_with('[')
}

/// Index just past the last non-blank line of the first `header` section,
/// or `None` if the section does not exist.
fn section_end(lines: &[(&str, &str)], header: &str) -> Option<usize> {
    let start = lines
        .iter()
        .position(|(text, _)| is_section_header(text) && text.trim() == header)?;
    let mut last = start;
    for (offset, (text, _)) in lines[start + 1..].iter().enumerate() {
        if is_section_header(text) {
            break;
        }
        if !text.trim().is_empty() {
            last = start + 1 + offset;
        }
    }
    Some(last + 1)
}

impl fmt::Display for LineUpsert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(section) = &self.section {
            write!(f, "{} ", section)?;
        }
        write!(f, "/{}/ -> {}", self.pattern, self.line)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn work_mem() -> LineUpsert {
        LineUpsert::new(LinePattern::new("^#?work_mem").unwrap(), "work_mem = 6990kB").unwrap()
    }

    #[test]
    fn test_replaces_commented_default() {
        let input = "#shared_buffers = 128MB\n#work_mem = 4MB\t\t\t\t# min 64kB\n";
        let outcome = work_mem().apply(input);

        assert_eq!(
            outcome.content,
            "#shared_buffers = 128MB\nwork_mem = 6990kB\n"
        );
        assert_eq!(
            outcome.action,
            UpsertAction::Replaced {
                line_number: 2,
                removed: 0
            }
        );
        let matching: Vec<&str> = outcome
            .content
            .lines()
            .filter(|l| l.contains("work_mem"))
            .collect();
        assert_eq!(matching, vec!["work_mem = 6990kB"]);
    }

    #[test]
    fn test_replaces_already_set_value() {
        let outcome = work_mem().apply("work_mem = 64MB\n");
        assert_eq!(outcome.content, "work_mem = 6990kB\n");
        assert!(outcome.changed());
    }

    #[test]
    fn test_appends_when_absent() {
        let input = "max_connections = 100\n";
        let outcome = work_mem().apply(input);
        assert_eq!(outcome.content, "max_connections = 100\nwork_mem = 6990kB\n");
        assert_eq!(outcome.action, UpsertAction::Appended);
        assert_eq!(outcome.content.lines().count(), input.lines().count() + 1);
    }

    #[test]
    fn test_appends_after_missing_trailing_newline() {
        let outcome = work_mem().apply("max_connections = 100");
        assert_eq!(outcome.content, "max_connections = 100\nwork_mem = 6990kB\n");
    }

    #[test]
    fn test_empty_file() {
        let outcome = work_mem().apply("");
        assert_eq!(outcome.content, "work_mem = 6990kB\n");
        assert_eq!(outcome.action, UpsertAction::Appended);
    }

    #[test]
    fn test_second_application_is_noop() {
        let first = work_mem().apply("#work_mem = 4MB\n");
        let second = work_mem().apply(&first.content);
        assert_eq!(second.action, UpsertAction::Unchanged);
        assert_eq!(second.content, first.content);
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let input = "#work_mem = 4MB\nfoo = 1\nwork_mem = 8MB\n";
        let outcome = work_mem().apply(input);
        assert_eq!(outcome.content, "work_mem = 6990kB\nfoo = 1\n");
        assert_eq!(
            outcome.action,
            UpsertAction::Replaced {
                line_number: 1,
                removed: 1
            }
        );
    }

    #[test]
    fn test_preserves_missing_trailing_newline_on_replace() {
        let outcome = work_mem().apply("a = 1\nwork_mem = 6990kB");
        assert_eq!(outcome.action, UpsertAction::Unchanged);
        assert_eq!(outcome.content, "a = 1\nwork_mem = 6990kB");
    }

    #[test]
    fn test_setting_pattern_is_precise() {
        let pattern = LinePattern::for_setting("work_mem").unwrap();
        assert!(pattern.is_match("work_mem = 4MB"));
        assert!(pattern.is_match("#work_mem = 4MB"));
        assert!(pattern.is_match("# work_mem=4MB"));
        assert!(!pattern.is_match("maintenance_work_mem = 64MB"));
        assert!(!pattern.is_match("work_mem_limit = 1"));
    }

    #[test]
    fn test_setting_pattern_escapes_key() {
        let pattern = LinePattern::for_setting("a.b").unwrap();
        assert!(pattern.is_match("a.b = 1"));
        assert!(!pattern.is_match("axb = 1"));
    }

    #[test]
    fn test_setting_constructor() {
        let upsert = LineUpsert::setting("listen_addresses", "'*'").unwrap();
        assert_eq!(upsert.line(), "listen_addresses = '*'");
        let outcome = upsert.apply("#listen_addresses = 'localhost'\t# what IP address(es) to listen on;\n");
        assert_eq!(outcome.content, "listen_addresses = '*'\n");
    }

    #[test]
    fn test_line_must_match_pattern() {
        let err = LineUpsert::new(LinePattern::new("^port").unwrap(), "listen = 1").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn test_line_must_be_single_line() {
        let err = LineUpsert::new(LinePattern::new("^a").unwrap(), "a = 1\nb = 2").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(LinePattern::new("^(unclosed").is_err());
    }

    // ------------------------------------------------------------------------
    // Line endings
    // ------------------------------------------------------------------------

    #[test]
    fn test_crlf_replacement_keeps_terminator() {
        let outcome = work_mem().apply("a = 1\r\n#work_mem = 4MB\r\n");
        assert_eq!(outcome.content, "a = 1\r\nwork_mem = 6990kB\r\n");
        assert!(!outcome.content.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_crlf_append_after_unterminated_line() {
        let outcome = work_mem().apply("a = 1\r\nb = 2");
        assert_eq!(outcome.content, "a = 1\r\nb = 2\r\nwork_mem = 6990kB\r\n");
        assert_eq!(outcome.action, UpsertAction::Appended);
        assert_eq!(work_mem().apply(&outcome.content).action, UpsertAction::Unchanged);
    }

    #[test]
    fn test_crlf_unterminated_match_stays_unterminated() {
        let outcome = work_mem().apply("a = 1\r\nwork_mem = 4MB");
        assert_eq!(outcome.content, "a = 1\r\nwork_mem = 6990kB");
    }

    // ------------------------------------------------------------------------
    // Sections
    // ------------------------------------------------------------------------

    fn pgdata() -> LineUpsert {
        LineUpsert::new(
            LinePattern::new(r"^#?\s*Environment=PGDATA=").unwrap(),
            "Environment=PGDATA=/srv/pgdata",
        )
        .and_then(|u| u.in_section("[Service]"))
        .unwrap()
    }

    #[test]
    fn test_section_created_in_empty_file() {
        let outcome = pgdata().apply("");
        assert_eq!(outcome.content, "[Service]\nEnvironment=PGDATA=/srv/pgdata\n");
        assert_eq!(outcome.action, UpsertAction::Appended);
    }

    #[test]
    fn test_section_insert_before_next_section() {
        let input = "[Service]\nNice=5\n\n[Install]\nWantedBy=multi-user.target\n";
        let outcome = pgdata().apply(input);
        assert_eq!(
            outcome.content,
            "[Service]\nNice=5\nEnvironment=PGDATA=/srv/pgdata\n\n[Install]\nWantedBy=multi-user.target\n"
        );
        assert_eq!(outcome.action, UpsertAction::Inserted { line_number: 3 });
        assert_eq!(pgdata().apply(&outcome.content).action, UpsertAction::Unchanged);
    }

    #[test]
    fn test_section_appended_when_missing() {
        let input = "[Unit]\nDescription=PostgreSQL\n";
        let outcome = pgdata().apply(input);
        assert_eq!(
            outcome.content,
            "[Unit]\nDescription=PostgreSQL\n[Service]\nEnvironment=PGDATA=/srv/pgdata\n"
        );
    }

    #[test]
    fn test_section_ignores_matches_elsewhere() {
        let input = "[Unit]\nEnvironment=PGDATA=/old\n[Service]\nEnvironment=PGDATA=/old\nEnvironment=PGDATA=/dup\n";
        let outcome = pgdata().apply(input);
        assert_eq!(
            outcome.content,
            "[Unit]\nEnvironment=PGDATA=/old\n[Service]\nEnvironment=PGDATA=/srv/pgdata\n"
        );
        assert_eq!(
            outcome.action,
            UpsertAction::Replaced {
                line_number: 4,
                removed: 1
            }
        );
    }

    #[test]
    fn test_section_header_validated() {
        assert!(work_mem().in_section("Service").is_err());
        assert!(work_mem().in_section("[Service]\n[Unit]").is_err());
    }
}
