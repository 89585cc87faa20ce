//! Line-oriented loader for rule source files.
//!
//! A file holds the rule chain for one lifecycle kind. Lines starting with
//! `#` are comments, blank lines are skipped, a `group <name>` line begins a
//! new rule, and every other line is an operator handed to the active rule's
//! builder. Malformed input is reported, never silently skipped: one bad
//! rule aborts its whole file so the caller can keep the previous chain
//! authoritative.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::error;

use super::{LifecycleKind, MessageRule, MessageRuleBuilder};

// ---------------------------------------------------------------------------
// RuleParseError
// ---------------------------------------------------------------------------

/// Why loading one rule source failed.
#[derive(Debug, Error)]
pub enum RuleParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An operator line appeared before any `group` line.
    #[error("operator line outside any rule ({file}, line {line})")]
    OrphanOperator { file: String, line: usize },

    /// A rule's builder collected validation errors.
    #[error("invalid rule '{group}' ({file}, line {line}): {}", errors.join("; "))]
    InvalidRule {
        file: String,
        line: usize,
        group: String,
        errors: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// RuleSetReader
// ---------------------------------------------------------------------------

/// Parses rule source text into ordered [`MessageRule`] chains.
#[derive(Debug)]
pub struct RuleSetReader {
    keyword: String,
}

impl Default for RuleSetReader {
    fn default() -> Self {
        Self::new("group")
    }
}

impl RuleSetReader {
    /// Creates a reader whose rule-start keyword is `keyword`.
    #[must_use]
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }

    /// Loads one rule file for the given lifecycle kind.
    pub fn load_file(
        &self,
        kind: LifecycleKind,
        path: &Path,
    ) -> Result<Vec<MessageRule>, RuleParseError> {
        let contents = fs::read_to_string(path).map_err(|source| RuleParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_lines(kind, &path.display().to_string(), contents.lines())
    }

    /// Parses rule source lines; `source` labels them in error reports.
    pub fn load_lines<'a>(
        &self,
        kind: LifecycleKind,
        source: &str,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<MessageRule>, RuleParseError> {
        let mut rules = Vec::new();
        let mut active: Option<(usize, MessageRuleBuilder)> = None;

        for (index, raw) in lines.into_iter().enumerate() {
            let number = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(group) = line.strip_prefix(&format!("{} ", self.keyword)) {
                if let Some((started_at, builder)) = active.take() {
                    rules.push(finish(builder, source, started_at)?);
                }
                active = Some((number, MessageRuleBuilder::new(kind, group.trim())));
            } else if let Some((_, builder)) = active.as_mut() {
                let args: Vec<&str> = line.split_whitespace().collect();
                builder.parse_line(&args);
            } else {
                let err = RuleParseError::OrphanOperator {
                    file: source.to_string(),
                    line: number,
                };
                error!(%err, "aborting rule file");
                return Err(err);
            }
        }

        if let Some((started_at, builder)) = active.take() {
            rules.push(finish(builder, source, started_at)?);
        }

        Ok(rules)
    }
}

fn finish(
    builder: MessageRuleBuilder,
    source: &str,
    started_at: usize,
) -> Result<MessageRule, RuleParseError> {
    let group = builder.group().to_string();
    builder.finish().map_err(|errors| {
        let err = RuleParseError::InvalidRule {
            file: source.to_string(),
            line: started_at,
            group,
            errors,
        };
        error!(%err, "aborting rule file");
        err
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
