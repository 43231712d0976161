//! Memory loaders — turn external content into memory candidates.
//!
//! A [`MemoryLoader`] declares which paths it understands and yields
//! [`MemoryCandidate`]s for one of them. Loaders are registered at startup
//! and queried in registration order; the first `supports()` match wins.
//! Shipped loaders: markdown documents (one context memory per document,
//! one episode per section) and git history (one episode per commit).

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::memory::types::{MemoryKind, MemoryLevel};

/// A unit of loadable content, pending encoding and storage.
#[derive(Debug, Clone)]
pub struct MemoryCandidate {
    pub content: String,
    pub level: MemoryLevel,
    pub kind: MemoryKind,
    /// Extractor overrides supplied by the loader (merged over extraction).
    pub dimensions_hint: BTreeMap<String, f64>,
    /// Index of this candidate's parent within the same batch.
    pub parent: Option<usize>,
    /// Historical creation timestamp, when the source records one.
    pub created_at: Option<String>,
}

impl MemoryCandidate {
    fn episode(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            level: MemoryLevel::Episode,
            kind: MemoryKind::Episodic,
            dimensions_hint: BTreeMap::new(),
            parent: None,
            created_at: None,
        }
    }
}

/// Loader contract: `supports` probes a path, `load` yields candidates.
pub trait MemoryLoader: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, path: &Path) -> bool;
    fn load(&self, path: &Path) -> Result<Vec<MemoryCandidate>>;
}

/// Ordered loader registry; first match wins.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn MemoryLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Registry with the built-in loaders in their canonical order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MarkdownLoader));
        registry.register(Box::new(GitHistoryLoader::default()));
        registry
    }

    pub fn register(&mut self, loader: Box<dyn MemoryLoader>) {
        self.loaders.push(loader);
    }

    pub fn find(&self, path: &Path) -> Option<&dyn MemoryLoader> {
        self.loaders
            .iter()
            .find(|l| l.supports(path))
            .map(|l| l.as_ref())
    }
}

// ── Markdown ─────────────────────────────────────────────────────────────────

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#{1,6})\s+(.+)$").expect("valid heading regex"));

/// Splits a markdown document along ATX headings.
///
/// A document without headings becomes a single episode holding the whole
/// text. With headings, the document itself becomes one context memory (its
/// title) and every section an episode parented to it.
pub struct MarkdownLoader;

impl MemoryLoader for MarkdownLoader {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn supports(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("markdown")
        )
    }

    fn load(&self, path: &Path) -> Result<Vec<MemoryCandidate>> {
        let text = std::fs::read_to_string(path)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let headings: Vec<(usize, String)> = HEADING_RE
            .captures_iter(&text)
            .map(|c| {
                let at = c.get(0).expect("whole match").start();
                (at, c[2].trim().to_string())
            })
            .collect();

        if headings.is_empty() {
            return Ok(vec![MemoryCandidate::episode(trimmed)]);
        }

        let title = headings[0].1.clone();
        let mut candidates = vec![MemoryCandidate {
            content: title,
            level: MemoryLevel::Context,
            kind: MemoryKind::Semantic,
            dimensions_hint: BTreeMap::new(),
            parent: None,
            created_at: None,
        }];

        // Section bodies run from one heading to the next
        for (i, (start, heading)) in headings.iter().enumerate() {
            let body_start = text[*start..]
                .find('\n')
                .map(|n| start + n + 1)
                .unwrap_or(text.len());
            let body_end = headings
                .get(i + 1)
                .map(|(next, _)| *next)
                .unwrap_or(text.len());
            let body = text[body_start..body_end.max(body_start)].trim();

            let content = if body.is_empty() {
                heading.clone()
            } else {
                format!("{heading}\n{body}")
            };
            candidates.push(MemoryCandidate {
                parent: Some(0),
                ..MemoryCandidate::episode(content)
            });
        }

        Ok(candidates)
    }
}

// ── Git history ──────────────────────────────────────────────────────────────

/// Field and record separators for the stable `git log` pretty format.
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Mines commit messages from a repository working directory, newest first.
pub struct GitHistoryLoader {
    pub max_commits: usize,
}

impl Default for GitHistoryLoader {
    fn default() -> Self {
        Self { max_commits: 500 }
    }
}

impl MemoryLoader for GitHistoryLoader {
    fn name(&self) -> &'static str {
        "git-history"
    }

    fn supports(&self, path: &Path) -> bool {
        path.is_dir() && path.join(".git").exists()
    }

    fn load(&self, path: &Path) -> Result<Vec<MemoryCandidate>> {
        let output = Command::new("git")
            .arg("-C")
            .arg(path)
            .arg("log")
            .arg(format!("--max-count={}", self.max_commits))
            .arg(format!("--pretty=format:%H{FIELD_SEP}%aI{FIELD_SEP}%B{RECORD_SEP}"))
            .output()?;

        if !output.status.success() {
            return Err(Error::Validation(format!(
                "git log failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_git_log(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse the separator-delimited `git log` stream into candidates.
fn parse_git_log(raw: &str) -> Vec<MemoryCandidate> {
    raw.split(RECORD_SEP)
        .filter_map(|record| {
            let mut fields = record.trim_start_matches('\n').splitn(3, FIELD_SEP);
            let hash = fields.next()?.trim();
            let date = fields.next()?.trim();
            let message = fields.next()?.trim();
            if hash.is_empty() || message.is_empty() {
                return None;
            }
            Some(MemoryCandidate {
                created_at: Some(date.to_string()),
                ..MemoryCandidate::episode(message)
            })
        })
        .collect()
}
