//! Filesystem corpus provider.
//!
//! Walks a project directory, renders an indented tree listing, and
//! concatenates every readable text file under `--- rel/path ---` headers.
//! File contents are never parsed.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::tokens::{estimate_tokens, truncate_to_tokens, CHARS_PER_TOKEN};

/// Directory names never descended into.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    ".pytest_cache",
    "venv",
    ".venv",
    "env",
    ".env",
    "dist",
    "build",
    ".next",
    ".nuxt",
    ".idea",
    ".vscode",
    "coverage",
    ".nyc_output",
    "target",
];

#[rustfmt::skip]
const TEXT_EXTENSIONS: &[&str] = &[
    // Python
    "py", "pyw",
    // JavaScript / TypeScript
    "js", "jsx", "ts", "tsx", "mjs", "cjs",
    // Web
    "html", "htm", "css", "scss", "sass", "less", "vue", "svelte",
    // Config / data
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "example", "sample",
    // Docs
    "md", "rst", "txt",
    // Shell
    "sh", "bash", "zsh", "fish",
    // JVM
    "java", "kt", "scala", "groovy",
    // C family
    "c", "cpp", "cc", "cxx", "h", "hpp",
    // Others
    "go", "rs", "rb", "php", "swift", "dart", "sql", "xml", "xsl", "xslt", "r", "m", "lua",
    "pl", "pm", "dockerfile", "makefile",
];

const BARE_NAMES: &[&str] = &["dockerfile", "makefile", "gemfile", "rakefile", "procfile"];

const DOTFILES: &[&str] = &[".gitignore", ".dockerignore", ".editorconfig"];

pub const EMPTY_CORPUS: &str = "[No readable code files found in the directory]";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad exclude pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
    #[error("scan task failed: {0}")]
    Task(String),
}

/// Everything the pipeline needs to know about one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeCorpus {
    /// Absolute project root.
    pub root_path: String,
    /// Indented directory listing, root on the first line.
    pub tree: String,
    /// All included files, each under a `--- rel/path ---` header.
    pub content: String,
    pub file_count: usize,
}

impl CodeCorpus {
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Produces a corpus for a local path.
pub trait CorpusProvider: Send + Sync {
    fn scan(&self, path: &Path) -> Result<CodeCorpus, ScanError>;
}

// =============================================================================
// Filesystem scanner
// =============================================================================

#[derive(Debug, Clone)]
pub struct FsScanner {
    config: ScanConfig,
    exclude: Vec<glob::Pattern>,
}

impl FsScanner {
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        let exclude = config
            .exclude
            .iter()
            .map(|pat| {
                glob::Pattern::new(pat).map_err(|e| ScanError::Pattern {
                    pattern: pat.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, exclude })
    }

    fn is_excluded(&self, rel: &str, name: &str) -> bool {
        self.exclude
            .iter()
            .any(|p| p.matches(rel) || p.matches(name))
    }

    fn keep_entry(&self, root: &Path, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() && IGNORED_DIRS.contains(&name.as_ref()) {
            return false;
        }
        let rel = relative(root, entry.path());
        !self.is_excluded(&rel, &name)
    }

    /// Concatenate all included text files under `root`.
    pub fn collect(&self, root: &Path) -> Result<(String, usize), ScanError> {
        let mut parts: Vec<String> = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| self.keep_entry(root, e));

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_text_file(entry.path()) {
                continue;
            }
            let rel = relative(root, entry.path());
            parts.push(self.render_file(entry.path(), &rel));
        }

        let count = parts.len();
        if parts.is_empty() {
            return Ok((EMPTY_CORPUS.to_string(), 0));
        }
        Ok((parts.join("\n"), count))
    }

    fn render_file(&self, path: &Path, rel: &str) -> String {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(err) => return format!("--- {rel} ---\n[Read error: {err}]\n"),
        };

        if size > self.config.max_file_bytes {
            tracing::info!(file = rel, bytes = size, "file over size threshold");
            return format!(
                "--- {rel} ---\n[File too large to include: {:.1} KB, threshold is {} KB]\n",
                size as f64 / 1024.0,
                self.config.max_file_bytes / 1024
            );
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(file = rel, error = %err, "cannot read file");
                return format!("--- {rel} ---\n[Read error: {err}]\n");
            }
        };
        let mut content = String::from_utf8_lossy(&bytes).into_owned();

        let limit = self.config.file_token_limit;
        let estimated = estimate_tokens(&content);
        if estimated > limit {
            let notice = format!(
                "[... TRUNCATED: file estimated at ~{estimated} tokens; showing first ~{limit} tokens ({} chars). Full file available on disk at {rel} ...]",
                limit * CHARS_PER_TOKEN
            );
            content = truncate_to_tokens(&content, limit, &notice);
            tracing::debug!(file = rel, estimated, limit, "truncated file");
        }

        format!("--- {rel} ---\n{content}\n")
    }

    /// Indented listing of `root`, ignored directories pruned.
    pub fn tree(&self, root: &Path) -> String {
        let mut out = root.display().to_string();
        self.tree_level(root, root, "", &mut out);
        out
    }

    fn tree_level(&self, root: &Path, dir: &Path, prefix: &str, out: &mut String) {
        let mut entries: Vec<(String, PathBuf, bool)> = match std::fs::read_dir(dir) {
            Ok(read) => read
                .filter_map(Result::ok)
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    let path = e.path();
                    let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    if is_dir && IGNORED_DIRS.contains(&name.as_str()) {
                        return None;
                    }
                    if self.is_excluded(&relative(root, &path), &name) {
                        return None;
                    }
                    Some((name, path, is_dir))
                })
                .collect(),
            Err(_) => {
                let _ = write!(out, "\n{prefix}└── [Permission Denied]");
                return;
            }
        };
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let last = entries.len().saturating_sub(1);
        for (i, (name, path, is_dir)) in entries.into_iter().enumerate() {
            let (connector, extension) = if i == last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            let _ = write!(out, "\n{prefix}{connector}{name}");
            if is_dir {
                self.tree_level(root, &path, &format!("{prefix}{extension}"), out);
            }
        }
    }
}

impl Default for FsScanner {
    fn default() -> Self {
        Self {
            config: ScanConfig::default(),
            exclude: Vec::new(),
        }
    }
}

impl CorpusProvider for FsScanner {
    fn scan(&self, path: &Path) -> Result<CodeCorpus, ScanError> {
        if !path.is_dir() {
            return Err(ScanError::NotADirectory(path.to_path_buf()));
        }
        let root = std::fs::canonicalize(path).map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(root = %root.display(), "scanning project");
        let tree = self.tree(&root);
        let (content, file_count) = self.collect(&root)?;
        let corpus = CodeCorpus {
            root_path: root.display().to_string(),
            tree,
            content,
            file_count,
        };
        tracing::info!(
            files = corpus.file_count,
            tokens = corpus.estimated_tokens(),
            "scan complete"
        );
        Ok(corpus)
    }
}

/// Whether a file should be read as text, judged by its name alone.
pub fn is_text_file(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    if BARE_NAMES.contains(&name.as_str()) || DOTFILES.contains(&name.as_str()) {
        return true;
    }
    match path.extension() {
        Some(ext) => TEXT_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str()),
        None => false,
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
