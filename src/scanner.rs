//! Syntax scanning for deprecated concurrency idioms
//!
//! Parses Rust source with `syn`, collects local aliases of the legacy
//! `coroutine` attribute in a pre-pass, then walks the tree once in
//! deterministic depth-first source order, querying the signature registry at
//! every call expression and function definition. Each match yields one
//! [`Finding`] with the exact 1-based line/column of the construct and the
//! trimmed source line as snippet, so repeated scans of identical input are
//! byte-identical.
//!
//! A file that fails to parse produces a single [`ParseDiagnostic`] and never
//! aborts the rest of a batch.

use crate::registry::{ScanContext, Severity, Signature, SignatureRegistry};
use crate::report::Reporter;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{ExprCall, ItemFn, ItemUse, UseTree};
use thiserror::Error;

/// One match of a signature against a source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub signature_id: String,
    pub file_path: String,
    /// 1-based line of the matched construct
    pub line: usize,
    /// 1-based column of the matched construct
    pub column: usize,
    /// Trimmed source line containing the match
    pub snippet: String,
    pub severity: Severity,
    pub recommendation: String,
}

/// A file-level diagnostic distinct from pattern findings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseDiagnostic {
    pub file_path: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Scanner errors, isolated per file in batch mode
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{file_path}:{line}:{column}: parse error: {message}")]
    Parse {
        file_path: String,
        line: usize,
        column: usize,
        message: String,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    fn from_syn(err: &syn::Error, file_path: &str) -> Self {
        let start = err.span().start();
        ScanError::Parse {
            file_path: file_path.to_string(),
            line: start.line.max(1),
            column: start.column + 1,
            message: err.to_string(),
        }
    }

    /// Render this error as a reportable diagnostic
    pub fn to_diagnostic(&self) -> ParseDiagnostic {
        match self {
            ScanError::Parse {
                file_path,
                line,
                column,
                message,
            } => ParseDiagnostic {
                file_path: file_path.clone(),
                line: *line,
                column: *column,
                message: message.clone(),
            },
            ScanError::Io { path, source } => ParseDiagnostic {
                file_path: path.display().to_string(),
                line: 1,
                column: 1,
                message: format!("read failed: {source}"),
            },
        }
    }
}

/// Scan one source unit. Fails with [`ScanError::Parse`] on invalid syntax.
pub fn scan_source(
    source: &str,
    file_path: &str,
    registry: &SignatureRegistry,
) -> Result<Vec<Finding>, ScanError> {
    let file = syn::parse_file(source).map_err(|e| ScanError::from_syn(&e, file_path))?;
    let cx = ScanContext {
        coroutine_aliases: collect_coroutine_aliases(&file),
    };
    let lines: Vec<&str> = source.lines().collect();
    let mut visitor = FindingVisitor {
        registry,
        cx: &cx,
        file_path,
        lines: &lines,
        findings: Vec::new(),
    };
    visitor.visit_file(&file);
    Ok(visitor.findings)
}

/// Pre-pass: every local name the legacy `coroutine` attribute is imported
/// under, including renames, nested groups and a glob of the `legacy` module.
fn collect_coroutine_aliases(file: &syn::File) -> HashSet<String> {
    struct UseCollector {
        aliases: HashSet<String>,
    }

    impl<'ast> Visit<'ast> for UseCollector {
        fn visit_item_use(&mut self, item: &'ast ItemUse) {
            let mut prefix = Vec::new();
            walk_use_tree(&item.tree, &mut prefix, &mut self.aliases);
            visit::visit_item_use(self, item);
        }
    }

    let mut collector = UseCollector {
        aliases: HashSet::new(),
    };
    collector.visit_file(file);
    collector.aliases
}

fn walk_use_tree(tree: &UseTree, prefix: &mut Vec<String>, aliases: &mut HashSet<String>) {
    match tree {
        UseTree::Path(path) => {
            prefix.push(path.ident.to_string());
            walk_use_tree(&path.tree, prefix, aliases);
            prefix.pop();
        }
        UseTree::Name(name) => {
            if name.ident == "coroutine" && prefix.iter().any(|s| s == "legacy") {
                aliases.insert("coroutine".to_string());
            }
        }
        UseTree::Rename(rename) => {
            if rename.ident == "coroutine" && prefix.iter().any(|s| s == "legacy") {
                aliases.insert(rename.rename.to_string());
            }
        }
        UseTree::Glob(_) => {
            if prefix.last().is_some_and(|s| s == "legacy") {
                aliases.insert("coroutine".to_string());
            }
        }
        UseTree::Group(group) => {
            for item in &group.items {
                walk_use_tree(item, prefix, aliases);
            }
        }
    }
}

struct FindingVisitor<'a> {
    registry: &'a SignatureRegistry,
    cx: &'a ScanContext,
    file_path: &'a str,
    lines: &'a [&'a str],
    findings: Vec<Finding>,
}

impl FindingVisitor<'_> {
    fn push(&mut self, signature: &Signature, span: proc_macro2::Span) {
        let start = span.start();
        let line = start.line.max(1);
        let snippet = self
            .lines
            .get(line - 1)
            .map(|l| l.trim().to_string())
            .unwrap_or_default();
        self.findings.push(Finding {
            signature_id: signature.id.clone(),
            file_path: self.file_path.to_string(),
            line,
            column: start.column + 1,
            snippet,
            severity: signature.severity,
            recommendation: signature.recommendation.clone(),
        });
    }
}

impl<'ast> Visit<'ast> for FindingVisitor<'_> {
    fn visit_expr_call(&mut self, call: &'ast ExprCall) {
        for signature in self.registry.find_call_matches(call) {
            self.push(signature, call.span());
        }
        visit::visit_expr_call(self, call);
    }

    fn visit_item_fn(&mut self, item: &'ast ItemFn) {
        for signature in self.registry.find_fn_matches(item, self.cx) {
            self.push(signature, item.sig.ident.span());
        }
        visit::visit_item_fn(self, item);
    }
}

/// Recursively collect `.rs` files under `path`, sorted by name so batch
/// order is stable across runs.
fn collect_rust_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<(), ScanError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|e| ScanError::Io {
            path: path.to_path_buf(),
            source: e,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for entry in entries {
        if entry.is_dir() {
            collect_rust_files(&entry, out)?;
        } else if entry.extension().is_some_and(|ext| ext == "rs") {
            out.push(entry);
        }
    }
    Ok(())
}

/// Scan a batch of files and/or directories into the reporter.
///
/// Per-file failures (unreadable input, parse error) are recorded as
/// diagnostics and never stop the rest of the batch. Returns the number of
/// files scanned.
pub fn scan_files(paths: &[PathBuf], registry: &SignatureRegistry, reporter: &Reporter) -> usize {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            if let Err(err) = collect_rust_files(path, &mut files) {
                tracing::warn!(path = %path.display(), "skipping unreadable directory");
                reporter.record_parse_error(err.to_diagnostic());
            }
        } else {
            files.push(path.clone());
        }
    }

    let mut scanned = 0;
    for file in files {
        let display = file.display().to_string();
        let source = match fs::read_to_string(&file) {
            Ok(source) => source,
            Err(err) => {
                reporter.record_parse_error(
                    ScanError::Io {
                        path: file.clone(),
                        source: err,
                    }
                    .to_diagnostic(),
                );
                continue;
            }
        };
        scanned += 1;
        match scan_source(&source, &display, registry) {
            Ok(findings) => {
                for finding in findings {
                    reporter.record_finding(finding);
                }
            }
            Err(err) => reporter.record_parse_error(err.to_diagnostic()),
        }
    }
    scanned
}
