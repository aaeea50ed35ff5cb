//! Signature registry for deprecated concurrency idioms
//!
//! A [`Signature`] couples a structural [`Matcher`] over `syn` nodes with a
//! replacement recommendation and a severity. The registry is loaded once at
//! startup ([`SignatureRegistry::builtin`]) and read-only afterwards;
//! duplicate ids fail fast at registration time. Matching is purely
//! structural - no execution, no type resolution - so every signature can be
//! tested against a synthetic tree fragment in isolation.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use syn::punctuated::Punctuated;
use syn::visit::Visit;
use syn::{Expr, ExprCall, ItemFn, Token};
use thiserror::Error;

/// How urgent a matched pattern is.
///
/// Serialized with the same kebab-case tokens [`Display`](fmt::Display)
/// renders, so machine and human outputs share one vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Still accepted; a modern replacement exists
    Deprecated,
    /// Scheduled for removal; migrate now
    RemovedSoon,
    /// Invalid construction, not merely outdated
    DesignError,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Deprecated => "deprecated",
            Severity::RemovedSoon => "removed-soon",
            Severity::DesignError => "design-error",
        };
        write!(f, "{label}")
    }
}

/// Errors from registry mutation
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("signature id '{0}' registered twice")]
    DuplicateId(String),
}

/// Cross-node context a matcher may need.
///
/// The scanner fills `coroutine_aliases` with every local name the legacy
/// `coroutine` attribute is imported under; single-node inspection is enough
/// for everything else.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    pub coroutine_aliases: HashSet<String>,
}

/// Structural predicate over a syntax-tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Call whose callee path ends with any of the given segment sequences
    PathCall { paths: Vec<Vec<String>> },
    /// Call to a wait-for-many primitive whose first argument is an array or
    /// `vec![..]` literal holding at least one element that is not a
    /// `spawn`/`spawn_task` call
    RawFutureList { primitives: Vec<String> },
    /// Call to a primitive with more arguments than its canonical arity,
    /// i.e. a removed explicit scheduler handle is still being passed
    ExtraSchedulerArg { arities: Vec<(String, usize)> },
    /// Non-async fn that carries the legacy `#[coroutine]` attribute (under
    /// any local alias) or whose body delegates via `yield_from!`
    LegacyCoroutineFn,
}

impl Matcher {
    /// Does this matcher accept the given call expression?
    pub fn matches_call(&self, call: &ExprCall) -> bool {
        match self {
            Matcher::PathCall { paths } => paths.iter().any(|p| call_path_ends_with(call, p)),
            Matcher::RawFutureList { primitives } => {
                primitives.iter().any(|p| is_raw_future_list(call, p))
            }
            Matcher::ExtraSchedulerArg { arities } => arities
                .iter()
                .any(|(name, arity)| callee_is(call, name) && call.args.len() > *arity),
            Matcher::LegacyCoroutineFn => false,
        }
    }

    /// Does this matcher accept the given function definition?
    pub fn matches_fn(&self, item: &ItemFn, cx: &ScanContext) -> bool {
        match self {
            Matcher::LegacyCoroutineFn => is_legacy_coroutine(item, cx),
            _ => false,
        }
    }
}

/// Classification of a function definition, computed once per node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// `async fn` - the modern form
    NativeAsync,
    /// Plain fn whose body delegates through `yield_from!`
    GeneratorDelegated,
    /// Ordinary synchronous fn
    Plain,
}

impl FnKind {
    pub fn classify(item: &ItemFn) -> FnKind {
        if item.sig.asyncness.is_some() {
            return FnKind::NativeAsync;
        }
        if body_delegates_via_yield_from(item) {
            FnKind::GeneratorDelegated
        } else {
            FnKind::Plain
        }
    }
}

fn body_delegates_via_yield_from(item: &ItemFn) -> bool {
    struct MacroFinder {
        found: bool,
    }

    impl<'ast> Visit<'ast> for MacroFinder {
        fn visit_macro(&mut self, mac: &'ast syn::Macro) {
            if let Some(last) = mac.path.segments.last() {
                if last.ident == "yield_from" {
                    self.found = true;
                }
            }
            syn::visit::visit_macro(self, mac);
        }
    }

    let mut finder = MacroFinder { found: false };
    finder.visit_block(&item.block);
    finder.found
}

fn is_legacy_coroutine(item: &ItemFn, cx: &ScanContext) -> bool {
    if item.sig.asyncness.is_some() {
        return false;
    }
    has_legacy_coroutine_attr(item, cx)
        || FnKind::classify(item) == FnKind::GeneratorDelegated
}

fn has_legacy_coroutine_attr(item: &ItemFn, cx: &ScanContext) -> bool {
    item.attrs.iter().any(|attr| {
        let segments: Vec<String> = attr
            .path()
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect();
        match segments.as_slice() {
            [single] => cx.coroutine_aliases.contains(single),
            rest => rest.ends_with(&["legacy".to_string(), "coroutine".to_string()]),
        }
    })
}

fn call_path(call: &ExprCall) -> Option<Vec<String>> {
    if let Expr::Path(path) = &*call.func {
        Some(
            path.path
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect(),
        )
    } else {
        None
    }
}

fn call_path_ends_with(call: &ExprCall, suffix: &[String]) -> bool {
    match call_path(call) {
        Some(path) => path.len() >= suffix.len() && path[path.len() - suffix.len()..] == *suffix,
        None => false,
    }
}

fn callee_is(call: &ExprCall, name: &str) -> bool {
    call_path(call).is_some_and(|path| path.last().is_some_and(|last| last == name))
}

fn is_raw_future_list(call: &ExprCall, primitive: &str) -> bool {
    if !callee_is(call, primitive) {
        return false;
    }
    let Some(first) = call.args.first() else {
        return false;
    };
    let elements: Vec<Expr> = match first {
        Expr::Array(array) => array.elems.iter().cloned().collect(),
        Expr::Macro(mac) if mac.mac.path.is_ident("vec") => {
            match mac
                .mac
                .parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
            {
                Ok(parsed) => parsed.into_iter().collect(),
                Err(_) => return false,
            }
        }
        _ => return false,
    };
    !elements.is_empty() && elements.iter().any(|e| !is_task_handle(e))
}

/// A `spawn(..)` / `spawn_task(..)` call yields a stable task handle; anything
/// else passed to a wait primitive gets silently re-wrapped into a handle the
/// caller does not hold.
fn is_task_handle(expr: &Expr) -> bool {
    match expr {
        Expr::Call(call) => callee_is(call, "spawn") || callee_is(call, "spawn_task"),
        _ => false,
    }
}

/// A registered deprecated-pattern description
#[derive(Debug, Clone)]
pub struct Signature {
    /// Unique id, stable across runs
    pub id: String,
    pub matcher: Matcher,
    /// Human-readable replacement recommendation
    pub recommendation: String,
    pub severity: Severity,
}

/// Immutable catalog of signatures, unique by id
#[derive(Debug, Clone, Default)]
pub struct SignatureRegistry {
    signatures: Vec<Signature>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature; a duplicate id is a fatal conflict.
    pub fn register(&mut self, signature: Signature) -> Result<(), RegistryError> {
        if self.signatures.iter().any(|s| s.id == signature.id) {
            return Err(RegistryError::DuplicateId(signature.id));
        }
        self.signatures.push(signature);
        Ok(())
    }

    /// All signatures in registration order (the deterministic match order)
    pub fn all(&self) -> &[Signature] {
        &self.signatures
    }

    /// Signatures matching a call expression
    pub fn find_call_matches(&self, call: &ExprCall) -> Vec<&Signature> {
        self.signatures
            .iter()
            .filter(|s| s.matcher.matches_call(call))
            .collect()
    }

    /// Signatures matching a function definition
    pub fn find_fn_matches(&self, item: &ItemFn, cx: &ScanContext) -> Vec<&Signature> {
        self.signatures
            .iter()
            .filter(|s| s.matcher.matches_fn(item, cx))
            .collect()
    }

    /// The builtin catalog of deprecated concurrency idioms
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let catalog = [
            Signature {
                id: "ensure-spawned".to_string(),
                matcher: Matcher::PathCall {
                    paths: vec![path(&["ensure_spawned"])],
                },
                recommendation: "ensure_spawned() is superseded; call spawn_task() to get a task \
                                 handle directly"
                    .to_string(),
                severity: Severity::Deprecated,
            },
            Signature {
                id: "raw-future-wait".to_string(),
                matcher: Matcher::RawFutureList {
                    primitives: vec!["wait_all".to_string(), "wait_any".to_string()],
                },
                recommendation: "wrap each future in spawn_task() before waiting; raw futures are \
                                 silently re-wrapped into handles the caller does not hold, which \
                                 breaks identity-based result matching"
                    .to_string(),
                severity: Severity::Deprecated,
            },
            Signature {
                id: "task-current-task".to_string(),
                matcher: Matcher::PathCall {
                    paths: vec![path(&["Task", "current_task"])],
                },
                recommendation: "Task::current_task() is superseded by the module-level \
                                 current_task()"
                    .to_string(),
                severity: Severity::Deprecated,
            },
            Signature {
                id: "task-all-tasks".to_string(),
                matcher: Matcher::PathCall {
                    paths: vec![path(&["Task", "all_tasks"])],
                },
                recommendation: "Task::all_tasks() is superseded by the module-level all_tasks()"
                    .to_string(),
                severity: Severity::Deprecated,
            },
            Signature {
                id: "legacy-coroutine".to_string(),
                matcher: Matcher::LegacyCoroutineFn,
                recommendation: "rewrite as a native async fn; generator-delegated coroutines \
                                 cannot be mixed with async definitions"
                    .to_string(),
                severity: Severity::DesignError,
            },
            Signature {
                id: "explicit-scheduler-arg".to_string(),
                matcher: Matcher::ExtraSchedulerArg {
                    arities: vec![
                        ("sleep".to_string(), 1),
                        ("wait_all".to_string(), 1),
                        ("wait_any".to_string(), 1),
                        ("wait_for".to_string(), 2),
                    ],
                },
                recommendation: "the scheduler parameter was removed; the primitive derives the \
                                 running scheduler implicitly"
                    .to_string(),
                severity: Severity::RemovedSoon,
            },
            Signature {
                id: "origin-tracking-toggle".to_string(),
                matcher: Matcher::PathCall {
                    paths: vec![
                        path(&["set_origin_tracking"]),
                        path(&["get_origin_tracking"]),
                    ],
                },
                recommendation: "the boolean origin-tracking toggle is superseded by the \
                                 depth-based set_capture_depth()"
                    .to_string(),
                severity: Severity::RemovedSoon,
            },
        ];
        for signature in catalog {
            // Ids in the builtin table are unique by construction.
            let id = signature.id.clone();
            if registry.register(signature).is_err() {
                unreachable!("builtin catalog contains duplicate id {id}");
            }
        }
        registry
    }
}

fn path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}
