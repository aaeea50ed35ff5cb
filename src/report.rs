//! Unified diagnostic reporting
//!
//! The [`Reporter`] accumulates the two independent diagnostic streams - scan
//! findings and monitor threshold events - behind one mutex-guarded append
//! section, so scan workers and a monitor handler may record concurrently.
//! Order is guaranteed within each stream, not between them. [`Reporter::flush`]
//! drains the accumulator into an immutable [`Report`] with findings sorted by
//! (file, line, column) and events in arrival order, renderable as a human
//! table or machine-readable JSON.

use crate::monitor::{ThresholdEvent, ThresholdHandler, WarningSink};
use crate::registry::Severity;
use crate::scanner::{Finding, ParseDiagnostic};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ReportState {
    findings: Vec<Finding>,
    parse_errors: Vec<ParseDiagnostic>,
    events: Vec<ThresholdEvent>,
    handler_warnings: Vec<String>,
}

/// Thread-safe accumulator for findings and threshold events
#[derive(Debug, Default)]
pub struct Reporter {
    state: Mutex<ReportState>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_finding(&self, finding: Finding) {
        self.lock().findings.push(finding);
    }

    pub fn record_parse_error(&self, diagnostic: ParseDiagnostic) {
        self.lock().parse_errors.push(diagnostic);
    }

    pub fn record_event(&self, event: ThresholdEvent) {
        self.lock().events.push(event);
    }

    /// Secondary warning attached to the event stream, e.g. a handler that
    /// failed while reporting; never replaces the primary event.
    pub fn record_handler_warning(&self, warning: String) {
        self.lock().handler_warnings.push(warning);
    }

    /// A monitor handler that records every threshold event on this reporter.
    pub fn threshold_handler(self: &Arc<Self>) -> ThresholdHandler {
        let reporter = Arc::clone(self);
        Arc::new(move |event: &ThresholdEvent| reporter.record_event(event.clone()))
    }

    /// A warning sink for [`crate::monitor::Monitor::with_warning_sink`] that
    /// lands handler failures in this reporter's warning stream.
    pub fn warning_sink(self: &Arc<Self>) -> WarningSink {
        let reporter = Arc::clone(self);
        Arc::new(move |warning: &str| reporter.record_handler_warning(warning.to_string()))
    }

    /// Drain everything recorded so far into an ordered report.
    pub fn flush(&self) -> Report {
        let mut state = self.lock();
        let mut findings = std::mem::take(&mut state.findings);
        let mut parse_errors = std::mem::take(&mut state.parse_errors);
        let events = std::mem::take(&mut state.events);
        let handler_warnings = std::mem::take(&mut state.handler_warnings);
        drop(state);

        findings.sort_by(|a, b| {
            (&a.file_path, a.line, a.column, &a.signature_id)
                .cmp(&(&b.file_path, b.line, b.column, &b.signature_id))
        });
        parse_errors.sort_by(|a, b| (&a.file_path, a.line).cmp(&(&b.file_path, b.line)));

        let worst_severity = findings.iter().map(|f| f.severity).max();
        let summary = ReportSummary {
            total_findings: findings.len(),
            parse_error_count: parse_errors.len(),
            threshold_event_count: events.len(),
            worst_severity,
        };
        Report {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "demorar-json-v1".to_string(),
            findings,
            parse_errors,
            threshold_events: events,
            handler_warnings,
            summary,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReportState> {
        // Poisoning only means another thread panicked mid-append; the
        // accumulated diagnostics are still worth reporting.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Aggregate counts over one report
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_findings: usize,
    pub parse_error_count: usize,
    pub threshold_event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_severity: Option<Severity>,
}

/// Immutable, ordered diagnostic report
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Crate version that produced the report
    pub version: String,
    /// Format name
    pub format: String,
    pub findings: Vec<Finding>,
    pub parse_errors: Vec<ParseDiagnostic>,
    pub threshold_events: Vec<ThresholdEvent>,
    pub handler_warnings: Vec<String>,
    pub summary: ReportSummary,
}

impl Report {
    /// Serialize to pretty JSON (machine-readable mode)
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// True when the scan should fail the process: any finding at
    /// removed-soon or worse, or any file that could not be parsed.
    pub fn exit_failure(&self) -> bool {
        !self.parse_errors.is_empty()
            || self
                .summary
                .worst_severity
                .is_some_and(|s| s >= Severity::RemovedSoon)
    }

    /// Render the human-readable report
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        if !self.findings.is_empty() {
            let _ = writeln!(out, "Deprecated API findings");
            let _ = writeln!(out, "{}", "─".repeat(72));
            for finding in &self.findings {
                let _ = writeln!(
                    out,
                    "{}:{}:{}: {} [{}]",
                    finding.file_path,
                    finding.line,
                    finding.column,
                    finding.severity,
                    finding.signature_id
                );
                let _ = writeln!(out, "    {}", finding.snippet);
                let _ = writeln!(out, "    → {}", finding.recommendation);
            }
            let _ = writeln!(out);
        }

        if !self.parse_errors.is_empty() {
            let _ = writeln!(out, "Parse errors");
            let _ = writeln!(out, "{}", "─".repeat(72));
            for diag in &self.parse_errors {
                let _ = writeln!(
                    out,
                    "{}:{}:{}: {}",
                    diag.file_path, diag.line, diag.column, diag.message
                );
            }
            let _ = writeln!(out);
        }

        if !self.threshold_events.is_empty() {
            let _ = writeln!(out, "Slow task events");
            let _ = writeln!(out, "{}", "─".repeat(72));
            for event in &self.threshold_events {
                let _ = writeln!(
                    out,
                    "{:<30} {:>10.3}s  {:?}",
                    event.unit_name,
                    event.duration_secs(),
                    event.outcome
                );
                if !event.origin.is_empty() {
                    let _ = writeln!(out, "  created at:");
                    for line in event.origin.to_string().lines() {
                        let _ = writeln!(out, "  {line}");
                    }
                }
            }
            let _ = writeln!(out);
        }

        for warning in &self.handler_warnings {
            let _ = writeln!(out, "warning: {warning}");
        }

        let worst = self
            .summary
            .worst_severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(
            out,
            "{} finding(s), {} parse error(s), {} slow task event(s), worst severity: {}",
            self.summary.total_findings,
            self.summary.parse_error_count,
            self.summary.threshold_event_count,
            worst
        );
        out
    }
}
