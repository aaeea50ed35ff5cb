//! Task origin capture via in-process stack walking
//!
//! This module records *where* a unit of work was created: a bounded-depth
//! snapshot of the live call stack, taken synchronously at creation time.
//! Frames are stored innermost-first (frame 0 is the nearest resolvable
//! caller of the capture point), the same top-down order a panic backtrace
//! prints.
//!
//! Capture depth is process-wide configuration. Set it once during host
//! application setup, before any tasks are created; changing it later only
//! affects tasks created afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of frames kept per capture
pub const DEFAULT_CAPTURE_DEPTH: usize = 10;

static CAPTURE_DEPTH: AtomicUsize = AtomicUsize::new(DEFAULT_CAPTURE_DEPTH);

/// Set the process-wide origin capture depth.
///
/// A depth of 0 disables origin capture entirely (every subsequent capture
/// returns an empty [`Origin`]). Intended to be called once during setup;
/// library code never mutates it.
pub fn set_capture_depth(depth: usize) {
    CAPTURE_DEPTH.store(depth, Ordering::Relaxed);
}

/// Get the current process-wide origin capture depth.
pub fn capture_depth() -> usize {
    CAPTURE_DEPTH.load(Ordering::Relaxed)
}

/// A single resolved stack frame at capture time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameDescriptor {
    /// Source file the frame's function was defined in
    pub file_path: String,
    /// 1-based line number within `file_path`
    pub line_number: u32,
    /// Demangled function name, without the trailing symbol hash
    pub function_name: String,
}

/// An ordered snapshot of the call stack at task creation.
///
/// Frames are innermost-first. An empty origin means capture was disabled
/// (depth 0) or no frames could be resolved; it is never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin {
    frames: Vec<FrameDescriptor>,
}

impl Origin {
    /// An origin with no frames
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an origin from already-resolved frames (innermost-first)
    pub fn new(frames: Vec<FrameDescriptor>) -> Self {
        Self { frames }
    }

    /// The captured frames, innermost-first
    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return write!(f, "<no origin>");
        }
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{:>4}: {} ({}:{})",
                i, frame.function_name, frame.file_path, frame.line_number
            )?;
        }
        Ok(())
    }
}

/// Capture up to `max_depth` frames of the current call stack.
///
/// Walks outward from the immediate caller, keeping only frames that resolve
/// to a function name, file and line. The walk aborts as soon as `max_depth`
/// frames have been kept, so cost is bounded regardless of total stack depth.
/// Returns an empty [`Origin`] when symbols are unavailable; never fails.
pub fn capture(max_depth: usize) -> Origin {
    if max_depth == 0 {
        return Origin::empty();
    }

    let mut frames = Vec::with_capacity(max_depth.min(16));
    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            if frames.len() >= max_depth {
                return;
            }
            let name = match symbol.name() {
                Some(name) => format!("{name:#}"),
                None => return,
            };
            if is_capture_machinery(&name) {
                return;
            }
            let file_path = match symbol.filename() {
                Some(path) => path.display().to_string(),
                None => return,
            };
            let line_number = match symbol.lineno() {
                Some(line) => line,
                None => return,
            };
            frames.push(FrameDescriptor {
                file_path,
                line_number,
                function_name: name,
            });
        });
        frames.len() < max_depth
    });

    Origin::new(frames)
}

/// Capture at the current process-wide depth
pub fn capture_default() -> Origin {
    capture(capture_depth())
}

/// Frames belonging to the recorder itself or to the unwinder are not part
/// of the caller's origin.
fn is_capture_machinery(name: &str) -> bool {
    name.starts_with("backtrace::")
        || name.contains("origin::capture")
        || name.contains("demorar::monitor::")
}
