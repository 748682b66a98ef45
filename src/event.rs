//! Build progress events.
//!
//! The builder reports progress as tagged values over an unbounded channel,
//! leaving presentation to whoever holds the receiving end (the CLI, a
//! test harness). Within one package, skipped files appear in walk order
//! and built files in worker-completion order; `PackageComplete` follows
//! every file event of its package, `ProjectComplete` follows every
//! package.

use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Why a source file was not handed to a compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UpToDate,
    PlatformMismatch,
    NoCompiler,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpToDate => write!(f, "up to date"),
            SkipReason::PlatformMismatch => write!(f, "platform mismatch"),
            SkipReason::NoCompiler => write!(f, "no compiler for resource type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    /// Every compiler worker completed its version handshake.
    Ready,
    PackageStarted {
        package: String,
    },
    FileStarted {
        package: String,
        source_path: PathBuf,
    },
    FileSkipped {
        package: String,
        source_path: PathBuf,
        reason: SkipReason,
    },
    FileSuccess {
        package: String,
        source_path: PathBuf,
    },
    FileError {
        package: String,
        source_path: PathBuf,
        errors: Vec<String>,
    },
    PackageComplete {
        package: String,
        error_count: usize,
    },
    ProjectComplete {
        error_count: usize,
    },
}

pub type EventSender = mpsc::UnboundedSender<BuildEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BuildEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
