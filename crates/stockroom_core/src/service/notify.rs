//! Outbound collaborators of the inventory service.
//!
//! # Responsibility
//! - Describe mutation outcomes as user-facing notices.
//! - Ask the user for a yes/no before destructive operations.
//!
//! # Invariants
//! - Notice messages are short and non-technical; detail goes to the log.

use crate::session::{CommitKind, SessionError};
use log::{info, warn};
use std::fmt::{Display, Formatter};

/// Outcome class of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    SaveSucceeded,
    SaveFailed,
    DeleteSucceeded,
    DeleteFailed,
}

impl NoticeKind {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::SaveFailed | Self::DeleteFailed)
    }
}

impl Display for NoticeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::SaveSucceeded => "save_succeeded",
            Self::SaveFailed => "save_failed",
            Self::DeleteSucceeded => "delete_succeeded",
            Self::DeleteFailed => "delete_failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn saved(kind: CommitKind) -> Self {
        let message = match kind {
            CommitKind::Created => "Product added.",
            CommitKind::Updated => "Product updated.",
        };
        Self::new(NoticeKind::SaveSucceeded, message)
    }

    pub(crate) fn save_failed(err: &SessionError) -> Self {
        let message = match err {
            SessionError::Validation(_) => {
                "Please enter a name and non-negative numbers for price and count."
            }
            SessionError::NotFound(_) => "This product no longer exists.",
            _ => "Could not save the product. Please try again.",
        };
        Self::new(NoticeKind::SaveFailed, message)
    }

    pub(crate) fn deleted() -> Self {
        Self::new(NoticeKind::DeleteSucceeded, "Product deleted.")
    }

    pub(crate) fn delete_failed() -> Self {
        Self::new(
            NoticeKind::DeleteFailed,
            "Could not delete the product. Please try again.",
        )
    }
}

/// Receiver of mutation outcome notices (toasts, status lines, ...).
pub trait Notifier {
    fn notify(&self, notice: Notice);
}

impl<F> Notifier for F
where
    F: Fn(Notice),
{
    fn notify(&self, notice: Notice) {
        self(notice)
    }
}

/// Notifier that only writes notice classes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        if notice.kind.is_failure() {
            warn!("event=notice module=service status=error kind={}", notice.kind);
        } else {
            info!("event=notice module=service status=ok kind={}", notice.kind);
        }
    }
}

/// Blocking yes/no prompt shown before a delete.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}
