//! Mutation session manager.
//!
//! # Responsibility
//! - Own the single in-progress create/edit draft and its lifecycle.
//! - Gate commits behind draft validation and the loading flag.
//! - Match write completions to the session attempt that issued them.
//!
//! # Invariants
//! - At most one session exists at a time.
//! - A failed commit leaves the session open with its drafts intact.
//! - A completion whose ticket does not match the open session is ignored
//!   and never reopens a closed session.

use crate::model::product::{Product, ProductFields, ProductId, ProductValidationError};
use crate::store::{StoreError, StoreResult};
use crate::sync::echo::EchoExpectation;
use crate::sync::loading::{LoadingFlag, LoadingGuard, LoadingReason};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod draft;

pub use draft::{Draft, DraftField};

pub type SessionResult<T> = Result<T, SessionError>;

/// Failures of session and mutation operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Drafts failed validation; the session stays open.
    Validation(ProductValidationError),
    /// Target product vanished underneath the operation.
    NotFound(ProductId),
    /// Transport or backend failure; retry is left to the user.
    StoreUnavailable(String),
    /// Another load or mutation holds the loading flag.
    Busy,
    /// No create/edit session is open.
    NoActiveSession,
    /// The owning service has been shut down.
    ShutDown,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "product not found: {id}"),
            Self::StoreUnavailable(message) => write!(f, "store unavailable: {message}"),
            Self::Busy => write!(f, "another operation is in progress"),
            Self::NoActiveSession => write!(f, "no edit session is open"),
            Self::ShutDown => write!(f, "inventory service is shut down"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProductValidationError> for SessionError {
    fn from(value: ProductValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Unavailable(message) | StoreError::InvalidData(message) => {
                Self::StoreUnavailable(message)
            }
        }
    }
}

/// Identity of one opened session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Identity of one commit attempt of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitTicket {
    session: SessionId,
    attempt: u64,
}

/// Whether a session creates a product or edits an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    Create,
    Edit(ProductId),
}

/// One open create/edit draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    id: SessionId,
    mode: SessionMode,
    draft: Draft,
    committing: Option<CommitTicket>,
}

impl EditSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn mode(&self) -> &SessionMode {
        &self.mode
    }

    /// Edited product, or `None` in create mode.
    pub fn target(&self) -> Option<&ProductId> {
        match &self.mode {
            SessionMode::Create => None,
            SessionMode::Edit(id) => Some(id),
        }
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn is_committing(&self) -> bool {
        self.committing.is_some()
    }
}

/// Remote write a commit must issue.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Insert(ProductFields),
    Update { id: ProductId, fields: ProductFields },
}

impl WriteRequest {
    pub fn fields(&self) -> &ProductFields {
        match self {
            Self::Insert(fields) | Self::Update { fields, .. } => fields,
        }
    }

    /// Snapshot state that reflects this write once acknowledged as `id`.
    pub fn echo_expectation(&self, id: ProductId) -> EchoExpectation {
        match self {
            Self::Insert(_) => EchoExpectation::Present(id),
            Self::Update { fields, .. } => EchoExpectation::Updated {
                id,
                fields: fields.clone(),
            },
        }
    }
}

/// A validated commit holding the loading flag until it is settled.
#[derive(Debug)]
pub struct PendingCommit {
    pub ticket: CommitTicket,
    pub write: WriteRequest,
    pub guard: LoadingGuard,
}

/// Kind of product write a commit performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Created,
    Updated,
}

/// Result of matching a write completion to the open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write succeeded and the session closed.
    Committed { id: ProductId, kind: CommitKind },
    /// The write failed and the session stays open for retry.
    Failed(SessionError),
    /// The session was cancelled or replaced before the write completed.
    Stale,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    session: Option<EditSession>,
    next_session: u64,
    next_attempt: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    /// Opens a create-mode session with empty drafts.
    pub fn begin_create(&mut self) -> SessionResult<SessionId> {
        self.open(SessionMode::Create, Draft::default())
    }

    /// Opens an edit session over the current values of `id`.
    ///
    /// # Errors
    /// - `NotFound` when `id` is absent from `products`.
    /// - `Busy` while the open session is committing.
    pub fn begin_edit(&mut self, id: &ProductId, products: &[Product]) -> SessionResult<SessionId> {
        let Some(product) = products.iter().find(|product| &product.id == id) else {
            info!("event=session_open module=session status=not_found id={id}");
            return Err(SessionError::NotFound(id.clone()));
        };
        self.open(SessionMode::Edit(id.clone()), Draft::from_product(product))
    }

    /// Changes one draft field. No validation happens here.
    pub fn update_draft(&mut self, field: DraftField, value: impl Into<String>) -> SessionResult<()> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        if session.is_committing() {
            return Err(SessionError::Busy);
        }
        session.draft.set(field, value);
        Ok(())
    }

    /// Discards the open session. Returns whether one was open.
    pub fn cancel(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                debug!(
                    "event=session_close module=session status=cancelled session={} committing={}",
                    session.id.0,
                    session.is_committing()
                );
                true
            }
            None => false,
        }
    }

    /// Discards the open session when it edits `id`.
    pub fn discard_if_targets(&mut self, id: &ProductId) -> bool {
        if self.session.as_ref().and_then(EditSession::target) == Some(id) {
            return self.cancel();
        }
        false
    }

    /// Validates the drafts and claims the loading flag for the remote write.
    ///
    /// # Errors
    /// - `NoActiveSession` when nothing is open.
    /// - `Validation` when drafts are invalid; nothing else changes.
    /// - `Busy` when a commit is already in flight or the flag is held.
    pub fn prepare_commit(&mut self, flag: &LoadingFlag) -> SessionResult<PendingCommit> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        if session.is_committing() {
            return Err(SessionError::Busy);
        }

        let fields = session.draft.validate().map_err(|err| {
            info!(
                "event=session_commit module=session status=invalid session={} error={err}",
                session.id.0
            );
            SessionError::from(err)
        })?;
        let guard = flag
            .try_acquire(LoadingReason::Commit)
            .ok_or(SessionError::Busy)?;

        self.next_attempt += 1;
        let ticket = CommitTicket {
            session: session.id,
            attempt: self.next_attempt,
        };
        session.committing = Some(ticket);

        let write = match &session.mode {
            SessionMode::Create => WriteRequest::Insert(fields),
            SessionMode::Edit(id) => WriteRequest::Update {
                id: id.clone(),
                fields,
            },
        };
        debug!(
            "event=session_commit module=session status=start session={} attempt={}",
            ticket.session.0, ticket.attempt
        );
        Ok(PendingCommit {
            ticket,
            write,
            guard,
        })
    }

    /// Applies the completion of the write issued for `ticket`.
    ///
    /// `result` carries the id of the written product on success.
    pub fn resolve_commit(&mut self, ticket: CommitTicket, result: StoreResult<ProductId>) -> CommitOutcome {
        let matches = self
            .session
            .as_ref()
            .is_some_and(|session| session.committing == Some(ticket));
        if !matches {
            debug!(
                "event=session_commit module=session status=stale session={} attempt={}",
                ticket.session.0, ticket.attempt
            );
            return CommitOutcome::Stale;
        }

        match result {
            Ok(id) => {
                let kind = match self.session.take().map(|session| session.mode) {
                    Some(SessionMode::Edit(_)) => CommitKind::Updated,
                    _ => CommitKind::Created,
                };
                info!("event=session_commit module=session status=ok id={id}");
                CommitOutcome::Committed { id, kind }
            }
            Err(err) => {
                if let Some(session) = self.session.as_mut() {
                    session.committing = None;
                }
                warn!(
                    "event=session_commit module=session status=error session={} error={err}",
                    ticket.session.0
                );
                CommitOutcome::Failed(SessionError::from(err))
            }
        }
    }

    fn open(&mut self, mode: SessionMode, draft: Draft) -> SessionResult<SessionId> {
        if self.session.as_ref().is_some_and(EditSession::is_committing) {
            return Err(SessionError::Busy);
        }
        if let Some(previous) = self.session.take() {
            debug!(
                "event=session_close module=session status=replaced session={}",
                previous.id.0
            );
        }

        self.next_session += 1;
        let id = SessionId(self.next_session);
        debug!(
            "event=session_open module=session status=ok session={} mode={}",
            id.0,
            match &mode {
                SessionMode::Create => "create",
                SessionMode::Edit(_) => "edit",
            }
        );
        self.session = Some(EditSession {
            id,
            mode,
            draft,
            committing: None,
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CommitKind, CommitOutcome, DraftField, SessionError, SessionManager, SessionMode,
        WriteRequest,
    };
    use crate::model::product::{Product, ProductFields, ProductId, ProductValidationError};
    use crate::store::StoreError;
    use crate::sync::loading::LoadingFlag;

    fn catalog() -> Vec<Product> {
        vec![Product::new("42", ProductFields::new("Widget", 9.99, 3))]
    }

    fn fill(manager: &mut SessionManager, name: &str, price: &str, count: &str) {
        manager.update_draft(DraftField::Name, name).unwrap();
        manager.update_draft(DraftField::Price, price).unwrap();
        manager.update_draft(DraftField::Count, count).unwrap();
    }

    #[test]
    fn begin_edit_prepopulates_from_current_values() {
        let mut manager = SessionManager::new();
        manager.begin_edit(&ProductId::new("42"), &catalog()).unwrap();

        let session = manager.session().expect("session should be open");
        assert_eq!(session.mode(), &SessionMode::Edit(ProductId::new("42")));
        assert_eq!(session.draft().name, "Widget");
        assert_eq!(session.draft().price, "9.99");
        assert_eq!(session.draft().count, "3");
    }

    #[test]
    fn begin_edit_of_missing_product_is_not_found() {
        let mut manager = SessionManager::new();
        let err = manager
            .begin_edit(&ProductId::new("7"), &catalog())
            .unwrap_err();
        assert_eq!(err, SessionError::NotFound(ProductId::new("7")));
        assert!(manager.session().is_none());
    }

    #[test]
    fn invalid_draft_keeps_session_open_and_flag_clear() {
        let flag = LoadingFlag::new();
        let mut manager = SessionManager::new();
        manager.begin_create().unwrap();
        fill(&mut manager, "", "1", "1");

        let err = manager.prepare_commit(&flag).unwrap_err();
        assert_eq!(err, SessionError::Validation(ProductValidationError::EmptyName));
        assert!(manager.session().is_some());
        assert!(!flag.is_loading());
        assert_eq!(flag.transitions(), (0, 0));
    }

    #[test]
    fn successful_commit_closes_session() {
        let flag = LoadingFlag::new();
        let mut manager = SessionManager::new();
        manager.begin_create().unwrap();
        fill(&mut manager, "Widget", "9.99", "3");

        let pending = manager.prepare_commit(&flag).unwrap();
        assert_eq!(
            pending.write,
            WriteRequest::Insert(ProductFields::new("Widget", 9.99, 3))
        );
        assert!(flag.is_loading());

        let outcome = manager.resolve_commit(pending.ticket, Ok(ProductId::new("new")));
        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                id: ProductId::new("new"),
                kind: CommitKind::Created
            }
        );
        assert!(manager.session().is_none());
        drop(pending.guard);
        assert!(!flag.is_loading());
    }

    #[test]
    fn failed_commit_keeps_drafts_for_retry() {
        let flag = LoadingFlag::new();
        let mut manager = SessionManager::new();
        manager.begin_edit(&ProductId::new("42"), &catalog()).unwrap();
        manager.update_draft(DraftField::Count, "5").unwrap();

        let pending = manager.prepare_commit(&flag).unwrap();
        let outcome = manager.resolve_commit(
            pending.ticket,
            Err(StoreError::Unavailable("timeout".to_string())),
        );
        drop(pending.guard);

        assert_eq!(
            outcome,
            CommitOutcome::Failed(SessionError::StoreUnavailable("timeout".to_string()))
        );
        let session = manager.session().expect("session should stay open");
        assert!(!session.is_committing());
        assert_eq!(session.draft().count, "5");
        assert!(manager.prepare_commit(&flag).is_ok());
    }

    #[test]
    fn completion_after_cancel_is_ignored() {
        let flag = LoadingFlag::new();
        let mut manager = SessionManager::new();
        manager.begin_create().unwrap();
        fill(&mut manager, "Widget", "1", "1");

        let pending = manager.prepare_commit(&flag).unwrap();
        assert!(manager.cancel());
        let outcome = manager.resolve_commit(pending.ticket, Ok(ProductId::new("x")));

        assert_eq!(outcome, CommitOutcome::Stale);
        assert!(manager.session().is_none());
    }

    #[test]
    fn completion_for_replaced_session_is_ignored() {
        let flag = LoadingFlag::new();
        let mut manager = SessionManager::new();
        manager.begin_create().unwrap();
        fill(&mut manager, "Widget", "1", "1");
        let pending = manager.prepare_commit(&flag).unwrap();

        assert!(manager.cancel());
        manager.begin_create().unwrap();
        let outcome = manager.resolve_commit(
            pending.ticket,
            Err(StoreError::Unavailable("late".to_string())),
        );

        assert_eq!(outcome, CommitOutcome::Stale);
        assert!(!manager.session().expect("new session stays").is_committing());
    }

    #[test]
    fn drafts_and_new_sessions_are_blocked_while_committing() {
        let flag = LoadingFlag::new();
        let mut manager = SessionManager::new();
        manager.begin_create().unwrap();
        fill(&mut manager, "Widget", "1", "1");
        let _pending = manager.prepare_commit(&flag).unwrap();

        assert_eq!(
            manager.update_draft(DraftField::Name, "x"),
            Err(SessionError::Busy)
        );
        assert_eq!(manager.begin_create(), Err(SessionError::Busy));
        assert!(matches!(manager.prepare_commit(&flag), Err(SessionError::Busy)));
    }

    #[test]
    fn update_draft_without_session_fails() {
        let mut manager = SessionManager::new();
        assert_eq!(
            manager.update_draft(DraftField::Name, "x"),
            Err(SessionError::NoActiveSession)
        );
        assert!(!manager.cancel());
    }

    #[test]
    fn discard_if_targets_only_closes_matching_edit() {
        let mut manager = SessionManager::new();
        manager.begin_edit(&ProductId::new("42"), &catalog()).unwrap();
        assert!(!manager.discard_if_targets(&ProductId::new("1")));
        assert!(manager.discard_if_targets(&ProductId::new("42")));
        assert!(manager.session().is_none());
    }
}
