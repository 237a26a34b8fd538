//! Edit session management.
//!
//! Groups retained-graph mutations into one transactional scope so the
//! renderer observes a consistent state. The local invariant is strict:
//! a session opened by [`EditSession::scoped`] is closed on every exit
//! path, including early returns and entity-level errors inside the body.
//! Commit-or-rollback semantics belong to the sink; we only guarantee the
//! scope is never left open.

use crate::errors::{Result, SyncError};
use crate::sink::SceneSink;

/// Session state machine: Idle → Open → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Open,
}

/// Serializes edit scopes on one sink.
///
/// Logically-independent edits triggered together should be batched into a
/// single `scoped` call to keep renderer-side transaction overhead down;
/// that is an optimization, not a correctness requirement.
#[derive(Debug, Default)]
pub struct EditSession {
    state: SessionState,
    committed: u64,
}

impl EditSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Number of successfully committed scopes.
    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed
    }

    fn begin<S: SceneSink>(&mut self, sink: &mut S) -> Result<()> {
        if self.state == SessionState::Open {
            debug_assert!(false, "edit session opened twice");
            return Err(SyncError::SessionViolation("session already open"));
        }
        sink.edit_begin()?;
        self.state = SessionState::Open;
        Ok(())
    }

    fn end<S: SceneSink>(&mut self, sink: &mut S) -> Result<()> {
        if self.state == SessionState::Idle {
            debug_assert!(false, "edit session closed while idle");
            return Err(SyncError::SessionViolation("session not open"));
        }
        // 无论提交结果如何都回到 Idle
        self.state = SessionState::Idle;
        sink.edit_end()?;
        self.committed += 1;
        Ok(())
    }

    /// Runs `body` inside one edit scope.
    ///
    /// The scope is committed on all exit paths. A failure from the body
    /// takes precedence over a failure from the commit; the cache is never
    /// rolled back here — the caller decides whether to re-run the pass.
    pub fn scoped<S: SceneSink, T>(
        &mut self,
        sink: &mut S,
        body: impl FnOnce(&mut S) -> Result<T>,
    ) -> Result<T> {
        self.begin(sink)?;
        let result = body(sink);
        let commit = self.end(sink);
        match (result, commit) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), _) | (Ok(_), Err(err)) => Err(err),
        }
    }
}
