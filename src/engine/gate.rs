//! Case state gate.
//!
//! Every entry point that mutates hearings, assigns a judge, or changes a
//! case's status goes through [`ensure_mutable`]. Read-side callers get a
//! [`CaseGuard`]: while it is held, the case cannot be closed underneath them.

use tokio::sync::OwnedRwLockReadGuard;
use ulid::Ulid;

use crate::model::CaseState;

use super::{Engine, EngineError};

/// Shared hold on a case record, proof that it was mutable when acquired.
pub type CaseGuard = OwnedRwLockReadGuard<CaseState>;

/// The one status check. Closed is terminal.
pub fn ensure_mutable(case: &CaseState) -> Result<(), EngineError> {
    if case.status.is_terminal() {
        metrics::counter!(crate::observability::GATE_REJECTIONS_TOTAL).increment(1);
        return Err(EngineError::CaseClosed(case.id));
    }
    Ok(())
}

impl Engine {
    pub async fn can_mutate_hearings(&self, case_id: Ulid) -> Result<bool, EngineError> {
        let case = self
            .get_case_state(&case_id)
            .ok_or(EngineError::NotFound(case_id))?;
        let guard = case.read().await;
        Ok(!guard.status.is_terminal())
    }

    pub async fn require_mutable(&self, case_id: Ulid) -> Result<CaseGuard, EngineError> {
        let case = self
            .get_case_state(&case_id)
            .ok_or(EngineError::NotFound(case_id))?;
        let guard = case.read_owned().await;
        ensure_mutable(&guard)?;
        Ok(guard)
    }
}
