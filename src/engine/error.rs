use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{format_time_of_day, Span};

/// The hearing a rejected booking collided with, so the caller can pick another slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub hearing_id: Ulid,
    pub case_id: Ulid,
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Validation(String),
    CaseClosed(Ulid),
    Conflict(ConflictInfo),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::CaseClosed(id) => {
                write!(f, "case {id} is closed: hearings can no longer be changed")
            }
            EngineError::Conflict(c) => write!(
                f,
                "conflict with hearing {} (case {}) in court {} on {} at {}-{}",
                c.hearing_id,
                c.case_id,
                c.court_id,
                c.date,
                format_time_of_day(c.span.start),
                format_time_of_day(c.span.end),
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
