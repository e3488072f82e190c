use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_court, validate_notes, validate_slot};
use super::gate::ensure_mutable;
use super::{Engine, EngineError, WalCommand};

/// A booking request for a new hearing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HearingRequest {
    pub case_id: Ulid,
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub time: Minute,
    pub notes: Option<String>,
}

/// Edit of an existing hearing. `None` keeps the current value; `notes:
/// Some(None)` clears the notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HearingChange {
    pub court_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub time: Option<Minute>,
    pub notes: Option<Option<String>>,
}

impl Engine {
    // ── Court directory ──────────────────────────────────────

    pub async fn create_court(&self, court: Court) -> Result<(), EngineError> {
        let _commit = self.commit_lock.read().await;
        if self.courts.len() >= MAX_COURTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many courts"));
        }
        validate_court(&court)?;
        if self.courts.contains_key(&court.id) {
            return Err(EngineError::AlreadyExists(court.id));
        }

        let event = Event::CourtCreated { court: court.clone() };
        self.wal_append(&event).await?;
        self.courts.insert(court.id, court);
        self.notify_event(&event);
        Ok(())
    }

    // ── Case mirror ──────────────────────────────────────────

    pub async fn open_case(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_lock.read().await;
        if self.cases.len() >= MAX_CASES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many cases"));
        }
        if self.cases.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CaseOpened { id };
        self.wal_append(&event).await?;
        self.cases
            .insert(id, Arc::new(RwLock::new(CaseState::new(id))));
        self.notify_event(&event);
        Ok(())
    }

    /// Judge assignment. Moves an Open case to InProgress.
    pub async fn assign_judge(&self, case_id: Ulid, judge: String) -> Result<CaseState, EngineError> {
        let _commit = self.commit_lock.read().await;
        let case = self
            .get_case_state(&case_id)
            .ok_or(EngineError::NotFound(case_id))?;
        let mut guard = case.write().await;
        ensure_mutable(&guard)?;
        if judge.trim().is_empty() {
            return Err(EngineError::Validation("judge is required".into()));
        }
        if judge.len() > MAX_JUDGE_LEN {
            return Err(EngineError::LimitExceeded("judge name too long"));
        }

        let event = Event::JudgeAssigned { id: case_id, judge };
        self.persist_and_apply_case(&mut guard, &event).await?;
        Ok(guard.clone())
    }

    /// Status change. Waits for in-flight hearing mutations on this case, so
    /// once a close returns no further mutation can slip through the gate.
    pub async fn set_case_status(
        &self,
        case_id: Ulid,
        status: CaseStatus,
    ) -> Result<CaseState, EngineError> {
        let _commit = self.commit_lock.read().await;
        let case = self
            .get_case_state(&case_id)
            .ok_or(EngineError::NotFound(case_id))?;
        let mut guard = case.write().await;
        ensure_mutable(&guard)?;
        if guard.status == status {
            return Ok(guard.clone());
        }
        if !guard.status.can_transition_to(status) {
            return Err(EngineError::Validation(format!(
                "case {case_id} cannot move from {} to {}",
                guard.status.as_str(),
                status.as_str()
            )));
        }

        let event = Event::CaseStatusChanged { id: case_id, status };
        self.persist_and_apply_case(&mut guard, &event).await?;
        Ok(guard.clone())
    }

    // ── Booking validator ────────────────────────────────────

    pub async fn schedule_hearing(&self, req: HearingRequest) -> Result<Hearing, EngineError> {
        let _commit = self.commit_lock.read().await;
        let _case = self.require_mutable(req.case_id).await?;
        let court = self.get_court(&req.court_id)?;
        let span = validate_slot(&court, req.time)?;
        validate_notes(&req.notes)?;

        let key = DayKey::new(court.id, req.date);
        let day = self.day_state(key);
        let mut guard = day.write().await;
        if guard.hearings.len() >= MAX_HEARINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many hearings on this day"));
        }

        check_no_conflict(&guard, &span, court.overlap, None)?;

        let hearing = Hearing {
            id: Ulid::new(),
            case_id: req.case_id,
            court_id: court.id,
            date: req.date,
            span,
            notes: req.notes,
            created_at: now_ms(),
        };
        let event = Event::HearingScheduled {
            hearing: hearing.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(
            "scheduled hearing {} for case {} in court {} on {} at {}",
            hearing.id,
            hearing.case_id,
            hearing.court_id,
            hearing.date,
            format_time_of_day(hearing.time())
        );
        Ok(hearing)
    }

    /// Re-validate and move a hearing. The hearing itself is excluded from the
    /// conflict check, so keeping its current slot always succeeds.
    pub async fn update_hearing(
        &self,
        id: Ulid,
        change: HearingChange,
    ) -> Result<Hearing, EngineError> {
        let _commit = self.commit_lock.read().await;
        loop {
            let loc = self
                .get_hearing_location(&id)
                .ok_or(EngineError::NotFound(id))?;
            let _case = self.require_mutable(loc.case_id).await?;
            let court = self.get_court(&change.court_id.unwrap_or(loc.day.court_id))?;
            let to_key = DayKey::new(court.id, change.date.unwrap_or(loc.day.date));

            if to_key == loc.day {
                let day = self.day_state(to_key);
                let mut guard = day.write().await;
                // Moved or deleted since the index lookup: resolve again.
                let Some(current) = guard.get(&id).cloned() else {
                    continue;
                };
                let (span, notes) = resolve_change(&court, &current, &change)?;
                check_no_conflict(&guard, &span, court.overlap, Some(id))?;

                let hearing = Hearing {
                    span,
                    notes,
                    ..current
                };
                let event = Event::HearingUpdated {
                    hearing: hearing.clone(),
                    from: loc.day,
                };
                self.persist_and_apply(&mut guard, &event).await?;
                debug!("updated hearing {id} in place");
                return Ok(hearing);
            }

            // Two ledgers: lock in key order so crossing moves cannot deadlock.
            let from_day = self.day_state(loc.day);
            let to_day = self.day_state(to_key);
            let (mut from_guard, mut to_guard) = if loc.day < to_key {
                let f = from_day.write().await;
                let t = to_day.write().await;
                (f, t)
            } else {
                let t = to_day.write().await;
                let f = from_day.write().await;
                (f, t)
            };
            let Some(current) = from_guard.get(&id).cloned() else {
                continue;
            };
            let (span, notes) = resolve_change(&court, &current, &change)?;
            if to_guard.hearings.len() >= MAX_HEARINGS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many hearings on this day"));
            }
            check_no_conflict(&to_guard, &span, court.overlap, Some(id))?;

            let hearing = Hearing {
                court_id: court.id,
                date: to_key.date,
                span,
                notes,
                ..current
            };
            let event = Event::HearingUpdated {
                hearing: hearing.clone(),
                from: loc.day,
            };
            self.persist_and_apply_move(&mut from_guard, &mut to_guard, &event)
                .await?;
            debug!(
                "moved hearing {id} from court {} on {} to court {} on {}",
                loc.day.court_id, loc.day.date, to_key.court_id, to_key.date
            );
            return Ok(hearing);
        }
    }

    /// Remove a hearing, freeing its window. Returns what was removed.
    pub async fn delete_hearing(&self, id: Ulid) -> Result<Hearing, EngineError> {
        let _commit = self.commit_lock.read().await;
        loop {
            let loc = self
                .get_hearing_location(&id)
                .ok_or(EngineError::NotFound(id))?;
            let _case = self.require_mutable(loc.case_id).await?;
            let day = self.existing_day(&loc.day).ok_or(EngineError::NotFound(id))?;
            let mut guard = day.write().await;
            let Some(current) = guard.get(&id).cloned() else {
                continue;
            };

            let event = Event::HearingDeleted {
                id,
                case_id: current.case_id,
                day: loc.day,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            debug!("deleted hearing {id}");
            return Ok(current);
        }
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation is between its WAL append and its apply.
        let _commit = self.commit_lock.write().await;
        let mut events = Vec::new();

        for entry in self.courts.iter() {
            events.push(Event::CourtCreated {
                court: entry.value().clone(),
            });
        }

        let cases: Vec<_> = self.cases.iter().map(|e| e.value().clone()).collect();
        for case in cases {
            let guard = case.read().await;
            events.push(Event::CaseOpened { id: guard.id });
            let mut replayed = CaseStatus::Open;
            if let Some(judge) = &guard.judge {
                events.push(Event::JudgeAssigned {
                    id: guard.id,
                    judge: judge.clone(),
                });
                replayed = CaseStatus::InProgress;
            }
            if guard.status != replayed {
                events.push(Event::CaseStatusChanged {
                    id: guard.id,
                    status: guard.status,
                });
            }
        }

        let days: Vec<_> = self.days.iter().map(|e| e.value().clone()).collect();
        for day in days {
            let guard = day.read().await;
            for hearing in &guard.hearings {
                events.push(Event::HearingScheduled {
                    hearing: hearing.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Target window and notes of an edit, falling back to the current values.
fn resolve_change(
    court: &Court,
    current: &Hearing,
    change: &HearingChange,
) -> Result<(Span, Option<String>), EngineError> {
    let span = validate_slot(court, change.time.unwrap_or(current.span.start))?;
    let notes = match &change.notes {
        Some(notes) => notes.clone(),
        None => current.notes.clone(),
    };
    validate_notes(&notes)?;
    Ok((span, notes))
}
