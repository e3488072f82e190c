use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::free_slots;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_court(&self, id: &Ulid) -> Result<Court, EngineError> {
        self.courts
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn list_courts(&self) -> Vec<Court> {
        let mut courts: Vec<Court> = self.courts.iter().map(|e| e.value().clone()).collect();
        courts.sort_by_key(|c| c.id);
        courts
    }

    pub async fn get_case(&self, id: Ulid) -> Result<CaseState, EngineError> {
        let case = self.get_case_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = case.read().await;
        Ok(guard.clone())
    }

    /// Free slot windows for a court on a date, ascending. Empty means fully booked.
    /// Observes committed state only; a returned slot may be taken before the
    /// caller books it, in which case the booking fails with Conflict.
    pub async fn available_slots(
        &self,
        court_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let court = self.get_court(&court_id)?;
        match self.existing_day(&DayKey::new(court_id, date)) {
            Some(day) => {
                let guard = day.read().await;
                Ok(free_slots(&court, Some(&guard)))
            }
            None => Ok(free_slots(&court, None)),
        }
    }

    pub async fn get_hearing(&self, id: Ulid) -> Result<Hearing, EngineError> {
        // A concurrent move can leave the looked-up ledger stale; re-resolve.
        loop {
            let loc = self
                .get_hearing_location(&id)
                .ok_or(EngineError::NotFound(id))?;
            let day = self.existing_day(&loc.day).ok_or(EngineError::NotFound(id))?;
            let guard = day.read().await;
            if let Some(h) = guard.get(&id) {
                return Ok(h.clone());
            }
        }
    }

    /// Hearings in a court on a date, ascending by start. Unknown court is NotFound.
    pub async fn hearings_for_day(
        &self,
        court_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Hearing>, EngineError> {
        if !self.courts.contains_key(&court_id) {
            return Err(EngineError::NotFound(court_id));
        }
        let Some(day) = self.existing_day(&DayKey::new(court_id, date)) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard.hearings.clone())
    }

    /// Every hearing of a case, ordered by date then start time.
    pub async fn hearings_for_case(&self, case_id: Ulid) -> Result<Vec<Hearing>, EngineError> {
        if !self.cases.contains_key(&case_id) {
            return Err(EngineError::NotFound(case_id));
        }
        let ids: Vec<Ulid> = self
            .hearing_index
            .iter()
            .filter(|e| e.value().case_id == case_id)
            .map(|e| *e.key())
            .collect();

        let mut hearings = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_hearing(id).await {
                Ok(h) => hearings.push(h),
                // Deleted after the index scan.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        hearings.sort_by_key(|h| (h.date, h.span.start));
        Ok(hearings)
    }
}
