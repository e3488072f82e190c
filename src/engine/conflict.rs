use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{ConflictInfo, EngineError};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_court(court: &Court) -> Result<(), EngineError> {
    if court.name.trim().is_empty() {
        return Err(EngineError::Validation("court name is required".into()));
    }
    if court.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("court name too long"));
    }
    if let Some(ref loc) = court.location
        && loc.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("court location too long"));
        }
    if court.opens < 0 || court.closes > MINUTES_PER_DAY || court.opens >= court.closes {
        return Err(EngineError::Validation(format!(
            "operating hours {}-{} are not a valid window",
            format_time_of_day(court.opens.max(0)),
            format_time_of_day(court.closes.clamp(0, MINUTES_PER_DAY)),
        )));
    }
    if court.slot_minutes < MIN_SLOT_MINUTES {
        return Err(EngineError::Validation(format!(
            "slot duration must be at least {MIN_SLOT_MINUTES} minutes"
        )));
    }
    if court.slot_minutes > court.closes - court.opens {
        return Err(EngineError::Validation(
            "slot duration longer than operating hours".into(),
        ));
    }
    Ok(())
}

/// Resolve a requested start time to its slot, rejecting anything off the grid.
pub(crate) fn validate_slot(court: &Court, time: Minute) -> Result<Span, EngineError> {
    let end = time.saturating_add(court.slot_minutes);
    if time < court.opens || end > court.closes {
        return Err(EngineError::Validation(format!(
            "{} is outside operating hours {}-{} of court {}",
            format_time_of_day(time.clamp(0, MINUTES_PER_DAY)),
            format_time_of_day(court.opens),
            format_time_of_day(court.closes),
            court.id,
        )));
    }
    if (time - court.opens) % court.slot_minutes != 0 {
        return Err(EngineError::Validation(format!(
            "{} is not aligned to the {}-minute slot grid starting {}",
            format_time_of_day(time),
            court.slot_minutes,
            format_time_of_day(court.opens),
        )));
    }
    Ok(Span::new(time, end))
}

pub(crate) fn validate_notes(notes: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN {
            return Err(EngineError::Validation(format!(
                "notes longer than {MAX_NOTES_LEN} bytes"
            )));
        }
    Ok(())
}

/// Fails with the first hearing that collides with `span`. `exclude` is the
/// hearing being edited, which never conflicts with its own reservation.
pub(crate) fn check_no_conflict(
    day: &DayState,
    span: &Span,
    policy: OverlapPolicy,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if let Some(h) = day
        .colliding(span, policy)
        .find(|h| Some(h.id) != exclude)
    {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict(ConflictInfo {
            hearing_id: h.id,
            case_id: h.case_id,
            court_id: h.court_id,
            date: h.date,
            span: h.span,
        }));
    }
    Ok(())
}
