use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Free slots for a court on one day.
///
/// Enumerates the court's slot grid (only slots that fit before closing) and
/// drops every slot colliding with a booked hearing under the court's overlap
/// policy. The result stays in grid order, so it is ascending. A day with no
/// ledger yet has nothing booked.
pub fn free_slots(court: &Court, day: Option<&DayState>) -> Vec<Span> {
    let grid = court.slot_grid();
    let Some(day) = day else { return grid };
    if day.hearings.is_empty() {
        return grid;
    }
    grid.into_iter()
        .filter(|slot| day.colliding(slot, court.overlap).next().is_none())
        .collect()
}
