use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;

/// Unix milliseconds. Only used for creation timestamps.
pub type Ms = i64;

/// Minutes since midnight. The only time-of-day type.
pub type Minute = i32;

/// Half-open window `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Overlapping or sharing a boundary.
    pub fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Parse `HH:MM` or `HH:MM:SS`. `24:00` is accepted as end of day.
pub fn parse_time_of_day(s: &str) -> Option<Minute> {
    let s = s.trim();
    if s == "24:00" || s == "24:00:00" {
        return Some(MINUTES_PER_DAY);
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()?;
    if t.second() != 0 {
        return None;
    }
    Some((t.hour() * 60 + t.minute()) as Minute)
}

pub fn format_time_of_day(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Whether hearings that merely share a boundary collide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Only a shared instant inside both windows collides; back-to-back is fine.
    #[default]
    Strict,
    /// Touching windows collide too, forcing a gap between hearings.
    Inclusive,
}

impl OverlapPolicy {
    pub fn collides(self, a: &Span, b: &Span) -> bool {
        match self {
            OverlapPolicy::Strict => a.overlaps(b),
            OverlapPolicy::Inclusive => a.touches(b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OverlapPolicy::Strict => "strict",
            OverlapPolicy::Inclusive => "inclusive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Some(OverlapPolicy::Strict),
            "inclusive" => Some(OverlapPolicy::Inclusive),
            _ => None,
        }
    }
}

/// A courtroom and its operating parameters. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    /// Seats. Informational only.
    pub capacity: u32,
    pub opens: Minute,
    pub closes: Minute,
    pub slot_minutes: Minute,
    pub overlap: OverlapPolicy,
}

impl Court {
    /// Every slot that fits entirely inside the operating window, ascending.
    pub fn slot_grid(&self) -> Vec<Span> {
        let mut slots = Vec::new();
        if self.slot_minutes <= 0 {
            return slots;
        }
        let mut start = self.opens;
        while start + self.slot_minutes <= self.closes {
            slots.push(Span::new(start, start + self.slot_minutes));
            start += self.slot_minutes;
        }
        slots
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Open,
    InProgress,
    Closed,
}

impl CaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaseStatus::Closed)
    }

    /// Closed is terminal; InProgress never returns to Open.
    pub fn can_transition_to(self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (a, b) if a == b => true,
            (Open, InProgress) | (Open, Closed) | (InProgress, Closed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::InProgress => "in_progress",
            CaseStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "open" => Some(CaseStatus::Open),
            "in_progress" | "inprogress" => Some(CaseStatus::InProgress),
            "closed" => Some(CaseStatus::Closed),
            _ => None,
        }
    }
}

/// What the scheduling core knows about a case: its status and judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseState {
    pub id: Ulid,
    pub status: CaseStatus,
    pub judge: Option<String>,
}

impl CaseState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            status: CaseStatus::Open,
            judge: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hearing {
    pub id: Ulid,
    pub case_id: Ulid,
    pub court_id: Ulid,
    pub date: NaiveDate,
    /// `span.start` is the hearing time; the length is the court's slot size.
    pub span: Span,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Hearing {
    pub fn time(&self) -> Minute {
        self.span.start
    }

    pub fn day(&self) -> DayKey {
        DayKey::new(self.court_id, self.date)
    }
}

/// Partition key of the hearing store: one ledger per court per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey {
    pub court_id: Ulid,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(court_id: Ulid, date: NaiveDate) -> Self {
        Self { court_id, date }
    }
}

/// All hearings booked in one court on one day, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct DayState {
    pub key: DayKey,
    pub hearings: Vec<Hearing>,
}

impl DayState {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            hearings: Vec::new(),
        }
    }

    /// Insert hearing maintaining sort order by span.start.
    pub fn insert_hearing(&mut self, hearing: Hearing) {
        let pos = self
            .hearings
            .binary_search_by_key(&hearing.span.start, |h| h.span.start)
            .unwrap_or_else(|e| e);
        self.hearings.insert(pos, hearing);
    }

    pub fn remove_hearing(&mut self, id: Ulid) -> Option<Hearing> {
        let pos = self.hearings.iter().position(|h| h.id == id)?;
        Some(self.hearings.remove(pos))
    }

    pub fn get(&self, id: &Ulid) -> Option<&Hearing> {
        self.hearings.iter().find(|h| h.id == *id)
    }

    /// Hearings whose window collides with `query` under `policy`.
    /// Binary search skips everything starting after `query.end`.
    pub fn colliding(&self, query: &Span, policy: OverlapPolicy) -> impl Iterator<Item = &Hearing> {
        let right_bound = self
            .hearings
            .partition_point(|h| h.span.start <= query.end);
        self.hearings[..right_bound]
            .iter()
            .filter(move |h| policy.collides(&h.span, query))
    }
}

/// The event types. This is the WAL record format and the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CourtCreated {
        court: Court,
    },
    CaseOpened {
        id: Ulid,
    },
    CaseStatusChanged {
        id: Ulid,
        status: CaseStatus,
    },
    JudgeAssigned {
        id: Ulid,
        judge: String,
    },
    HearingScheduled {
        hearing: Hearing,
    },
    HearingUpdated {
        hearing: Hearing,
        from: DayKey,
    },
    HearingDeleted {
        id: Ulid,
        case_id: Ulid,
        day: DayKey,
    },
}

impl Event {
    /// JSON rendering handed to the notification dispatcher.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn court(opens: Minute, closes: Minute, slot: Minute) -> Court {
        Court {
            id: Ulid::new(),
            name: "Courtroom 1".into(),
            location: None,
            capacity: 40,
            opens,
            closes,
            slot_minutes: slot,
            overlap: OverlapPolicy::Strict,
        }
    }

    fn hearing(start: Minute, end: Minute) -> Hearing {
        Hearing {
            id: Ulid::new(),
            case_id: Ulid::new(),
            court_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            span: Span::new(start, end),
            notes: None,
            created_at: 0,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(540, 600);
        let b = Span::new(570, 630);
        let c = Span::new(600, 660);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back
        assert!(a.touches(&c));
        assert!(!a.touches(&Span::new(601, 660)));
    }

    #[test]
    fn overlap_policy_boundary() {
        let a = Span::new(540, 600);
        let b = Span::new(600, 660);
        assert!(!OverlapPolicy::Strict.collides(&a, &b));
        assert!(OverlapPolicy::Inclusive.collides(&a, &b));
        assert!(OverlapPolicy::Strict.collides(&a, &a));
    }

    #[test]
    fn overlap_policy_parse() {
        assert_eq!(OverlapPolicy::parse("Strict"), Some(OverlapPolicy::Strict));
        assert_eq!(OverlapPolicy::parse(" inclusive "), Some(OverlapPolicy::Inclusive));
        assert_eq!(OverlapPolicy::parse("loose"), None);
        assert_eq!(OverlapPolicy::default(), OverlapPolicy::Strict);
    }

    #[test]
    fn time_of_day_parse_and_format() {
        assert_eq!(parse_time_of_day("09:00"), Some(540));
        assert_eq!(parse_time_of_day("13:45:00"), Some(825));
        assert_eq!(parse_time_of_day("24:00"), Some(1440));
        assert_eq!(parse_time_of_day("9am"), None);
        assert_eq!(parse_time_of_day("10:00:30"), None);
        assert_eq!(format_time_of_day(540), "09:00");
        assert_eq!(format_time_of_day(1440), "24:00");
    }

    #[test]
    fn date_parse() {
        assert_eq!(
            parse_date("2026-03-02"),
            NaiveDate::from_ymd_opt(2026, 3, 2)
        );
        assert_eq!(parse_date("2026-02-30"), None);
        assert_eq!(parse_date("03/02/2026"), None);
    }

    #[test]
    fn slot_grid_exact_fit() {
        let c = court(540, 720, 60);
        assert_eq!(
            c.slot_grid(),
            vec![Span::new(540, 600), Span::new(600, 660), Span::new(660, 720)]
        );
    }

    #[test]
    fn slot_grid_drops_partial_trailing_slot() {
        // 09:00–11:30 with 60-minute slots: 11:00 would overrun closing time.
        let c = court(540, 690, 60);
        assert_eq!(c.slot_grid(), vec![Span::new(540, 600), Span::new(600, 660)]);
    }

    #[test]
    fn slot_grid_single_slot_window() {
        let c = court(540, 570, 30);
        assert_eq!(c.slot_grid(), vec![Span::new(540, 570)]);
    }

    #[test]
    fn case_status_transitions() {
        use CaseStatus::*;
        assert!(Open.can_transition_to(InProgress));
        assert!(Open.can_transition_to(Closed));
        assert!(InProgress.can_transition_to(Closed));
        assert!(Open.can_transition_to(Open));
        assert!(!InProgress.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Closed));
        assert!(Closed.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn case_status_parse() {
        assert_eq!(CaseStatus::parse("Closed"), Some(CaseStatus::Closed));
        assert_eq!(CaseStatus::parse("in progress"), Some(CaseStatus::InProgress));
        assert_eq!(CaseStatus::parse("InProgress"), Some(CaseStatus::InProgress));
        assert_eq!(CaseStatus::parse("archived"), None);
    }

    #[test]
    fn day_state_keeps_hearings_sorted() {
        let mut day = DayState::new(DayKey::new(Ulid::new(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        day.insert_hearing(hearing(660, 720));
        day.insert_hearing(hearing(540, 600));
        day.insert_hearing(hearing(600, 660));
        let starts: Vec<_> = day.hearings.iter().map(|h| h.span.start).collect();
        assert_eq!(starts, vec![540, 600, 660]);
    }

    #[test]
    fn day_state_remove() {
        let mut day = DayState::new(DayKey::new(Ulid::new(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        let h = hearing(540, 600);
        let id = h.id;
        day.insert_hearing(h);
        assert!(day.remove_hearing(Ulid::new()).is_none());
        assert_eq!(day.remove_hearing(id).map(|h| h.id), Some(id));
        assert!(day.hearings.is_empty());
    }

    #[test]
    fn colliding_respects_policy() {
        let mut day = DayState::new(DayKey::new(Ulid::new(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        day.insert_hearing(hearing(600, 660));

        let before = Span::new(540, 600);
        let after = Span::new(660, 720);
        let same = Span::new(600, 660);

        assert_eq!(day.colliding(&before, OverlapPolicy::Strict).count(), 0);
        assert_eq!(day.colliding(&after, OverlapPolicy::Strict).count(), 0);
        assert_eq!(day.colliding(&same, OverlapPolicy::Strict).count(), 1);

        assert_eq!(day.colliding(&before, OverlapPolicy::Inclusive).count(), 1);
        assert_eq!(day.colliding(&after, OverlapPolicy::Inclusive).count(), 1);
    }

    #[test]
    fn colliding_skips_distant_hearings() {
        let mut day = DayState::new(DayKey::new(Ulid::new(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        day.insert_hearing(hearing(480, 510));
        day.insert_hearing(hearing(900, 960));
        let query = Span::new(600, 660);
        assert_eq!(day.colliding(&query, OverlapPolicy::Inclusive).count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::HearingScheduled {
            hearing: hearing(540, 600),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn event_payload_is_json() {
        let id = Ulid::new();
        let payload = Event::CaseStatusChanged {
            id,
            status: CaseStatus::Closed,
        }
        .payload()
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["CaseStatusChanged"]["id"], id.to_string());
        assert_eq!(v["CaseStatusChanged"]["status"], "Closed");
    }
}
