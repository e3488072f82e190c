mod availability;
mod conflict;
mod error;
mod gate;
mod mutations;
mod queries;

pub use availability::free_slots;
pub use error::{ConflictInfo, EngineError};
pub use gate::{ensure_mutable, CaseGuard};
pub use mutations::{HearingChange, HearingRequest};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;
pub type SharedCaseState = Arc<RwLock<CaseState>>;

/// Where a hearing is booked and which case owns it. The owner never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HearingLocation {
    pub day: DayKey,
    pub case_id: Ulid,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    /// Court directory. Courts are immutable once created.
    pub courts: DashMap<Ulid, Court>,
    /// Case status mirror consulted by the gate.
    pub cases: DashMap<Ulid, SharedCaseState>,
    /// The hearing store, one ledger per court per day.
    pub days: DashMap<DayKey, SharedDayState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every mutation from validation through apply; compaction
    /// takes it exclusively so its snapshot matches what the WAL holds.
    pub(super) commit_lock: RwLock<()>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: hearing id → ledger + owning case
    pub(super) hearing_index: DashMap<Ulid, HearingLocation>,
}

/// Apply a hearing event to one day ledger (caller holds the lock).
/// A move touches two ledgers; the caller applies it to each.
fn apply_to_day(day: &mut DayState, event: &Event, index: &DashMap<Ulid, HearingLocation>) {
    match event {
        Event::HearingScheduled { hearing } => {
            day.insert_hearing(hearing.clone());
            index.insert(
                hearing.id,
                HearingLocation {
                    day: day.key,
                    case_id: hearing.case_id,
                },
            );
        }
        Event::HearingUpdated { hearing, from } => {
            if day.key == *from {
                day.remove_hearing(hearing.id);
            }
            if day.key == hearing.day() {
                day.remove_hearing(hearing.id);
                day.insert_hearing(hearing.clone());
                index.insert(
                    hearing.id,
                    HearingLocation {
                        day: day.key,
                        case_id: hearing.case_id,
                    },
                );
            }
        }
        Event::HearingDeleted { id, .. } => {
            day.remove_hearing(*id);
            index.remove(id);
        }
        Event::CourtCreated { .. }
        | Event::CaseOpened { .. }
        | Event::CaseStatusChanged { .. }
        | Event::JudgeAssigned { .. } => {}
    }
}

/// Apply a case event to the mirror (caller holds the write lock).
fn apply_to_case(case: &mut CaseState, event: &Event) {
    match event {
        Event::CaseStatusChanged { status, .. } => case.status = *status,
        Event::JudgeAssigned { judge, .. } => {
            case.judge = Some(judge.clone());
            if case.status == CaseStatus::Open {
                case.status = CaseStatus::InProgress;
            }
        }
        _ => {}
    }
}

/// Day ledgers an event touches, source first.
fn event_days(event: &Event) -> Vec<DayKey> {
    match event {
        Event::HearingScheduled { hearing } => vec![hearing.day()],
        Event::HearingUpdated { hearing, from } => {
            let to = hearing.day();
            if *from == to { vec![to] } else { vec![*from, to] }
        }
        Event::HearingDeleted { day, .. } => vec![*day],
        _ => Vec::new(),
    }
}

/// Notification channels for an event: courts for hearing events, the case otherwise.
fn event_channels(event: &Event) -> Vec<Ulid> {
    match event {
        Event::CourtCreated { court } => vec![court.id],
        Event::CaseOpened { id }
        | Event::CaseStatusChanged { id, .. }
        | Event::JudgeAssigned { id, .. } => vec![*id],
        other => {
            let mut courts: Vec<Ulid> = event_days(other).iter().map(|d| d.court_id).collect();
            courts.dedup();
            courts
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            courts: DashMap::new(),
            cases: DashMap::new(),
            days: DashMap::new(),
            wal_tx,
            commit_lock: RwLock::new(()),
            notify,
            hearing_index: DashMap::new(),
        };

        // Replay: we are the sole owner of these Arcs, so try_write
        // always succeeds instantly. Never use blocking_write here because this
        // may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::CourtCreated { court } => {
                    engine.courts.insert(court.id, court.clone());
                }
                Event::CaseOpened { id } => {
                    engine
                        .cases
                        .insert(*id, Arc::new(RwLock::new(CaseState::new(*id))));
                }
                Event::CaseStatusChanged { id, .. } | Event::JudgeAssigned { id, .. } => {
                    if let Some(entry) = engine.cases.get(id) {
                        let case = entry.value().clone();
                        let mut guard = case.try_write().expect("replay: uncontended write");
                        apply_to_case(&mut guard, event);
                    }
                }
                other => {
                    for key in event_days(other) {
                        let day = engine.day_state(key);
                        let mut guard = day.try_write().expect("replay: uncontended write");
                        apply_to_day(&mut guard, other, &engine.hearing_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    fn notify_event(&self, event: &Event) {
        for channel in event_channels(event) {
            self.notify.send(channel, event);
        }
    }

    /// Get or lazily create the ledger for a court/day.
    pub(super) fn day_state(&self, key: DayKey) -> SharedDayState {
        self.days
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(key))))
            .value()
            .clone()
    }

    /// Existing ledger only; reads never create one.
    pub(super) fn existing_day(&self, key: &DayKey) -> Option<SharedDayState> {
        self.days.get(key).map(|e| e.value().clone())
    }

    pub fn get_case_state(&self, id: &Ulid) -> Option<SharedCaseState> {
        self.cases.get(id).map(|e| e.value().clone())
    }

    pub fn get_hearing_location(&self, hearing_id: &Ulid) -> Option<HearingLocation> {
        self.hearing_index.get(hearing_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify for an event confined to one ledger.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event, &self.hearing_index);
        self.notify_event(event);
        Ok(())
    }

    /// Same as `persist_and_apply` for a hearing moving between two ledgers.
    pub(super) async fn persist_and_apply_move(
        &self,
        from: &mut DayState,
        to: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(from, event, &self.hearing_index);
        apply_to_day(to, event, &self.hearing_index);
        self.notify_event(event);
        Ok(())
    }

    pub(super) async fn persist_and_apply_case(
        &self,
        case: &mut CaseState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_case(case, event);
        self.notify_event(event);
        Ok(())
    }
}
