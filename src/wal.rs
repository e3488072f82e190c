use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Upper bound on one encoded event. A larger length prefix can only come
/// from a corrupt file, so replay stops there instead of allocating it.
const MAX_ENTRY_BYTES: usize = 1 << 20;

/// Write one record: `[u32 len][bincode payload][u32 crc32 of payload]`, little endian.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf`, or report a clean end of input. A short read is a torn tail.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

enum Record {
    /// A decoded event and the bytes its record occupies on disk.
    Event(Event, u64),
    /// End of the usable log: clean EOF, torn tail or a corrupt entry.
    End,
}

fn read_record(reader: &mut impl Read, path: &Path, seen: usize) -> io::Result<Record> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(Record::End);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_ENTRY_BYTES {
        warn!("WAL {}: entry length {len} exceeds limit, stopping replay", path.display());
        return Ok(Record::End);
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(Record::End);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        warn!("WAL {}: checksum mismatch after {seen} events, stopping replay", path.display());
        return Ok(Record::End);
    }

    Ok(match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Record::Event(event, (len + 8) as u64),
        Err(e) => {
            warn!("WAL {}: undecodable entry after {seen} events ({e}), stopping replay", path.display());
            Record::End
        }
    })
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only log of scheduling events, one file per tenant.
///
/// Every committed court, case and hearing change is one record. Replay
/// keeps the longest valid prefix, so a crash mid-append loses only the
/// unacknowledged tail.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered records and fsync: the group-commit point.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// First compaction phase: write the snapshot next to the live log.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Second phase: atomically replace the log with the snapshot.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every valid event in the log, oldest first, plus the byte length of
    /// that valid prefix. A missing file is an empty log.
    pub fn replay_with_offset(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid = 0u64;
        while let Record::Event(event, size) = read_record(&mut reader, path, events.len())? {
            events.push(event);
            valid += size;
        }
        Ok((events, valid))
    }

    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::replay_with_offset(path)?.0)
    }

    /// Replay, then cut any torn or corrupt tail so later appends land
    /// directly after the last valid record.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid) = Self::replay_with_offset(path)?;
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        if len > valid {
            warn!(
                "WAL {}: truncating {} trailing bytes after {} events",
                path.display(),
                len - valid,
                events.len()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("courtcal_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn court() -> Court {
        Court {
            id: Ulid::new(),
            name: "Courtroom 2".into(),
            location: None,
            capacity: 25,
            opens: 540,
            closes: 1020,
            slot_minutes: 60,
            overlap: OverlapPolicy::Strict,
        }
    }

    fn hearing(court_id: Ulid, case_id: Ulid, start: Minute) -> Hearing {
        Hearing {
            id: Ulid::new(),
            case_id,
            court_id,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            span: Span::new(start, start + 60),
            notes: Some("arraignment".into()),
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let c = court();
        let case_id = Ulid::new();
        let events = vec![
            Event::CourtCreated { court: c.clone() },
            Event::CaseOpened { id: case_id },
            Event::HearingScheduled {
                hearing: hearing(c.id, case_id, 600),
            },
            Event::CaseStatusChanged {
                id: case_id,
                status: CaseStatus::Closed,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = Event::CaseOpened { id: Ulid::new() };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Simulate a crash mid-write of the second entry.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_truncates_torn_tail_before_append() {
        let path = tmp_path("recover_torn.wal");
        let _ = fs::remove_file(&path);

        let first = Event::CaseOpened { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let clean_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        let recovered = Wal::recover(&path).unwrap();
        assert_eq!(recovered, vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);

        let second = Event::CaseStatusChanged {
            id: Ulid::new(),
            status: CaseStatus::Closed,
        };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_leaves_clean_log_alone() {
        let path = tmp_path("recover_clean.wal");
        let _ = fs::remove_file(&path);

        let event = Event::CaseOpened { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        let (_, valid) = Wal::replay_with_offset(&path).unwrap();
        assert_eq!(valid, fs::metadata(&path).unwrap().len());
        assert_eq!(Wal::recover(&path).unwrap(), vec![event]);
        assert_eq!(fs::metadata(&path).unwrap().len(), valid);

        let _ = fs::remove_file(&path);
        assert!(Wal::recover(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = Event::JudgeAssigned {
            id: Ulid::new(),
            judge: "Hon. R. Mensah".into(),
        };

        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_oversized_length_prefix() {
        let path = tmp_path("oversized.wal");
        let _ = fs::remove_file(&path);

        let event = Event::CaseOpened { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[1u8; 16]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        let c = court();
        let case_id = Ulid::new();

        // Book and cancel the same slot over and over.
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Event::CourtCreated { court: c.clone() }).unwrap();
            wal.append(&Event::CaseOpened { id: case_id }).unwrap();
            for _ in 0..10 {
                let h = hearing(c.id, case_id, 600);
                let day = h.day();
                let id = h.id;
                wal.append(&Event::HearingScheduled { hearing: h }).unwrap();
                wal.append(&Event::HearingDeleted { id, case_id, day }).unwrap();
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        assert!(before > 0);

        let compacted_events = vec![
            Event::CourtCreated { court: c },
            Event::CaseOpened { id: case_id },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted_events).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, compacted_events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let c = court();
        let compacted = vec![Event::CourtCreated { court: c.clone() }];
        let case_id = Ulid::new();
        let new_event = Event::CaseOpened { id: case_id };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&compacted[0]).unwrap();
            wal.compact(&compacted).unwrap();
            wal.append(&new_event).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![compacted[0].clone(), new_event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let c = court();
        let case_id = Ulid::new();
        let events: Vec<Event> = (0..5)
            .map(|i| Event::HearingScheduled {
                hearing: hearing(c.id, case_id, 540 + i * 60),
            })
            .collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }
}
