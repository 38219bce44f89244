use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely; `Ok(false)` means the log ended before it was full.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Largest payload a record may claim; anything bigger is a corrupt length.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Decode the next record and its size on disk. `Ok(None)` on clean end,
/// truncation, or corruption: anything after the first bad record is discarded.
fn decode_next(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let record_len = (4 + len + 4) as u64;
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, record_len)))
}

/// Append-only Write-Ahead Log holding catalog and ledger events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing; `flush_sync` commits the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as exactly `events`: write a temp file, fsync it,
    /// rename it over the log, and reopen for appending.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay the WAL from disk, returning all valid events.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::read_valid(path)?.0)
    }

    /// Replay, then cut any torn or corrupt tail off the file so the next
    /// append lands directly after the last good record. Must run before
    /// `open` on startup.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = Self::read_valid(path)?;
        let file_len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        if file_len > valid_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            warn!(
                "WAL {}: discarded {} byte(s) of torn or corrupt tail after {} event(s)",
                path.display(),
                file_len - valid_len,
                events.len()
            );
        }
        Ok(events)
    }

    /// Valid events and the byte length they occupy from the start of the file.
    fn read_valid(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0;
        while let Some((event, record_len)) = decode_next(&mut reader)? {
            events.push(event);
            valid_len += record_len;
        }
        Ok((events, valid_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceKind, Span};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("gamebook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn system_type() -> Event {
        Event::SystemTypeCreated {
            id: Ulid::new(),
            name: "Switch".into(),
        }
    }

    fn booked() -> Event {
        Event::ReservationCreated {
            id: Ulid::new(),
            user_id: "user-1".into(),
            span: Span::new(1000, 2000),
            game_system_id: Ulid::new(),
            game_id: Ulid::new(),
            created_at: 500,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![system_type(), booked()];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = system_type();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap(); // length says 9, only 2 bytes follow
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn recover_cuts_torn_tail_before_new_appends() {
        let path = tmp_path("recover_torn_tail.wal");
        let first = system_type();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[200u8, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        assert_eq!(Wal::recover(&path).unwrap(), vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);

        let second = booked();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn recover_leaves_clean_log_alone() {
        let path = tmp_path("recover_clean.wal");
        let events = vec![system_type(), booked()];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(Wal::recover(&path).unwrap(), events);
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        assert!(Wal::recover(&tmp_path("recover_missing.wal")).unwrap().is_empty());
    }

    #[test]
    fn replay_rejects_oversized_length() {
        let path = tmp_path("oversized_len.wal");
        let good = system_type();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let good = system_type();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&booked()).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let rid = Ulid::new();
        let created = Event::ResourceCreated {
            id: rid,
            kind: ResourceKind::System,
            name: "Switch-1".into(),
            system_type_id: Ulid::new(),
        };
        let reservation = booked();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created).unwrap();
            for _ in 0..10 {
                wal.append(&booked()).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();

            wal.compact(std::slice::from_ref(&created)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

            wal.append(&reservation).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![created, reservation]);
    }

    #[test]
    fn buffered_appends_are_counted() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|_| booked()).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
