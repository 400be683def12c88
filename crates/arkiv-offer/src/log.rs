use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use arkiv_types::{Error, OfferLogAction, OfferLogEntry, Order, Result};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct LogWriter {
    writer: BufWriter<File>,
}

/// A container's append-only offer log.
///
/// Entries are serialized with bincode and framed with a length prefix and a
/// CRC32 checksum:
///
/// ```text
/// [4 bytes: entry length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized OfferLogEntry)]
/// ```
///
/// Sequence numbers are allocated under the append mutex, so they are
/// strictly increasing and gapless within the container and are never
/// reused. A torn tail entry (crash mid-write) is detected by the CRC and
/// ends replay with a warning.
pub struct OfferLog {
    container: String,
    path: PathBuf,
    writer: Mutex<LogWriter>,
    last_sequence: AtomicU64,
}

impl OfferLog {
    /// Open (or create) the offer log of a container, replaying it to find
    /// the last allocated sequence number. A torn tail left by a crash is
    /// truncated away so new appends start on an entry boundary.
    pub fn open(container: &str, path: &Path) -> Result<Self> {
        let (entries, valid_len) = replay(path)?;

        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() > valid_len {
                warn!(?path, file_len = meta.len(), valid_len, "truncating torn offer log tail");
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let last_sequence = entries.last().map(|entry| entry.sequence).unwrap_or(0);

        Ok(Self {
            container: container.to_string(),
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
            }),
            last_sequence: AtomicU64::new(last_sequence),
        })
    }

    /// Last allocated sequence number (0 if the log is empty).
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Append one entry. Returns the entry as written.
    pub fn append(&self, action: OfferLogAction, object_id: &str) -> Result<OfferLogEntry> {
        let mut entries = self.append_batch(action, std::slice::from_ref(&object_id))?;
        Ok(entries.remove(0))
    }

    /// Append one entry per object id, with consecutive sequence numbers,
    /// under a single lock hold and a single flush.
    pub fn append_batch<S: AsRef<str>>(
        &self,
        action: OfferLogAction,
        object_ids: &[S],
    ) -> Result<Vec<OfferLogEntry>> {
        if object_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut w = self.writer.lock().expect("offer log mutex poisoned");
        let mut entries = Vec::with_capacity(object_ids.len());

        for object_id in object_ids {
            let sequence = self.last_sequence.load(Ordering::SeqCst) + 1;
            let entry =
                OfferLogEntry::new(&self.container, object_id.as_ref(), action, sequence);

            let payload = bincode::serialize(&entry)
                .map_err(|e| Error::database(format!("offer log encode: {e}")))?;
            let crc = crc32fast::hash(&payload);

            w.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
            w.writer.write_all(&crc.to_le_bytes())?;
            w.writer.write_all(&payload)?;

            self.last_sequence.store(sequence, Ordering::SeqCst);
            entries.push(entry);
        }

        w.writer.flush()?;
        w.writer.get_ref().sync_all()?;

        debug!(
            container = %self.container,
            count = entries.len(),
            last_sequence = entries.last().map(|e| e.sequence),
            "offer log append"
        );
        Ok(entries)
    }

    /// List entries relative to `offset`, strictly greater (ascending) or
    /// strictly smaller (descending), bounded by `limit`.
    pub fn read_range(&self, offset: u64, limit: usize, order: Order) -> Result<Vec<OfferLogEntry>> {
        // Flush buffered appends so readers see everything committed.
        {
            let mut w = self.writer.lock().expect("offer log mutex poisoned");
            w.writer.flush()?;
        }
        let (entries, _) = replay(&self.path)?;
        let selected = match order {
            Order::Asc => entries
                .into_iter()
                .filter(|e| e.sequence > offset)
                .take(limit)
                .collect(),
            Order::Desc => {
                let mut matching: Vec<OfferLogEntry> = entries
                    .into_iter()
                    .filter(|e| e.sequence < offset)
                    .collect();
                matching.reverse();
                matching.truncate(limit);
                matching
            }
        };
        Ok(selected)
    }
}

/// Read every intact entry of a log file, front to back. Also returns the
/// byte length of the valid prefix (everything before the first torn or
/// undecodable entry).
fn replay(path: &Path) -> Result<(Vec<OfferLogEntry>, u64)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(?path, offset, length, "invalid offer log entry length, stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(?path, offset, "truncated offer log entry, stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        if crc32fast::hash(&payload) != expected_crc {
            warn!(?path, offset, "offer log CRC mismatch, stopping replay");
            break;
        }

        match bincode::deserialize::<OfferLogEntry>(&payload) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(?path, offset, error = %e, "undecodable offer log entry, stopping replay");
                break;
            }
        }

        offset += HEADER_SIZE as u64 + length as u64;
    }

    Ok((entries, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log(dir: &tempfile::TempDir) -> OfferLog {
        OfferLog::open("0_unit", &dir.path().join("offer.log")).unwrap()
    }

    #[test]
    fn sequences_are_monotonic_and_gapless() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);

        let e1 = log.append(OfferLogAction::Write, "a.json").unwrap();
        let e2 = log.append(OfferLogAction::Write, "b.json").unwrap();
        let e3 = log.append(OfferLogAction::Delete, "a.json").unwrap();

        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
        assert_eq!(e3.sequence, 3);
        assert_eq!(log.last_sequence(), 3);
    }

    #[test]
    fn batch_append_allocates_consecutive_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);

        log.append(OfferLogAction::Write, "first").unwrap();
        let batch = log
            .append_batch(OfferLogAction::Write, &["x", "y", "z"])
            .unwrap();
        let sequences: Vec<u64> = batch.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
    }

    #[test]
    fn sequence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offer.log");
        {
            let log = OfferLog::open("0_unit", &path).unwrap();
            log.append_batch(OfferLogAction::Write, &["a", "b", "c"])
                .unwrap();
        }
        let log = OfferLog::open("0_unit", &path).unwrap();
        assert_eq!(log.last_sequence(), 3);
        let next = log.append(OfferLogAction::Write, "d").unwrap();
        assert_eq!(next.sequence, 4);
    }

    #[test]
    fn ascending_listing_is_strictly_greater_than_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append_batch(OfferLogAction::Write, &["a", "b", "c", "d", "e"])
            .unwrap();

        let page = log.read_range(2, 2, Order::Asc).unwrap();
        let sequences: Vec<u64> = page.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);

        let rest = log.read_range(4, 10, Order::Asc).unwrap();
        let sequences: Vec<u64> = rest.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![5]);
    }

    #[test]
    fn descending_listing_is_strictly_smaller_than_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append_batch(OfferLogAction::Write, &["a", "b", "c", "d", "e"])
            .unwrap();

        let page = log.read_range(4, 2, Order::Desc).unwrap();
        let sequences: Vec<u64> = page.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 2]);
    }

    #[test]
    fn offset_zero_ascending_lists_everything() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append_batch(OfferLogAction::Write, &["a", "b"]).unwrap();

        let all = log.read_range(0, 100, Order::Asc).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].object_id, "a");
        assert_eq!(all[1].object_id, "b");
    }

    #[test]
    fn torn_tail_is_skipped_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offer.log");
        {
            let log = OfferLog::open("0_unit", &path).unwrap();
            log.append(OfferLogAction::Write, "intact").unwrap();
            log.append(OfferLogAction::Write, "torn").unwrap();
        }
        // Chop 3 bytes off the tail to simulate a crash mid-write.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let log = OfferLog::open("0_unit", &path).unwrap();
        assert_eq!(log.last_sequence(), 1);
        let entries = log.read_range(0, 10, Order::Asc).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].object_id, "intact");
    }
}
