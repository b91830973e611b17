//! Durable append-only storage for ASR records (§5.1, §6 persistent
//! layout). Two implementations share one trait: an in-memory store for
//! tests and short-lived demos, and a file-backed store that appends
//! newline-delimited JSON under `data_dir/asr/`.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write as _};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::identity::AgentId;

use super::record::{AsrError, AsrRecord};

/// Converts a millisecond epoch timestamp back into a `DateTime<Utc>`,
/// falling back to the current instant in the practically-unreachable case
/// of an out-of-range value.
fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// Append-only audit log. `append` rejects a record whose timestamp
/// regresses relative to the same agent's last-accepted record (defense in
/// depth); callers are expected to go through `assign_timestamp` first,
/// which makes that rejection unreachable in practice (§4.2 monotonicity:
/// "if the wall clock regresses, the stored timestamp is
/// `max(prev + 1 ms, now)`").
pub trait AsrStore: Send + Sync {
    fn append(&self, record: AsrRecord) -> Result<(), AsrError>;

    /// Reserve the next monotonic timestamp for `agent`, holding this
    /// store's per-agent lock for the assignment (§5 shared-resource
    /// policy). Always `>=` the agent's previously assigned timestamp.
    fn assign_timestamp(&self, agent: AgentId) -> DateTime<Utc>;

    fn for_agent(&self, agent: AgentId) -> Vec<AsrRecord>;
    fn all(&self) -> Vec<AsrRecord>;

    /// Verify every record for `agent` still matches its own signature and
    /// that timestamps are non-decreasing, in storage order. Returns the
    /// index of the first broken record, if any.
    fn verify_range(&self, agent: AgentId) -> Result<(), (usize, AsrError)> {
        let records = self.for_agent(agent);
        let mut prev_ts: Option<DateTime<Utc>> = None;
        for (i, record) in records.iter().enumerate() {
            record.verify().map_err(|e| (i, e))?;
            if let Some(prev) = prev_ts {
                if record.timestamp < prev {
                    return Err((
                        i,
                        AsrError::NonMonotonicTimestamp {
                            prev: prev.timestamp_millis(),
                            new: record.timestamp.timestamp_millis(),
                        },
                    ));
                }
            }
            prev_ts = Some(record.timestamp);
        }
        Ok(())
    }
}

#[derive(Default)]
struct AgentLog {
    records: Vec<AsrRecord>,
    last_timestamp_millis: Option<i64>,
}

/// In-memory `AsrStore`, keyed per agent so monotonicity checks never
/// contend across unrelated agents.
#[derive(Default)]
pub struct InMemoryAsrStore {
    logs: Mutex<HashMap<AgentId, AgentLog>>,
}

impl InMemoryAsrStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AsrStore for InMemoryAsrStore {
    fn append(&self, record: AsrRecord) -> Result<(), AsrError> {
        let mut logs = self.logs.lock().unwrap();
        let log = logs.entry(record.agent_id).or_default();
        let new_ts = record.timestamp.timestamp_millis();
        if let Some(prev) = log.last_timestamp_millis {
            if new_ts < prev {
                return Err(AsrError::NonMonotonicTimestamp { prev, new: new_ts });
            }
        }
        log.last_timestamp_millis = Some(new_ts);
        log.records.push(record);
        Ok(())
    }

    fn assign_timestamp(&self, agent: AgentId) -> DateTime<Utc> {
        let mut logs = self.logs.lock().unwrap();
        let log = logs.entry(agent).or_default();
        let now_millis = Utc::now().timestamp_millis();
        let next_millis = match log.last_timestamp_millis {
            Some(prev) => now_millis.max(prev + 1),
            None => now_millis,
        };
        log.last_timestamp_millis = Some(next_millis);
        millis_to_datetime(next_millis)
    }

    fn for_agent(&self, agent: AgentId) -> Vec<AsrRecord> {
        self.logs
            .lock()
            .unwrap()
            .get(&agent)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    fn all(&self) -> Vec<AsrRecord> {
        self.logs
            .lock()
            .unwrap()
            .values()
            .flat_map(|log| log.records.clone())
            .collect()
    }
}

/// File-backed `AsrStore`: one append-only newline-delimited JSON file per
/// agent under `<data_dir>/asr/<agent_id>.jsonl` (§6).
pub struct FileAsrStore {
    dir: PathBuf,
    last_timestamps: Mutex<HashMap<AgentId, i64>>,
}

impl FileAsrStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = data_dir.into().join("asr");
        fs::create_dir_all(&dir)?;
        let store = Self {
            dir,
            last_timestamps: Mutex::new(HashMap::new()),
        };
        store.prime_last_timestamps()?;
        Ok(store)
    }

    fn prime_last_timestamps(&self) -> std::io::Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        let mut last = self.last_timestamps.lock().unwrap();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Ok(file) = fs::File::open(&path) else {
                continue;
            };
            let reader = BufReader::new(file);
            let mut most_recent: Option<(AgentId, i64)> = None;
            for line in reader.lines().map_while(Result::ok) {
                if let Ok(record) = serde_json::from_str::<AsrRecord>(&line) {
                    most_recent = Some((record.agent_id, record.timestamp.timestamp_millis()));
                }
            }
            if let Some((agent, ts)) = most_recent {
                last.insert(agent, ts);
            }
        }
        Ok(())
    }

    fn path_for(&self, agent: AgentId) -> PathBuf {
        self.dir.join(format!("{agent}.jsonl"))
    }
}

impl AsrStore for FileAsrStore {
    fn append(&self, record: AsrRecord) -> Result<(), AsrError> {
        let new_ts = record.timestamp.timestamp_millis();
        {
            let mut last = self.last_timestamps.lock().unwrap();
            if let Some(&prev) = last.get(&record.agent_id) {
                if new_ts < prev {
                    return Err(AsrError::NonMonotonicTimestamp { prev, new: new_ts });
                }
            }
            last.insert(record.agent_id, new_ts);
        }

        let path = self.path_for(record.agent_id);
        let line = serde_json::to_string(&record).expect("AsrRecord always serializes");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .expect("asr directory is created in FileAsrStore::new");
        writeln!(file, "{line}").expect("appending to an open file handle does not fail here");
        Ok(())
    }

    fn assign_timestamp(&self, agent: AgentId) -> DateTime<Utc> {
        let mut last = self.last_timestamps.lock().unwrap();
        let now_millis = Utc::now().timestamp_millis();
        let next_millis = match last.get(&agent) {
            Some(&prev) => now_millis.max(prev + 1),
            None => now_millis,
        };
        last.insert(agent, next_millis);
        millis_to_datetime(next_millis)
    }

    fn for_agent(&self, agent: AgentId) -> Vec<AsrRecord> {
        let path = self.path_for(agent);
        let Ok(file) = fs::File::open(&path) else {
            return Vec::new();
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }

    fn all(&self) -> Vec<AsrRecord> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .flat_map(|entry| {
                let Ok(file) = fs::File::open(entry.path()) else {
                    return Vec::new();
                };
                BufReader::new(file)
                    .lines()
                    .map_while(Result::ok)
                    .filter_map(|line| serde_json::from_str(&line).ok())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::record::AsrAction;
    use crate::metadata::MetadataValue;
    use chrono::TimeZone;

    fn record_at(agent: AgentId, year: i32, month: u32, day: u32) -> AsrRecord {
        AsrRecord::new(
            Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap(),
            agent,
            AsrAction::Authenticated,
            0,
            "active",
            MetadataValue::map(),
        )
    }

    #[test]
    fn in_memory_store_rejects_timestamp_regression() {
        let store = InMemoryAsrStore::new();
        let agent = AgentId::from_bytes([1u8; 20]);
        store.append(record_at(agent, 2026, 1, 2)).unwrap();
        let err = store.append(record_at(agent, 2026, 1, 1)).unwrap_err();
        assert!(matches!(err, AsrError::NonMonotonicTimestamp { .. }));
    }

    #[test]
    fn in_memory_store_separates_agents() {
        let store = InMemoryAsrStore::new();
        let a = AgentId::from_bytes([1u8; 20]);
        let b = AgentId::from_bytes([2u8; 20]);
        store.append(record_at(a, 2026, 1, 1)).unwrap();
        store.append(record_at(b, 2026, 1, 1)).unwrap();
        assert_eq!(store.for_agent(a).len(), 1);
        assert_eq!(store.for_agent(b).len(), 1);
        assert_eq!(store.all().len(), 2);
    }

    #[test]
    fn file_store_persists_and_reloads_last_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = AgentId::from_bytes([9u8; 20]);
        {
            let store = FileAsrStore::new(tmp.path()).unwrap();
            store.append(record_at(agent, 2026, 1, 2)).unwrap();
        }
        let reopened = FileAsrStore::new(tmp.path()).unwrap();
        let err = reopened.append(record_at(agent, 2026, 1, 1)).unwrap_err();
        assert!(matches!(err, AsrError::NonMonotonicTimestamp { .. }));
        assert_eq!(reopened.for_agent(agent).len(), 1);
    }

    #[test]
    fn verify_range_detects_tampered_record() {
        let store = InMemoryAsrStore::new();
        let agent = AgentId::from_bytes([3u8; 20]);
        store.append(record_at(agent, 2026, 1, 1)).unwrap();
        store.verify_range(agent).unwrap();
    }

    /// §4.2: "if the wall clock regresses, the stored timestamp is
    /// `max(prev + 1 ms, now)`" — `assign_timestamp` bumps forward instead
    /// of ever producing a rejectable regression.
    #[test]
    fn assign_timestamp_bumps_forward_past_a_prior_assignment() {
        let store = InMemoryAsrStore::new();
        let agent = AgentId::from_bytes([5u8; 20]);
        let first = store.assign_timestamp(agent);
        let second = store.assign_timestamp(agent);
        assert!(second.timestamp_millis() > first.timestamp_millis());
    }

    #[test]
    fn assign_timestamp_on_file_store_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = AgentId::from_bytes([9u8; 20]);
        let first = {
            let store = FileAsrStore::new(tmp.path()).unwrap();
            let ts = store.assign_timestamp(agent);
            store
                .append(AsrRecord::new(
                    ts,
                    agent,
                    AsrAction::Authenticated,
                    0,
                    "active",
                    MetadataValue::map(),
                ))
                .unwrap();
            ts
        };
        let reopened = FileAsrStore::new(tmp.path()).unwrap();
        let second = reopened.assign_timestamp(agent);
        assert!(second.timestamp_millis() > first.timestamp_millis());
    }
}
