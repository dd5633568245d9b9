//! Crash-report store.
//!
//! Daemons post a JSON metadata document per crash; reports are kept under
//! `crash/<crash_id>` in a key-value store until pruned.

pub mod error;
pub mod store;

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub use error::CrashError;
pub use store::{KvStore, MemoryStore};

pub const KEY_PREFIX: &str = "crash/";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
pub const MAX_KEEP_DAYS: i64 = 36_500;

/// Age thresholds reported by `stat`, smallest first
pub const STAT_BINS: [i64; 3] = [1, 3, 7];

/// Parse a crash timestamp. A trailing `Z` is accepted and ignored since
/// timestamps are always UTC.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, CrashError> {
    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), TIMESTAMP_FORMAT).map_err(|e| {
        CrashError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

pub fn format_timestamp(stamp: NaiveDateTime) -> String {
    format!("{}Z", stamp.format("%Y-%m-%d %H:%M:%S%.6f"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgeBin {
    pub age_days: i64,
    pub crash_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashStats {
    pub total: usize,
    pub bins: Vec<AgeBin>,
}

impl CrashStats {
    /// Human-readable summary, one block per non-empty bin
    pub fn report(&self) -> String {
        let mut lines = vec![format!("{} crashes recorded", self.total)];
        for bin in &self.bins {
            if bin.crash_ids.is_empty() {
                continue;
            }
            lines.push(format!("{} older than {} days old:", bin.crash_ids.len(), bin.age_days));
            lines.extend(bin.crash_ids.iter().cloned());
        }
        lines.join("\n")
    }
}

struct CrashEntry {
    crash_id: String,
    stamp: Option<NaiveDateTime>,
}

#[derive(Clone)]
pub struct CrashStore {
    store: Arc<dyn KvStore>,
}

impl CrashStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn key(crash_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, crash_id)
    }

    /// Validate and store a crash report, returning its id. Posting an id
    /// that is already stored leaves the first report in place.
    pub fn post(&self, raw: &str) -> Result<String, CrashError> {
        let metadata: Value =
            serde_json::from_str(raw).map_err(|e| CrashError::MalformedMetadata(e.to_string()))?;
        let Value::Object(fields) = &metadata else {
            return Err(CrashError::MalformedMetadata("expected a JSON object".into()));
        };
        let crash_id = match fields.get("crash_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(_) => return Err(CrashError::MalformedMetadata("'crash_id' must be a non-empty string".into())),
            None => return Err(CrashError::MalformedMetadata("missing 'crash_id' field".into())),
        };
        if let Some(stamp) = fields.get("timestamp") {
            let stamp = stamp
                .as_str()
                .ok_or_else(|| CrashError::MalformedMetadata("'timestamp' must be a string".into()))?;
            parse_timestamp(stamp)?;
        }

        let key = Self::key(&crash_id);
        if self.store.get(&key).is_none() {
            self.store.set(&key, raw.to_string());
            tracing::info!("Stored crash report {}", crash_id);
        } else {
            tracing::debug!("Crash report {} already stored, ignoring repost", crash_id);
        }
        Ok(crash_id)
    }

    /// Raw metadata document of one crash
    pub fn info(&self, crash_id: &str) -> Result<String, CrashError> {
        self.store
            .get(&Self::key(crash_id))
            .ok_or_else(|| CrashError::NotFound(crash_id.to_string()))
    }

    pub fn ls(&self) -> Vec<String> {
        self.store
            .scan_prefix(KEY_PREFIX)
            .into_iter()
            .map(|(key, _)| key[KEY_PREFIX.len()..].to_string())
            .collect()
    }

    pub fn rm(&self, crash_id: &str) -> Result<(), CrashError> {
        match self.store.remove(&Self::key(crash_id)) {
            Some(_) => {
                tracing::info!("Removed crash report {}", crash_id);
                Ok(())
            }
            None => Err(CrashError::NotFound(crash_id.to_string())),
        }
    }

    fn entries(&self) -> Result<Vec<CrashEntry>, CrashError> {
        self.store
            .scan_prefix(KEY_PREFIX)
            .into_iter()
            .map(|(key, raw)| {
                let metadata: Value =
                    serde_json::from_str(&raw).map_err(|e| CrashError::MalformedMetadata(e.to_string()))?;
                let crash_id = metadata
                    .get("crash_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| key[KEY_PREFIX.len()..].to_string());
                let stamp = match metadata.get("timestamp").and_then(Value::as_str) {
                    Some(value) => Some(parse_timestamp(value)?),
                    None => None,
                };
                Ok(CrashEntry { crash_id, stamp })
            })
            .collect()
    }

    /// Remove every report at least `keep_days` old, returning removed ids
    pub fn prune(&self, keep_days: i64) -> Result<Vec<String>, CrashError> {
        self.prune_at(keep_days, Utc::now().naive_utc())
    }

    pub fn prune_at(&self, keep_days: i64, now: NaiveDateTime) -> Result<Vec<String>, CrashError> {
        if !(0..=MAX_KEEP_DAYS).contains(&keep_days) {
            return Err(CrashError::InvalidKeep(keep_days));
        }
        let cutoff = now - Duration::days(keep_days);

        let mut removed = Vec::new();
        for entry in self.entries()? {
            let Some(stamp) = entry.stamp else { continue };
            if stamp <= cutoff {
                self.rm(&entry.crash_id)?;
                removed.push(entry.crash_id);
            }
        }
        tracing::info!("Pruned {} crash reports older than {} days", removed.len(), keep_days);
        Ok(removed)
    }

    pub fn stat(&self) -> Result<CrashStats, CrashError> {
        self.stat_at(Utc::now().naive_utc())
    }

    /// Bins are cumulative: a crash eight days old is listed in all three
    pub fn stat_at(&self, now: NaiveDateTime) -> Result<CrashStats, CrashError> {
        let entries = self.entries()?;
        let bins = STAT_BINS
            .iter()
            .map(|&age_days| {
                let limit = now - Duration::days(age_days);
                AgeBin {
                    age_days,
                    crash_ids: entries
                        .iter()
                        .filter(|e| e.stamp.map(|s| s <= limit).unwrap_or(false))
                        .map(|e| e.crash_id.clone())
                        .collect(),
                }
            })
            .collect();
        Ok(CrashStats {
            total: entries.len(),
            bins,
        })
    }

    /// Exercise timestamp parsing and stat binning against a scratch store
    pub fn self_test() -> Result<String, CrashError> {
        let expected = NaiveDate::from_ymd_opt(2018, 6, 22)
            .and_then(|d| d.and_hms_micro_opt(20, 35, 38, 58818))
            .ok_or_else(|| CrashError::SelfTest("reference timestamp out of range".into()))?;
        if parse_timestamp("2018-06-22 20:35:38.058818Z")? != expected {
            return Err(CrashError::SelfTest("parse_timestamp() failed".into()));
        }

        let scratch = CrashStore::in_memory();
        let now = Utc::now().naive_utc();
        let uuid = "d5775432-0742-44a3-a435-45095e32e6b1";
        for days in [0, 1, 3, 4, 8] {
            let timestamp = format_timestamp(now - Duration::days(days));
            let crash_id = format!("{}_{}", timestamp, uuid);
            let metadata = serde_json::json!({ "crash_id": crash_id, "timestamp": timestamp });
            scratch.post(&metadata.to_string())?;
        }

        let report = scratch.stat_at(now)?.report();
        let expected_lines = [
            "5 crashes recorded",
            "4 older than 1 days old:",
            "3 older than 3 days old:",
            "1 older than 7 days old:",
        ];
        if let Some(missing) = expected_lines.iter().find(|line| !report.contains(*line)) {
            return Err(CrashError::SelfTest(format!("missing '{}' in stat report:\n{}", missing, report)));
        }
        Ok("self-test succeeded".to_string())
    }
}
