//! Cooldown store — last-fired timestamps per alert key.
//!
//! `CooldownState` is the in-memory map the dispatcher reads and writes
//! during one cycle. A `CooldownBackend` loads it once at cycle start and
//! saves it once at cycle end.
//!
//! Persisted layout:
//!
//! ```json
//! { "version": 1, "last_alerts": { "CREDIT_STRESS_INTRADAY": "2026-10-15T14:30:00Z" } }
//! ```
//!
//! Timestamps are read as RFC 3339, naive ISO-8601 (taken as UTC) or epoch
//! seconds, and always written as RFC 3339. Unknown top-level keys survive a
//! load/save round trip.
//!
//! Every load records a blake3 revision of the bytes read. Saving compares
//! it against what is currently stored and refuses to overwrite a document
//! another writer replaced in the meantime.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::alert::CooldownKey;
use crate::error::StoreError;

/// Document layout version written by this crate.
pub const STATE_VERSION: u32 = 1;

fn current_version() -> u32 {
    STATE_VERSION
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default)]
    last_alerts: BTreeMap<String, Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Last-fired time per cooldown key. A missing key means never fired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooldownState {
    last_fired: BTreeMap<CooldownKey, DateTime<Utc>>,
    extra: Map<String, Value>,
    revision: Option<String>,
}

/// One row of [`CooldownState::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CooldownStatus {
    pub key: CooldownKey,
    pub last_fired: DateTime<Utc>,
    pub elapsed_minutes: f64,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_last_fired(&self, key: &CooldownKey) -> Option<DateTime<Utc>> {
        self.last_fired.get(key).copied()
    }

    /// Overwrites any earlier record for `key`.
    pub fn record_fired(&mut self, key: CooldownKey, at: DateTime<Utc>) {
        self.last_fired.insert(key, at);
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CooldownKey, &DateTime<Utc>)> {
        self.last_fired.iter()
    }

    /// Forget every record. Unknown document keys are kept.
    pub fn clear(&mut self) {
        self.last_fired.clear();
    }

    /// Elapsed time since each key last fired, in key order.
    pub fn status(&self, now: DateTime<Utc>) -> Vec<CooldownStatus> {
        self.last_fired
            .iter()
            .map(|(key, at)| CooldownStatus {
                key: key.clone(),
                last_fired: *at,
                elapsed_minutes: (now - *at).num_milliseconds() as f64 / 60_000.0,
            })
            .collect()
    }

    /// Hash of the document this state was loaded from, if any.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Decode a persisted document. `location` only labels errors.
    pub fn from_json_bytes(location: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            location: location.to_string(),
            reason,
        };

        let doc: StateDocument =
            serde_json::from_slice(bytes).map_err(|e| corrupt(format!("malformed JSON: {e}")))?;
        if doc.version != STATE_VERSION {
            return Err(corrupt(format!("unsupported version {}", doc.version)));
        }

        let mut last_fired = BTreeMap::new();
        for (key, value) in doc.last_alerts {
            let at = parse_instant(&value)
                .ok_or_else(|| corrupt(format!("invalid timestamp for '{key}': {value}")))?;
            last_fired.insert(CooldownKey::from(key.as_str()), at);
        }

        Ok(Self {
            last_fired,
            extra: doc.extra,
            revision: Some(revision_of(bytes)),
        })
    }

    pub fn to_json_string(&self) -> Result<String, StoreError> {
        let doc = StateDocument {
            version: STATE_VERSION,
            last_alerts: self
                .last_fired
                .iter()
                .map(|(key, at)| {
                    (
                        key.to_string(),
                        Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                    )
                })
                .collect(),
            extra: self.extra.clone(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

fn revision_of(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                let secs = n.as_f64().filter(|s| s.is_finite())?;
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
            }
        }
        _ => None,
    }
}

/// Durable home for a [`CooldownState`].
pub trait CooldownBackend: Send + Sync {
    /// Human-readable location, used in logs and errors.
    fn location(&self) -> String;

    /// Load the persisted state. An absent document is an empty state.
    fn load(&self) -> Result<CooldownState, StoreError>;

    /// Persist `state`, failing with [`StoreError::Conflict`] if the stored
    /// document changed since `state` was loaded.
    fn save(&self, state: &CooldownState) -> Result<(), StoreError>;
}

/// JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_current(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Corrupt {
                location: self.location(),
                reason: format!("unreadable: {e}"),
            }),
        }
    }
}

impl CooldownBackend for JsonFileStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<CooldownState, StoreError> {
        match self.read_current()? {
            Some(bytes) => {
                let state = CooldownState::from_json_bytes(&self.location(), &bytes)?;
                debug!(path = %self.path.display(), records = state.len(), "cooldown state loaded");
                Ok(state)
            }
            None => {
                info!(path = %self.path.display(), "no cooldown state yet, starting empty");
                Ok(CooldownState::default())
            }
        }
    }

    /// Writes are atomic: write to .tmp then rename.
    fn save(&self, state: &CooldownState) -> Result<(), StoreError> {
        let on_disk = self.read_current()?.map(|bytes| revision_of(&bytes));
        if on_disk.as_deref() != state.revision() {
            return Err(StoreError::Conflict {
                location: self.location(),
            });
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = state.to_json_string()?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(e)
        })?;

        debug!(path = %self.path.display(), records = state.len(), "cooldown state saved");
        Ok(())
    }
}

/// In-process store holding the serialized document.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<Vec<u8>>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from raw document bytes, valid or not.
    pub fn with_document(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            document: Mutex::new(Some(bytes.into())),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Current document bytes.
    pub fn document(&self) -> Option<Vec<u8>> {
        self.lock().clone()
    }

    /// Replace the stored document, as a concurrent writer would.
    pub fn replace_document(&self, bytes: impl Into<Vec<u8>>) {
        *self.lock() = Some(bytes.into());
    }

    /// Make every subsequent save fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CooldownBackend for MemoryStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn load(&self) -> Result<CooldownState, StoreError> {
        match self.lock().as_deref() {
            Some(bytes) => CooldownState::from_json_bytes(&self.location(), bytes),
            None => Ok(CooldownState::default()),
        }
    }

    fn save(&self, state: &CooldownState) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "memory store rejecting writes",
            )));
        }
        let mut document = self.lock();
        let current = document.as_deref().map(revision_of);
        if current.as_deref() != state.revision() {
            return Err(StoreError::Conflict {
                location: self.location(),
            });
        }
        *document = Some(state.to_json_string()?.into_bytes());
        Ok(())
    }
}
