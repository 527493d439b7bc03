// =============================================================================
// Event Log — append-only journal of lifecycle actions
// =============================================================================
//
// Every promotion, rollback and shadow assignment is appended as one JSON
// line.  Entries are chained: each carries the digest of its predecessor and
//
//   digest = sha256(prev_digest || canonical event JSON)
//
// so an edited or dropped line breaks verification on the next open.
//
// Cooldowns are derived from this log: "days since the last PROMOTED event
// for this horizon" is a pure function of `now` and the newest entry.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::types::Horizon;

/// Kind of lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventKind {
    Promoted,
    RolledBack,
    ShadowAssigned,
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Promoted => write!(f, "PROMOTED"),
            Self::RolledBack => write!(f, "ROLLED_BACK"),
            Self::ShadowAssigned => write!(f, "SHADOW_ASSIGNED"),
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub kind: LifecycleEventKind,
    pub horizon: Horizon,
    #[serde(default)]
    pub from_model_id: Option<String>,
    #[serde(default)]
    pub to_model_id: Option<String>,
    pub reason: String,
    /// Metrics snapshot at decision time.
    #[serde(default)]
    pub metrics: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Filled by the journal on append.
    #[serde(default)]
    pub prev_digest: String,
    #[serde(default)]
    pub digest: String,
}

impl LifecycleEvent {
    pub fn new(
        kind: LifecycleEventKind,
        horizon: Horizon,
        from_model_id: Option<String>,
        to_model_id: Option<String>,
        reason: impl Into<String>,
        metrics: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            horizon,
            from_model_id,
            to_model_id,
            reason: reason.into(),
            metrics,
            timestamp,
            prev_digest: String::new(),
            digest: String::new(),
        }
    }

    /// Digest over the predecessor digest and every field except `digest`.
    fn compute_digest(&self) -> Result<String> {
        let mut body = self.clone();
        body.digest = String::new();
        let canonical = serde_json::to_vec(&body).context("failed to serialise lifecycle event")?;

        let mut hasher = Sha256::new();
        hasher.update(self.prev_digest.as_bytes());
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Storage seam consumed by the lifecycle service.
pub trait EventLog: Send + Sync {
    fn append(&self, event: LifecycleEvent) -> Result<LifecycleEvent>;

    /// Newest event of `kind` for `horizon`.
    fn last_event(
        &self,
        horizon: Horizon,
        kind: LifecycleEventKind,
    ) -> Result<Option<LifecycleEvent>>;

    fn last_promotion(&self, horizon: Horizon) -> Result<Option<LifecycleEvent>> {
        self.last_event(horizon, LifecycleEventKind::Promoted)
    }

    fn last_rollback(&self, horizon: Horizon) -> Result<Option<LifecycleEvent>> {
        self.last_event(horizon, LifecycleEventKind::RolledBack)
    }

    /// Most recent `limit` events, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<LifecycleEvent>>;

    /// Every event for `horizon`, oldest first.
    fn for_horizon(&self, horizon: Horizon) -> Result<Vec<LifecycleEvent>>;
}

/// Journal kept in memory and optionally mirrored to a JSON-lines file.
pub struct EventJournal {
    events: RwLock<Vec<LifecycleEvent>>,
    path: Option<PathBuf>,
}

impl EventJournal {
    pub fn in_memory() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Open a file-backed journal, replaying and verifying every line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut events = Vec::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read event log from {}", path.display()))?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let event: LifecycleEvent = serde_json::from_str(line).with_context(|| {
                    format!("failed to parse event log line {} of {}", lineno + 1, path.display())
                })?;
                events.push(event);
            }
            verify_chain(&events)
                .with_context(|| format!("event log {} failed verification", path.display()))?;
        }

        info!(path = %path.display(), events = events.len(), "event journal opened");

        Ok(Self {
            events: RwLock::new(events),
            path: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }
}

/// Check that every entry links to its predecessor and hashes correctly.
fn verify_chain(events: &[LifecycleEvent]) -> Result<()> {
    let mut prev = String::new();
    for (i, e) in events.iter().enumerate() {
        if e.prev_digest != prev {
            bail!("event {} ({}) does not link to its predecessor", i, e.id);
        }
        if e.compute_digest()? != e.digest {
            bail!("event {} ({}) digest mismatch", i, e.id);
        }
        prev = e.digest.clone();
    }
    Ok(())
}

impl EventLog for EventJournal {
    fn append(&self, mut event: LifecycleEvent) -> Result<LifecycleEvent> {
        let mut events = self.events.write();

        event.prev_digest = events.last().map(|e| e.digest.clone()).unwrap_or_default();
        event.digest = event.compute_digest()?;

        if let Some(path) = &self.path {
            let line = serde_json::to_string(&event).context("failed to serialise lifecycle event")?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open event log {}", path.display()))?;
            writeln!(file, "{}", line)
                .with_context(|| format!("failed to append to event log {}", path.display()))?;
        }

        debug!(
            id = %event.id,
            kind = %event.kind,
            horizon = %event.horizon,
            "lifecycle event appended"
        );
        events.push(event.clone());
        Ok(event)
    }

    /// Selected by timestamp; on a tie the later append wins.
    fn last_event(
        &self,
        horizon: Horizon,
        kind: LifecycleEventKind,
    ) -> Result<Option<LifecycleEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.horizon == horizon && e.kind == kind)
            .max_by_key(|e| e.timestamp)
            .cloned())
    }

    fn recent(&self, limit: usize) -> Result<Vec<LifecycleEvent>> {
        Ok(self.events.read().iter().rev().take(limit).cloned().collect())
    }

    fn for_horizon(&self, horizon: Horizon) -> Result<Vec<LifecycleEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.horizon == horizon)
            .cloned()
            .collect())
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for EventJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventJournal")
            .field("path", &self.path)
            .field("events", &self.events.read().len())
            .finish()
    }
}
