// =============================================================================
// Model Registry — per-horizon {active, shadow, previous} triple
// =============================================================================
//
// Mutations:
//   promote_shadow_to_active  previous <- active, active <- shadow,
//                             shadow unchanged
//   rollback_to_previous      active <- previous, previous unchanged
//   assign_shadow             shadow <- new candidate (training pipeline)
//
// Every swap is a compare-and-swap against the entry the evaluator saw and
// runs entirely under the write lock: readers observe either the old or the
// new triple, never a mix.  When file-backed, the new state is written
// (tmp + rename) before it is published in memory, so a failed write leaves
// the previous state authoritative.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{Horizon, HorizonMap, ModelRegistryEntry};

/// Storage seam consumed by the lifecycle service.
pub trait RegistryStore: Send + Sync {
    fn get(&self, horizon: Horizon) -> Result<Option<ModelRegistryEntry>>;

    /// Swap shadow into active. Fails if the stored entry differs from
    /// `expected` or lacks an active/shadow id.
    fn promote_shadow_to_active(
        &self,
        horizon: Horizon,
        expected: &ModelRegistryEntry,
    ) -> Result<ModelRegistryEntry>;

    /// Swap previous back into active. Fails if the stored entry differs
    /// from `expected` or lacks an active/previous id.
    fn rollback_to_previous(
        &self,
        horizon: Horizon,
        expected: &ModelRegistryEntry,
    ) -> Result<ModelRegistryEntry>;

    /// Install a fresh shadow candidate, creating the entry if absent.
    fn assign_shadow(&self, horizon: Horizon, model_id: &str) -> Result<ModelRegistryEntry>;
}

/// One persisted row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryRecord {
    horizon: Horizon,
    #[serde(flatten)]
    entry: ModelRegistryEntry,
}

type Entries = HorizonMap<Option<ModelRegistryEntry>>;

/// Thread-safe registry, optionally persisted to a JSON file.
pub struct ModelRegistry {
    entries: RwLock<Entries>,
    path: Option<PathBuf>,
}

impl ModelRegistry {
    /// Create an empty registry that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            path: None,
        }
    }

    /// Open a file-backed registry. A missing file yields an empty registry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Entries::default();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read registry from {}", path.display()))?;
            let records: Vec<RegistryRecord> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse registry from {}", path.display()))?;
            for r in records {
                entries[r.horizon] = Some(r.entry);
            }
        }

        info!(
            path = %path.display(),
            horizons = entries.iter().filter(|(_, e)| e.is_some()).count(),
            "model registry opened"
        );

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    /// Snapshot of every horizon.
    pub fn snapshot(&self) -> Vec<(Horizon, Option<ModelRegistryEntry>)> {
        self.entries
            .read()
            .iter()
            .map(|(h, e)| (h, e.clone()))
            .collect()
    }

    /// Overwrite the entry for `horizon` (bootstrap / operator repair).
    pub fn seed(&self, horizon: Horizon, entry: ModelRegistryEntry) -> Result<()> {
        self.commit(horizon, |_| Ok(entry))?;
        info!(horizon = %horizon, "registry entry seeded");
        Ok(())
    }

    /// Apply `f` to the current entry under the write lock, persist the
    /// staged state, then publish it.
    fn commit<F>(&self, horizon: Horizon, f: F) -> Result<ModelRegistryEntry>
    where
        F: FnOnce(Option<&ModelRegistryEntry>) -> Result<ModelRegistryEntry>,
    {
        let mut entries = self.entries.write();
        let next = f(entries[horizon].as_ref())?;

        let mut staged = entries.clone();
        staged[horizon] = Some(next.clone());

        if let Some(path) = &self.path {
            persist(path, &staged)?;
        }

        *entries = staged;
        debug!(horizon = %horizon, entry = ?next, "registry entry committed");
        Ok(next)
    }
}

fn check_expected(
    horizon: Horizon,
    current: Option<&ModelRegistryEntry>,
    expected: &ModelRegistryEntry,
) -> Result<ModelRegistryEntry> {
    let current = current.ok_or_else(|| anyhow!("no registry entry for horizon {}", horizon))?;
    if current != expected {
        bail!(
            "registry for {} changed since evaluation (expected {:?}, found {:?})",
            horizon,
            expected,
            current
        );
    }
    Ok(current.clone())
}

impl RegistryStore for ModelRegistry {
    fn get(&self, horizon: Horizon) -> Result<Option<ModelRegistryEntry>> {
        Ok(self.entries.read()[horizon].clone())
    }

    fn promote_shadow_to_active(
        &self,
        horizon: Horizon,
        expected: &ModelRegistryEntry,
    ) -> Result<ModelRegistryEntry> {
        let next = self.commit(horizon, |current| {
            let current = check_expected(horizon, current, expected)?;
            let active = current
                .active_model_id
                .clone()
                .ok_or_else(|| anyhow!("no active model for {}", horizon))?;
            let shadow = current
                .shadow_model_id
                .clone()
                .ok_or_else(|| anyhow!("no shadow model for {}", horizon))?;
            Ok(ModelRegistryEntry {
                active_model_id: Some(shadow.clone()),
                shadow_model_id: Some(shadow),
                prev_model_id: Some(active),
            })
        })?;
        info!(
            horizon = %horizon,
            active = ?next.active_model_id,
            previous = ?next.prev_model_id,
            "shadow promoted to active"
        );
        Ok(next)
    }

    fn rollback_to_previous(
        &self,
        horizon: Horizon,
        expected: &ModelRegistryEntry,
    ) -> Result<ModelRegistryEntry> {
        let next = self.commit(horizon, |current| {
            let current = check_expected(horizon, current, expected)?;
            if current.active_model_id.is_none() {
                bail!("no active model for {}", horizon);
            }
            let prev = current
                .prev_model_id
                .clone()
                .ok_or_else(|| anyhow!("no previous model for {}", horizon))?;
            Ok(ModelRegistryEntry {
                active_model_id: Some(prev),
                ..current
            })
        })?;
        info!(
            horizon = %horizon,
            active = ?next.active_model_id,
            "active model rolled back to previous"
        );
        Ok(next)
    }

    fn assign_shadow(&self, horizon: Horizon, model_id: &str) -> Result<ModelRegistryEntry> {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            bail!("shadow model id must not be empty");
        }
        let next = self.commit(horizon, |current| {
            let mut next = current.cloned().unwrap_or_default();
            next.shadow_model_id = Some(model_id.to_string());
            Ok(next)
        })?;
        info!(horizon = %horizon, shadow = model_id, "shadow model assigned");
        Ok(next)
    }
}

/// Atomic write: tmp sibling, then rename.
fn persist(path: &Path, entries: &Entries) -> Result<()> {
    let records: Vec<RegistryRecord> = entries
        .iter()
        .filter_map(|(horizon, e)| {
            e.clone().map(|entry| RegistryRecord { horizon, entry })
        })
        .collect();

    let content =
        serde_json::to_string_pretty(&records).context("failed to serialise registry to JSON")?;
    let tmp_path = path.with_extension("json.tmp");

    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp registry to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp registry to {}", path.display()))?;
    Ok(())
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("path", &self.path)
            .field("entries", &*self.entries.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (ModelRegistry, ModelRegistryEntry) {
        let reg = ModelRegistry::in_memory();
        let entry = ModelRegistryEntry::new("m1")
            .with_shadow("m2")
            .with_previous("m0");
        reg.seed(Horizon::OneDay, entry.clone()).unwrap();
        (reg, entry)
    }

    #[test]
    fn promotion_swaps_triple() {
        let (reg, entry) = seeded();
        let next = reg.promote_shadow_to_active(Horizon::OneDay, &entry).unwrap();
        assert_eq!(next.active_model_id.as_deref(), Some("m2"));
        assert_eq!(next.shadow_model_id.as_deref(), Some("m2"));
        assert_eq!(next.prev_model_id.as_deref(), Some("m1"));
        assert_eq!(reg.get(Horizon::OneDay).unwrap(), Some(next));
    }

    #[test]
    fn rollback_keeps_previous() {
        let (reg, entry) = seeded();
        let next = reg.rollback_to_previous(Horizon::OneDay, &entry).unwrap();
        assert_eq!(next.active_model_id.as_deref(), Some("m0"));
        assert_eq!(next.prev_model_id.as_deref(), Some("m0"));
        assert_eq!(next.shadow_model_id.as_deref(), Some("m2"));
    }

    #[test]
    fn stale_expected_entry_is_rejected() {
        let (reg, entry) = seeded();
        reg.promote_shadow_to_active(Horizon::OneDay, &entry).unwrap();
        // Second promotion with the same (now stale) snapshot must fail.
        let err = reg.promote_shadow_to_active(Horizon::OneDay, &entry).unwrap_err();
        assert!(err.to_string().contains("changed since evaluation"));
        assert_eq!(
            reg.get(Horizon::OneDay).unwrap().unwrap().prev_model_id.as_deref(),
            Some("m1")
        );
    }

    #[test]
    fn swaps_require_ids() {
        let reg = ModelRegistry::in_memory();
        let entry = ModelRegistryEntry::new("m1");
        reg.seed(Horizon::SevenDay, entry.clone()).unwrap();
        assert!(reg.promote_shadow_to_active(Horizon::SevenDay, &entry).is_err());
        assert!(reg.rollback_to_previous(Horizon::SevenDay, &entry).is_err());
        assert!(reg
            .promote_shadow_to_active(Horizon::ThirtyDay, &ModelRegistryEntry::default())
            .is_err());
        assert_eq!(reg.get(Horizon::SevenDay).unwrap(), Some(entry));
    }

    #[test]
    fn assign_shadow_creates_or_updates() {
        let reg = ModelRegistry::in_memory();
        let e = reg.assign_shadow(Horizon::ThirtyDay, "cand-1").unwrap();
        assert!(e.active_model_id.is_none());
        assert_eq!(e.shadow_model_id.as_deref(), Some("cand-1"));
        assert!(reg.assign_shadow(Horizon::ThirtyDay, "  ").is_err());
    }

    #[test]
    fn file_backed_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let reg = ModelRegistry::open(&path).unwrap();
            let entry = ModelRegistryEntry::new("a").with_shadow("b");
            reg.seed(Horizon::SevenDay, entry.clone()).unwrap();
            reg.promote_shadow_to_active(Horizon::SevenDay, &entry).unwrap();
        }
        let reopened = ModelRegistry::open(&path).unwrap();
        let e = reopened.get(Horizon::SevenDay).unwrap().unwrap();
        assert_eq!(e.active_model_id.as_deref(), Some("b"));
        assert_eq!(e.prev_model_id.as_deref(), Some("a"));
        assert!(reopened.get(Horizon::OneDay).unwrap().is_none());
    }

    #[test]
    fn failed_persist_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("registry.json");
        let reg = ModelRegistry::open(&path).unwrap();
        assert!(reg.seed(Horizon::OneDay, ModelRegistryEntry::new("x")).is_err());
        assert!(reg.get(Horizon::OneDay).unwrap().is_none());
    }
}
