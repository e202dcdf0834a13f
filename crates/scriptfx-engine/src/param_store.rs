//! Thread-safe parameter storage shared by the audio and control threads.
//!
//! [`ParameterStore`] holds the live value of every parameter slot in a flat
//! `[AtomicU64; 256]` (f64 bits). The declarations ([`ParameterTable`]) are
//! published through `ArcSwap` so the audio thread reads them wait-free.
//! Sample-offset automation arriving from other threads is parked in a small
//! `Mutex<Vec>` that the audio thread drains with `try_lock`; a flag keeps the
//! steady state from touching the lock at all.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use scriptfx_core::{MAX_PARAMETERS, ParameterKind, ParameterReading, ParameterSpec};

/// Sparse parameter declarations indexed by slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTable {
    specs: Vec<Option<ParameterSpec>>,
}

impl Default for ParameterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterTable {
    /// Table with no parameters.
    pub fn new() -> Self {
        Self {
            specs: vec![None; MAX_PARAMETERS],
        }
    }

    /// Table from `(slot, spec)` pairs. Out-of-range slots are dropped.
    pub fn from_specs<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = (usize, ParameterSpec)>,
    {
        let mut table = Self::new();
        for (index, spec) in specs {
            if let Some(slot) = table.specs.get_mut(index) {
                *slot = Some(spec);
            }
        }
        table
    }

    /// Declaration for `index`.
    pub fn get(&self, index: usize) -> Option<&ParameterSpec> {
        self.specs.get(index)?.as_ref()
    }

    /// Allocated slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ParameterSpec)> {
        self.specs
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no slot is allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One parameter value in a [`ParameterSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Slot.
    pub index: usize,
    /// Internal value.
    pub value: f64,
}

/// Values of every allocated parameter, for presets and saved state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    /// Entries in slot order.
    pub values: Vec<SnapshotEntry>,
}

/// Sample-offset change waiting for the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingChange {
    /// Slot.
    pub index: usize,
    /// Frame within the next block.
    pub offset: u32,
    /// Internal value.
    pub value: f64,
}

/// Live parameter values plus their declarations.
///
/// # Thread Safety
///
/// - **Values**: `AtomicU64` (f64 bits), lock-free.
/// - **Declarations**: `ArcSwap::load()`, wait-free reads.
/// - **Pending automation**: `Mutex`; control thread locks to push, audio
///   `try_lock`s to drain, and only when the pending flag is set.
/// - **Dirty/changed flags**: `AtomicBool`, set by writers, taken with `swap`.
pub struct ParameterStore {
    values: Box<[AtomicU64]>,
    table: ArcSwap<ParameterTable>,
    pending: Mutex<Vec<PendingChange>>,
    has_pending: AtomicBool,
    dirty: AtomicBool,
    changed: AtomicBool,
    listener: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore {
    /// Empty store without a change listener.
    pub fn new() -> Self {
        Self::with_listener(None)
    }

    /// Empty store. `listener` runs whenever a value changes outside the
    /// host's own automation; it may be called from the audio thread.
    pub fn with_listener(listener: Option<Box<dyn Fn() + Send + Sync>>) -> Self {
        Self {
            values: (0..MAX_PARAMETERS).map(|_| AtomicU64::new(0)).collect(),
            table: ArcSwap::from_pointee(ParameterTable::new()),
            pending: Mutex::new(Vec::new()),
            has_pending: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            changed: AtomicBool::new(false),
            listener,
        }
    }

    // ── Values (lock-free) ──────────────────────────────────────────────────

    /// Current internal value of `index`; 0 for unknown slots.
    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        self.values
            .get(index)
            .map_or(0.0, |v| f64::from_bits(v.load(Ordering::Acquire)))
    }

    /// Store without validation (audio thread, already sanitized).
    #[inline]
    pub(crate) fn store_value(&self, index: usize, value: f64) {
        if let Some(slot) = self.values.get(index) {
            slot.store(value.to_bits(), Ordering::Release);
        }
    }

    /// Set a parameter from the host.
    ///
    /// The value is quantized, clamped and, for externally shaped parameters,
    /// mapped back from the external scale. With `sample_offset > 0` it is
    /// queued for the next block; otherwise it is applied now and the
    /// parameter section runs at the start of the next block.
    ///
    /// Unallocated or out-of-range slots are ignored.
    pub fn set_value(&self, index: usize, value: f64, sample_offset: u32) {
        let table = self.table.load();
        let Some(spec) = table.get(index) else {
            return;
        };
        let value = spec.from_host(value);
        if sample_offset > 0 {
            self.push_pending(PendingChange {
                index,
                offset: sample_offset,
                value,
            });
            return;
        }
        if self.value(index) != value {
            self.store_value(index, value);
            self.dirty.store(true, Ordering::Release);
            self.notify();
        }
    }

    /// Queue a change for the next block, even at offset 0.
    pub fn enqueue(&self, index: usize, value: f64, sample_offset: u32) {
        let table = self.table.load();
        let Some(spec) = table.get(index) else {
            return;
        };
        self.push_pending(PendingChange {
            index,
            offset: sample_offset,
            value: spec.from_host(value),
        });
    }

    /// Write from script code. The script already knows; hosts are told.
    pub(crate) fn set_from_script(&self, index: usize, value: f64) {
        if index < MAX_PARAMETERS && self.value(index) != value {
            self.store_value(index, value);
            self.notify();
        }
    }

    /// Host view of `index`.
    pub fn reading(&self, index: usize) -> Option<ParameterReading> {
        let table = self.table.load();
        table.get(index).map(|spec| spec.reading(self.value(index)))
    }

    /// Restore every allocated parameter to its default.
    pub fn reset_to_defaults(&self) {
        let table = self.table.load();
        for (index, spec) in table.iter() {
            self.store_value(index, spec.default);
        }
        self.dirty.store(true, Ordering::Release);
        self.notify();
    }

    // ── Pending automation ──────────────────────────────────────────────────

    fn push_pending(&self, change: PendingChange) {
        let mut pending = self.pending.lock();
        pending.push(change);
        self.has_pending.store(true, Ordering::Release);
    }

    /// Hand queued changes to `apply` (audio thread, non-blocking).
    ///
    /// Returns `false` if the queue is contended; the changes stay queued
    /// for the next block.
    pub fn drain_pending(&self, mut apply: impl FnMut(PendingChange)) -> bool {
        if !self.has_pending.load(Ordering::Acquire) {
            return true;
        }
        let Some(mut pending) = self.pending.try_lock() else {
            return false;
        };
        for change in pending.drain(..) {
            apply(change);
        }
        self.has_pending.store(false, Ordering::Release);
        true
    }

    // ── Flags ───────────────────────────────────────────────────────────────

    /// Check and clear the "run parameter section" flag (audio thread).
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Check and clear the "hosts should re-read values" flag.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn notify(&self) {
        self.changed.store(true, Ordering::Release);
        if let Some(cb) = &self.listener {
            cb();
        }
    }

    // ── Declarations ────────────────────────────────────────────────────────

    /// Load the current declarations (wait-free read).
    pub fn table(&self) -> arc_swap::Guard<Arc<ParameterTable>> {
        self.table.load()
    }

    /// Publish new declarations.
    ///
    /// With `preserve`, slots that existed before keep their value, brought
    /// into the new range. Everything else starts at its default. File lists
    /// already scanned for the same directory carry over.
    pub fn publish_table(&self, mut table: ParameterTable, preserve: bool) {
        let old = self.table.load_full();
        for index in 0..MAX_PARAMETERS {
            let old_spec = old.get(index);
            let Some(Some(spec)) = table.specs.get_mut(index) else {
                self.store_value(index, 0.0);
                continue;
            };
            if let (ParameterKind::File(files), Some(ParameterSpec {
                kind: ParameterKind::File(old_files),
                ..
            })) = (&mut spec.kind, old_spec)
                && files.dir == old_files.dir
                && files.entries.is_empty()
            {
                files.entries = old_files.entries.clone();
            }
            let value = if preserve && old_spec.is_some() {
                spec.sanitize(self.value(index))
            } else {
                spec.default
            };
            self.store_value(index, value);
        }
        self.table.store(Arc::new(table));
        self.notify();
    }

    // ── Text and files ──────────────────────────────────────────────────────

    /// Display text for the current value of `index`.
    pub fn parameter_text(&self, index: usize) -> Option<String> {
        let table = self.table.load();
        table
            .get(index)
            .map(|spec| spec.display_text(self.value(index)))
    }

    /// Parse display text into an internal value for `index`.
    pub fn value_from_text(&self, index: usize, text: &str) -> Option<f64> {
        let table = self.table.load();
        table.get(index)?.value_from_text(text)
    }

    /// Selected file of a file-chooser parameter, relative to its directory.
    pub fn current_file(&self, index: usize) -> Option<String> {
        let table = self.table.load();
        match &table.get(index)?.kind {
            ParameterKind::File(files) => files
                .current(self.value(index))
                .map(|entry| format!("{}/{}", files.dir, entry)),
            _ => None,
        }
    }

    /// Rescan every file-chooser parameter under `data_dir`.
    ///
    /// Selections are restored by name where the file still exists, clamped
    /// otherwise. Returns the number of parameters rescanned.
    pub fn rescan_files(&self, data_dir: &Path) -> usize {
        let mut table = ParameterTable::clone(&self.table.load());
        let mut rescanned = 0;
        for (index, slot) in table.specs.iter_mut().enumerate() {
            let Some(ParameterSpec {
                kind: ParameterKind::File(files),
                ..
            }) = slot
            else {
                continue;
            };
            let previous = files.current(self.value(index)).map(str::to_string);
            let value = match files.rescan(data_dir, previous.as_deref()) {
                Some(i) => i as f64,
                None => self.value(index).min(files.entries.len().saturating_sub(1) as f64),
            };
            self.store_value(index, value.max(0.0));
            rescanned += 1;
        }
        if rescanned > 0 {
            tracing::debug!(rescanned, "file parameters rescanned");
            self.table.store(Arc::new(table));
            self.dirty.store(true, Ordering::Release);
            self.notify();
        }
        rescanned
    }

    // ── Snapshots ───────────────────────────────────────────────────────────

    /// Values of every allocated parameter.
    pub fn snapshot(&self) -> ParameterSnapshot {
        let table = self.table.load();
        ParameterSnapshot {
            values: table
                .iter()
                .map(|(index, _)| SnapshotEntry {
                    index,
                    value: self.value(index),
                })
                .collect(),
        }
    }

    /// Apply a snapshot. Entries for unallocated slots are skipped; values
    /// are sanitized against the current declarations.
    pub fn restore(&self, snapshot: &ParameterSnapshot) {
        let table = self.table.load();
        for entry in &snapshot.values {
            if let Some(spec) = table.get(entry.index) {
                self.store_value(entry.index, spec.sanitize(entry.value));
            }
        }
        self.dirty.store(true, Ordering::Release);
        self.notify();
    }
}
