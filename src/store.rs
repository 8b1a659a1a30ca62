use std::any::Any;
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

// ── Typed table ──────────────────────────────────────────────────────

/// One published analytic table.
///
/// `publish` swaps the whole `Vec` behind an `Arc`; readers holding the old
/// `Arc` keep seeing the old rows in full.
pub struct Table<T> {
    rows: Arc<ArcSwap<Vec<T>>>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }
}

impl<T> Table<T> {
    pub fn read(&self) -> Arc<Vec<T>> {
        self.rows.load_full()
    }

    pub fn publish(&self, rows: Vec<T>) {
        self.rows.store(Arc::new(rows));
    }
}

// ── Type-erased slot ─────────────────────────────────────────────────

trait Slot: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn records(&self) -> serde_json::Result<serde_json::Value>;
    fn row_count(&self) -> usize;
}

impl<T> Slot for Table<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn records(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&*self.read())
    }

    fn row_count(&self) -> usize {
        self.read().len()
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Registry of every analytic table, keyed by table name.
///
/// Each name has exactly one producer. The registry lock is only taken to
/// register or look up a handle; row publication goes through the table's
/// own `ArcSwap`.
#[derive(Default)]
pub struct SnapshotStore {
    slots: RwLock<IndexMap<String, Arc<dyn Slot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle for `name`, registering an empty table on first use.
    ///
    /// A name registered under a different row type yields a detached handle;
    /// that is a wiring bug and is logged.
    pub fn table<T>(&self, name: &str) -> Table<T>
    where
        T: Serialize + Send + Sync + 'static,
    {
        if let Some(table) = self.lookup::<T>(name) {
            return table;
        }

        let mut slots = self.slots.write();
        if let Some(existing) = slots.get(name) {
            return match existing.as_any().downcast_ref::<Table<T>>() {
                Some(table) => table.clone(),
                None => {
                    tracing::error!(table = name, "table registered with a different row type");
                    Table::default()
                }
            };
        }
        let table = Table::<T>::default();
        slots.insert(name.to_string(), Arc::new(table.clone()));
        table
    }

    pub fn publish<T>(&self, name: &str, rows: Vec<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.table::<T>(name).publish(rows);
    }

    /// Latest rows for `name`, or an empty table if nothing was published.
    pub fn read<T>(&self, name: &str) -> Arc<Vec<T>>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.lookup::<T>(name)
            .map(|table| table.read())
            .unwrap_or_default()
    }

    /// Row-oriented JSON for the query layer.
    pub fn records(&self, name: &str) -> Option<serde_json::Result<serde_json::Value>> {
        let slot = self.slots.read().get(name).cloned()?;
        Some(slot.records())
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    pub fn row_counts(&self) -> Vec<(String, usize)> {
        self.slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.row_count()))
            .collect()
    }

    fn lookup<T>(&self, name: &str) -> Option<Table<T>>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let slots = self.slots.read();
        slots
            .get(name)?
            .as_any()
            .downcast_ref::<Table<T>>()
            .cloned()
    }
}
