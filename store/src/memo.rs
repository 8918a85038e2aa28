//! The per-store memo table of constructed and in-flight singletons.

use crate::dispose::Teardown;
use crate::error::ConstructionError;
use crate::provider::Instance;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared, WeakShared};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An asynchronous construction shared by every caller that asked for it
/// before it settled.
pub(crate) type PendingBuild = Shared<BoxFuture<'static, Result<Instance, ConstructionError>>>;

/// The memo table's view of a [`PendingBuild`]. Only callers hold it
/// strongly; once every caller has dropped its handle the construction is
/// abandoned and the slot counts as empty.
pub(crate) type PendingHandle = WeakShared<BoxFuture<'static, Result<Instance, ConstructionError>>>;

/// A settled singleton together with how to tear it down.
#[derive(Clone)]
pub(crate) struct Resolved {
  pub(crate) instance: Instance,
  pub(crate) teardown: Teardown,
  /// Position in construction order, used to dispose in reverse.
  pub(crate) seq: u64,
}

pub(crate) enum Memo {
  Pending(PendingHandle),
  Resolved(Resolved),
}

/// One memo entry. The cell admits a single initializer, so concurrent
/// resolvers on different threads wait for the first instead of racing it.
pub(crate) struct Slot {
  pub(crate) id: u64,
  pub(crate) cell: OnceCell<Memo>,
}

impl Slot {
  pub(crate) fn resolved(&self) -> Option<&Resolved> {
    match self.cell.get() {
      Some(Memo::Resolved(resolved)) => Some(resolved),
      _ => None,
    }
  }
}

/// A resolved entry captured for a disposal pass.
pub(crate) struct Materialized {
  pub(crate) name: Arc<str>,
  pub(crate) slot_id: u64,
  pub(crate) resolved: Resolved,
}

#[derive(Default)]
pub(crate) struct MemoTable {
  slots: DashMap<Arc<str>, Arc<Slot>>,
  next_id: AtomicU64,
  next_seq: AtomicU64,
}

impl MemoTable {
  /// Returns the slot for `name`, creating an empty one if there is none.
  ///
  /// The shard lock is released before the caller touches the slot, so
  /// factories may resolve other names while they run.
  pub(crate) fn slot(&self, name: &Arc<str>) -> Arc<Slot> {
    if let Some(slot) = self.peek(name) {
      return slot;
    }
    self
      .slots
      .entry(name.clone())
      .or_insert_with(|| self.next_slot(OnceCell::new()))
      .clone()
  }

  pub(crate) fn peek(&self, name: &str) -> Option<Arc<Slot>> {
    self.slots.get(name).map(|slot| slot.value().clone())
  }

  pub(crate) fn resolved(&self, instance: Instance, teardown: Teardown) -> Resolved {
    Resolved {
      instance,
      teardown,
      seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
    }
  }

  /// Replaces a pending entry with its resolved marker, unless the entry was
  /// removed or replaced in the meantime.
  pub(crate) fn settle_ok(&self, name: &str, slot_id: u64, resolved: Resolved) {
    let settled = self.next_slot(OnceCell::with_value(Memo::Resolved(resolved)));
    if let Some(mut current) = self.slots.get_mut(name) {
      if current.id == slot_id {
        *current = settled;
      }
    }
  }

  /// Drops the entry so the next resolution starts from scratch.
  pub(crate) fn settle_err(&self, name: &str, slot_id: u64) {
    self.slots.remove_if(name, |_, slot| slot.id == slot_id);
  }

  /// Drops a slot whose initializer failed without producing anything.
  pub(crate) fn discard_empty(&self, name: &str, slot_id: u64) {
    self
      .slots
      .remove_if(name, |_, slot| slot.id == slot_id && slot.cell.get().is_none());
  }

  /// Removes a disposed or abandoned entry.
  pub(crate) fn release(&self, name: &str, slot_id: u64) {
    self.slots.remove_if(name, |_, slot| slot.id == slot_id);
  }

  /// Every settled entry, most recently constructed first.
  pub(crate) fn materialized(&self) -> Vec<Materialized> {
    let mut entries: Vec<Materialized> = self
      .slots
      .iter()
      .filter_map(|entry| {
        let slot = entry.value();
        slot.resolved().map(|resolved| Materialized {
          name: entry.key().clone(),
          slot_id: slot.id,
          resolved: resolved.clone(),
        })
      })
      .collect();
    entries.sort_by(|a, b| b.resolved.seq.cmp(&a.resolved.seq));
    entries
  }

  pub(crate) fn pending_count(&self) -> usize {
    self
      .slots
      .iter()
      .filter(|entry| match entry.value().cell.get() {
        Some(Memo::Pending(handle)) => handle.upgrade().is_some(),
        _ => false,
      })
      .count()
  }

  pub(crate) fn resolved_count(&self) -> usize {
    self
      .slots
      .iter()
      .filter(|entry| entry.value().resolved().is_some())
      .count()
  }

  fn next_slot(&self, cell: OnceCell<Memo>) -> Arc<Slot> {
    Arc::new(Slot {
      id: self.next_id.fetch_add(1, Ordering::Relaxed),
      cell,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn instance(value: u32) -> Instance {
    Arc::new(value)
  }

  fn resolve_into(table: &MemoTable, name: &Arc<str>, value: u32) -> u64 {
    let slot = table.slot(name);
    let resolved = table.resolved(instance(value), Teardown::default());
    assert!(slot.cell.set(Memo::Resolved(resolved)).is_ok());
    slot.id
  }

  #[test]
  fn slot_is_reused_until_released() {
    let table = MemoTable::default();
    let name: Arc<str> = Arc::from("config");

    let first = table.slot(&name);
    let second = table.slot(&name);
    assert!(Arc::ptr_eq(&first, &second));

    table.release(&name, first.id);
    let third = table.slot(&name);
    assert!(!Arc::ptr_eq(&first, &third));
  }

  #[test]
  fn stale_settlement_is_ignored() {
    let table = MemoTable::default();
    let name: Arc<str> = Arc::from("db");

    let stale = table.slot(&name);
    table.settle_err(&name, stale.id);
    let fresh_id = table.slot(&name).id;

    table.settle_ok(&name, stale.id, table.resolved(instance(1), Teardown::default()));
    assert!(table.peek(&name).unwrap().resolved().is_none());
    assert_eq!(table.peek(&name).unwrap().id, fresh_id);
  }

  #[test]
  fn settlement_replaces_slot_with_resolved_one() {
    let table = MemoTable::default();
    let name: Arc<str> = Arc::from("db");
    let pending = table.slot(&name);

    table.settle_ok(&name, pending.id, table.resolved(instance(5), Teardown::default()));

    let settled = table.peek(&name).unwrap();
    assert_ne!(settled.id, pending.id);
    let value = settled.resolved().unwrap().instance.clone();
    assert_eq!(*value.downcast::<u32>().unwrap(), 5);
    assert_eq!(table.resolved_count(), 1);
  }

  #[test]
  fn materialized_is_newest_first() {
    let table = MemoTable::default();
    let a: Arc<str> = Arc::from("a");
    let b: Arc<str> = Arc::from("b");
    resolve_into(&table, &a, 1);
    resolve_into(&table, &b, 2);
    // An empty slot is not materialized.
    table.slot(&Arc::from("c"));

    let names: Vec<_> = table
      .materialized()
      .into_iter()
      .map(|entry| entry.name.to_string())
      .collect();
    assert_eq!(names, vec!["b", "a"]);
    assert_eq!(table.resolved_count(), 2);
  }

  #[test]
  fn discard_keeps_initialized_slots() {
    let table = MemoTable::default();
    let name: Arc<str> = Arc::from("cache");
    let id = resolve_into(&table, &name, 7);

    table.discard_empty(&name, id);
    assert!(table.peek(&name).is_some());
  }
}
