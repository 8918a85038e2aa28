//! The resolved container: lazy construction, memoization, scopes and teardown.

use crate::definition::{Bindings, StoreDefinition};
use crate::dispose::StoreGuard;
use crate::error::{BoxError, ConstructionError, Result, StoreError};
use crate::memo::{Memo, MemoTable, PendingBuild};
use crate::provider::{AsyncFactory, Binding, Construct, Instance, Lifetime};
use futures_util::future::{self, join_all, BoxFuture, FutureExt};
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A finalized container that constructs services on demand.
///
/// Cloning a `Store` is cheap and yields another handle to the same memo
/// table. Created by [`StoreDefinition::finalize`].
///
/// A store is never disposed implicitly when its last handle is dropped. Call
/// [`Store::dispose`] / [`Store::dispose_async`], or hold it through
/// [`Store::scoped`] or [`Store::run_scoped`].
#[derive(Clone)]
pub struct Store {
  inner: Arc<StoreInner>,
}

struct StoreInner {
  label: Option<Arc<str>>,
  bindings: Bindings,
  parent: Option<Store>,
  memo: MemoTable,
}

/// What a resolution produced before anything was awaited.
enum Resolution {
  Ready(Instance),
  Pending(BoxFuture<'static, Result<Instance, ConstructionError>>),
}

impl Store {
  pub(crate) fn new(label: Option<Arc<str>>, bindings: Bindings, parent: Option<Store>) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        label,
        bindings,
        parent,
        memo: MemoTable::default(),
      }),
    }
  }

  // --- PRIVATE HELPERS ---

  pub(crate) fn display_label(&self) -> &str {
    self.inner.label.as_deref().unwrap_or("store")
  }

  /// Finds the store that owns `name`: this one if it binds the name,
  /// otherwise the nearest ancestor that does.
  pub(crate) fn locate(&self, name: &str) -> Option<(&Store, &Arc<Binding>)> {
    match self.inner.bindings.get(name) {
      Some(binding) => Some((self, binding)),
      None => self.inner.parent.as_ref()?.locate(name),
    }
  }

  fn locate_or_unknown(&self, name: &str) -> Result<(&Store, &Arc<Binding>)> {
    self.locate(name).ok_or_else(|| StoreError::UnknownBinding {
      name: Arc::from(name),
    })
  }

  fn resolve_sync(&self, binding: &Arc<Binding>) -> Result<Instance> {
    match (&binding.construct, binding.lifetime) {
      (Construct::Sync(factory), Lifetime::Transient) => {
        tracing::trace!(store = self.display_label(), binding = %binding.name, "constructing transient");
        factory(self).map_err(construction_error)
      }
      (Construct::Sync(factory), Lifetime::Singleton) => {
        let slot = self.inner.memo.slot(&binding.name);
        let memo = slot.cell.get_or_try_init(|| {
          tracing::debug!(store = self.display_label(), binding = %binding.name, "constructing singleton");
          let instance = factory(self).map_err(construction_error)?;
          let resolved = self.inner.memo.resolved(instance, binding.teardown.clone());
          Ok::<_, StoreError>(Memo::Resolved(resolved))
        });
        match memo {
          Ok(Memo::Resolved(resolved)) => Ok(resolved.instance.clone()),
          Ok(Memo::Pending(_)) => Err(StoreError::AsyncBinding {
            name: binding.name.clone(),
          }),
          Err(err) => {
            self.inner.memo.discard_empty(&binding.name, slot.id);
            Err(err)
          }
        }
      }
      (Construct::Async(_), Lifetime::Singleton) => self
        .inner
        .memo
        .peek(&binding.name)
        .and_then(|slot| slot.resolved().map(|resolved| resolved.instance.clone()))
        .ok_or_else(|| StoreError::AsyncBinding {
          name: binding.name.clone(),
        }),
      (Construct::Async(_), Lifetime::Transient) => Err(StoreError::AsyncBinding {
        name: binding.name.clone(),
      }),
    }
  }

  /// Performs all memo bookkeeping immediately; only the construction itself
  /// is left for the caller to await.
  fn resolve_async(&self, binding: &Arc<Binding>) -> Result<Resolution> {
    match (&binding.construct, binding.lifetime) {
      (Construct::Sync(_), _) => self.resolve_sync(binding).map(Resolution::Ready),
      (Construct::Async(factory), Lifetime::Transient) => {
        tracing::trace!(store = self.display_label(), binding = %binding.name, "constructing transient");
        let pending = factory(self.clone());
        Ok(Resolution::Pending(
          async move { pending.await.map_err(ConstructionError::from) }.boxed(),
        ))
      }
      (Construct::Async(factory), Lifetime::Singleton) => loop {
        let slot = self.inner.memo.slot(&binding.name);
        let mut started = None;
        let memo = slot.cell.get_or_try_init(|| {
          let pending = self.begin(binding, factory, slot.id);
          match pending.downgrade() {
            Some(handle) => {
              started = Some(pending);
              Ok(Memo::Pending(handle))
            }
            None => Err(pending),
          }
        });

        match memo {
          Ok(Memo::Resolved(resolved)) => {
            tracing::trace!(store = self.display_label(), binding = %binding.name, "memo hit");
            return Ok(Resolution::Ready(resolved.instance.clone()));
          }
          Ok(Memo::Pending(handle)) => {
            if let Some(pending) = started.or_else(|| handle.upgrade()) {
              return Ok(Resolution::Pending(pending.boxed()));
            }
            // Every caller dropped its handle before the construction settled.
            tracing::debug!(store = self.display_label(), binding = %binding.name, "restarting abandoned construction");
            self.inner.memo.release(&binding.name, slot.id);
          }
          Err(pending) => return Ok(Resolution::Pending(pending.boxed())),
        }
      },
    }
  }

  /// Invokes an async singleton factory and wraps its future so that settling
  /// it updates the memo table, whoever ends up driving it.
  ///
  /// The returned future owns the factory's future, which usually holds a
  /// `Store` handle. The memo table keeps only a weak handle to it, so an
  /// abandoned construction never keeps the store alive.
  fn begin(&self, binding: &Arc<Binding>, factory: &AsyncFactory, slot_id: u64) -> PendingBuild {
    tracing::debug!(store = self.display_label(), binding = %binding.name, "constructing async singleton");
    let pending = factory(self.clone());
    let owner = Arc::downgrade(&self.inner);
    let name = binding.name.clone();
    let teardown = binding.teardown.clone();

    async move {
      match pending.await {
        Ok(instance) => {
          if let Some(inner) = owner.upgrade() {
            let resolved = inner.memo.resolved(instance.clone(), teardown);
            inner.memo.settle_ok(&name, slot_id, resolved);
            tracing::debug!(binding = %name, "async singleton settled");
          }
          Ok(instance)
        }
        Err(err) => {
          let err = ConstructionError::from(err);
          if let Some(inner) = owner.upgrade() {
            inner.memo.settle_err(&name, slot_id);
          }
          tracing::warn!(binding = %name, error = %err, "async singleton construction failed");
          Err(err)
        }
      }
    }
    .boxed()
    .shared()
  }

  // --- PUBLIC API ---

  /// Returns `true` if `name` is bound here or in any ancestor store.
  pub fn has(&self, name: &str) -> bool {
    self.locate(name).is_some()
  }

  /// Resolves a service synchronously.
  ///
  /// Local bindings shadow bindings of the same name in ancestor stores.
  /// Singletons are constructed on first use and memoized in the store that
  /// owns the binding; transients are constructed on every call.
  ///
  /// Asynchronous bindings can be read here only once they have settled;
  /// until then this returns [`StoreError::AsyncBinding`].
  pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
    let (owner, binding) = self.locate_or_unknown(name)?;
    let instance = owner.resolve_sync(binding)?;
    downcast(&binding.name, instance)
  }

  /// Resolves a service that may be constructed asynchronously.
  ///
  /// The memo table is updated before this returns, not when the future is
  /// first polled: every call made before an async singleton settles gets a
  /// handle to the same construction, and the factory runs once. If that
  /// construction fails, every handle sees the factory's error and the entry
  /// is cleared so the next call starts over.
  pub fn get_async<T: Any + Send + Sync>(
    &self,
    name: &str,
  ) -> BoxFuture<'static, Result<Arc<T>>> {
    let resolution = self
      .locate_or_unknown(name)
      .and_then(|(owner, binding)| Ok((binding.name.clone(), owner.resolve_async(binding)?)));

    match resolution {
      Ok((name, Resolution::Ready(instance))) => future::ready(downcast(&name, instance)).boxed(),
      Ok((name, Resolution::Pending(pending))) => async move {
        let instance = pending.await.map_err(StoreError::Construction)?;
        downcast(&name, instance)
      }
      .boxed(),
      Err(err) => future::ready(Err(err)).boxed(),
    }
  }

  /// Starts a new definition whose finalized stores resolve unknown names
  /// through this store.
  pub fn create_child(&self) -> StoreDefinition {
    StoreDefinition::with_parent(self.clone())
  }

  pub fn parent(&self) -> Option<&Store> {
    self.inner.parent.as_ref()
  }

  pub fn label(&self) -> Option<&str> {
    self.inner.label.as_deref()
  }

  /// Returns `true` if this store (not an ancestor) holds a settled value
  /// for `name`.
  pub fn is_constructed(&self, name: &str) -> bool {
    self
      .inner
      .memo
      .peek(name)
      .map_or(false, |slot| slot.resolved().is_some())
  }

  /// Tears down every value this store constructed, newest first.
  ///
  /// Values owned by ancestor stores, transients, and constructions still in
  /// flight are left alone. Stops at the first value that cannot be torn down
  /// synchronously ([`StoreError::SyncDisposeOfAsyncResource`]) or whose
  /// teardown fails; entries disposed before that point are removed from the
  /// memo table.
  pub fn dispose(&self) -> Result<()> {
    let entries = self.inner.memo.materialized();
    tracing::debug!(store = self.display_label(), count = entries.len(), "disposing store");

    for entry in entries {
      entry
        .resolved
        .teardown
        .dispose_sync(&entry.name, &entry.resolved.instance)?;
      self.inner.memo.release(&entry.name, entry.slot_id);
    }
    Ok(())
  }

  /// Tears down every value this store constructed, preferring each value's
  /// async teardown and falling back to its sync one.
  ///
  /// All teardowns are started before any is awaited, and every one is
  /// attempted. A single failure is returned as is; several are collected
  /// into [`StoreError::Disposal`].
  pub async fn dispose_async(&self) -> Result<()> {
    let entries = self.inner.memo.materialized();
    tracing::debug!(store = self.display_label(), count = entries.len(), "disposing store asynchronously");

    let mut teardowns = Vec::with_capacity(entries.len());
    for entry in entries {
      self.inner.memo.release(&entry.name, entry.slot_id);
      if let Some(teardown) = entry
        .resolved
        .teardown
        .dispose_async(entry.name, entry.resolved.instance)
      {
        teardowns.push(teardown);
      }
    }

    let mut failures: Vec<StoreError> = join_all(teardowns)
      .await
      .into_iter()
      .filter_map(|outcome| outcome.err())
      .collect();

    match failures.len() {
      0 => Ok(()),
      1 => Err(failures.remove(0)),
      _ => Err(StoreError::Disposal(failures)),
    }
  }

  /// Wraps this store in a guard that disposes it synchronously when dropped.
  pub fn scoped(self) -> StoreGuard {
    StoreGuard::new(self)
  }

  /// Runs `body` with this store, then disposes it asynchronously.
  ///
  /// The body's output is returned once teardown has completed. A teardown
  /// failure takes precedence over the output. If the body panics, the store
  /// is still disposed before the panic resumes; teardown errors are then
  /// only logged.
  pub async fn run_scoped<F, Fut, R>(&self, body: F) -> Result<R>
  where
    F: FnOnce(Store) -> Fut,
    Fut: Future<Output = R>,
  {
    let outcome = AssertUnwindSafe(body(self.clone())).catch_unwind().await;
    let disposed = self.dispose_async().await;

    match outcome {
      Ok(output) => disposed.map(|()| output),
      Err(payload) => {
        if let Err(err) = disposed {
          tracing::warn!(
            store = self.display_label(),
            error = %err,
            "scoped store disposal failed after panic"
          );
        }
        panic::resume_unwind(payload)
      }
    }
  }
}

impl fmt::Debug for Store {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Store")
      .field("label", &self.inner.label)
      .field("bindings", &self.inner.bindings.len())
      .field("constructed", &self.inner.memo.resolved_count())
      .field("pending", &self.inner.memo.pending_count())
      .field("parent", &self.inner.parent.as_ref().map(Store::display_label))
      .finish()
  }
}

fn construction_error(err: BoxError) -> StoreError {
  StoreError::Construction(ConstructionError::from(err))
}

fn downcast<T: Any + Send + Sync>(name: &Arc<str>, instance: Instance) -> Result<Arc<T>> {
  instance
    .downcast::<T>()
    .map_err(|_| StoreError::TypeMismatch {
      name: name.clone(),
      expected: type_name::<T>(),
    })
}
