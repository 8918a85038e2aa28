//! Teardown capabilities and scoped disposal.

use crate::error::{BoxError, Result, StoreError};
use crate::provider::Instance;
use crate::store::Store;
use futures_util::future::{self, BoxFuture, FutureExt};
use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

/// A value that can release its resources synchronously.
///
/// Declare the capability on registration with [`Provider::disposable`](crate::Provider::disposable).
pub trait Dispose {
  fn dispose(&self) -> Result<(), BoxError>;
}

/// A value that needs to await something to release its resources.
///
/// Declare the capability on registration with
/// [`Provider::async_disposable`](crate::Provider::async_disposable). Values that
/// only implement this trait cannot be torn down by [`Store::dispose`].
pub trait AsyncDispose {
  fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>>;
}

type SyncHook = Arc<dyn Fn(&Instance) -> Result<(), BoxError> + Send + Sync>;
type AsyncHook = Arc<dyn Fn(Instance) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// The teardown capabilities a binding declared, erased over the value type.
#[derive(Clone, Default)]
pub(crate) struct Teardown {
  sync_hook: Option<SyncHook>,
  async_hook: Option<AsyncHook>,
}

impl Teardown {
  pub(crate) fn with_sync<T: Dispose + Any + Send + Sync>(mut self) -> Self {
    self.sync_hook = Some(Arc::new(|instance: &Instance| {
      match instance.downcast_ref::<T>() {
        Some(value) => value.dispose(),
        None => Ok(()),
      }
    }));
    self
  }

  pub(crate) fn with_async<T: AsyncDispose + Any + Send + Sync>(mut self) -> Self {
    self.async_hook = Some(Arc::new(|instance: Instance| {
      async move {
        match instance.downcast_ref::<T>() {
          Some(value) => value.dispose_async().await,
          None => Ok(()),
        }
      }
      .boxed()
    }));
    self
  }

  pub(crate) fn capabilities(&self) -> (bool, bool) {
    (self.sync_hook.is_some(), self.async_hook.is_some())
  }

  /// Runs the synchronous hook. A value that can only be torn down
  /// asynchronously is an error here, never a silent skip.
  pub(crate) fn dispose_sync(&self, name: &Arc<str>, instance: &Instance) -> Result<()> {
    match (&self.sync_hook, &self.async_hook) {
      (Some(hook), _) => hook(instance).map_err(|source| StoreError::Teardown {
        name: name.clone(),
        source,
      }),
      (None, Some(_)) => Err(StoreError::SyncDisposeOfAsyncResource { name: name.clone() }),
      (None, None) => Ok(()),
    }
  }

  /// Starts the preferred teardown for an async disposal pass. The async hook
  /// wins when both are declared; the sync hook runs immediately otherwise.
  pub(crate) fn dispose_async(
    &self,
    name: Arc<str>,
    instance: Instance,
  ) -> Option<BoxFuture<'static, Result<()>>> {
    if let Some(hook) = &self.async_hook {
      let pending = hook(instance);
      return Some(
        async move {
          pending
            .await
            .map_err(|source| StoreError::Teardown { name, source })
        }
        .boxed(),
      );
    }

    let hook = self.sync_hook.as_ref()?;
    let outcome = hook(&instance).map_err(|source| StoreError::Teardown { name, source });
    Some(future::ready(outcome).boxed())
  }
}

/// Disposes the wrapped [`Store`] synchronously when dropped.
///
/// Created with [`Store::scoped`]. Teardown runs on every exit path out of the
/// guard's scope, including `?` and unwinding. Errors raised from `Drop` can
/// only be logged; call [`StoreGuard::dispose`] to observe them.
#[must_use = "the store is disposed as soon as the guard is dropped"]
pub struct StoreGuard {
  store: Store,
  armed: bool,
}

impl StoreGuard {
  pub(crate) fn new(store: Store) -> Self {
    Self { store, armed: true }
  }

  /// Disposes now and returns the outcome instead of logging it.
  pub fn dispose(mut self) -> Result<()> {
    self.armed = false;
    self.store.dispose()
  }

  /// Releases the store without disposing it.
  pub fn into_inner(mut self) -> Store {
    self.armed = false;
    self.store.clone()
  }
}

impl Deref for StoreGuard {
  type Target = Store;

  fn deref(&self) -> &Store {
    &self.store
  }
}

impl Drop for StoreGuard {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    if let Err(err) = self.store.dispose() {
      tracing::warn!(
        store = self.store.display_label(),
        error = %err,
        "scoped store disposal failed"
      );
    }
  }
}
