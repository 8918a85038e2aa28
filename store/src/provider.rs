//! Typed factory descriptions and their type-erased binding form.

use crate::dispose::{AsyncDispose, Dispose, Teardown};
use crate::error::BoxError;
use crate::store::Store;
use futures_util::future::{BoxFuture, FutureExt};
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A constructed service, shared between the memo table and every caller.
pub(crate) type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) type SyncFactory = Arc<dyn Fn(&Store) -> Result<Instance, BoxError> + Send + Sync>;
pub(crate) type AsyncFactory =
  Arc<dyn Fn(Store) -> BoxFuture<'static, Result<Instance, BoxError>> + Send + Sync>;

/// How long a constructed value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
  /// Constructed at most once per [`Store`], then memoized.
  Singleton,
  /// Constructed anew on every resolution, never memoized.
  Transient,
}

#[derive(Clone)]
pub(crate) enum Construct {
  Sync(SyncFactory),
  Async(AsyncFactory),
}

/// A registered binding: a name, a lifetime, and how to build and tear down
/// the value.
pub(crate) struct Binding {
  pub(crate) name: Arc<str>,
  pub(crate) lifetime: Lifetime,
  pub(crate) construct: Construct,
  pub(crate) teardown: Teardown,
  pub(crate) type_name: &'static str,
}

impl Binding {
  pub(crate) fn is_async(&self) -> bool {
    matches!(self.construct, Construct::Async(_))
  }
}

impl fmt::Debug for Binding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (sync_dispose, async_dispose) = self.teardown.capabilities();
    f.debug_struct("Binding")
      .field("name", &self.name)
      .field("lifetime", &self.lifetime)
      .field("type", &self.type_name)
      .field("async", &self.is_async())
      .field("dispose", &sync_dispose)
      .field("async_dispose", &async_dispose)
      .finish()
  }
}

/// Describes how to construct a `T` and which teardown capabilities it has.
///
/// Most registrations go through the shorthand methods on
/// [`StoreDefinition`](crate::StoreDefinition) (`add`, `add_async`, ...). Use a
/// `Provider` directly when the factory is fallible or the value needs to be
/// disposed:
///
/// ```
/// use fibre_store::{define_store, BoxError, Dispose, Provider};
///
/// struct Pool;
///
/// impl Dispose for Pool {
///   fn dispose(&self) -> Result<(), BoxError> {
///     Ok(())
///   }
/// }
///
/// let store = define_store()
///   .add_provider("pool", Provider::new(|_| Pool).disposable())
///   .unwrap()
///   .finalize();
///
/// store.get::<Pool>("pool").unwrap();
/// store.dispose().unwrap();
/// ```
pub struct Provider<T> {
  construct: Construct,
  teardown: Teardown,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Provider<T> {
  fn from_construct(construct: Construct) -> Self {
    Self {
      construct,
      teardown: Teardown::default(),
      _marker: PhantomData,
    }
  }

  /// A synchronous factory that cannot fail.
  pub fn new<F>(factory: F) -> Self
  where
    F: Fn(&Store) -> T + Send + Sync + 'static,
  {
    Self::from_construct(Construct::Sync(Arc::new(move |store: &Store| {
      erase(Ok::<T, BoxError>(factory(store)))
    })))
  }

  /// A synchronous factory whose error is surfaced unchanged by `get`.
  pub fn fallible<F, E>(factory: F) -> Self
  where
    F: Fn(&Store) -> Result<T, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    Self::from_construct(Construct::Sync(Arc::new(move |store: &Store| {
      erase(factory(store))
    })))
  }

  /// An asynchronous factory. It receives an owned handle to the store so the
  /// returned future can resolve further dependencies.
  pub fn future<F, Fut, E>(factory: F) -> Self
  where
    F: Fn(Store) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    Self::from_construct(Construct::Async(Arc::new(move |store: Store| {
      let pending = factory(store);
      async move { erase(pending.await) }.boxed()
    })))
  }

  /// Tears the value down with [`Dispose`] when its store is disposed.
  pub fn disposable(mut self) -> Self
  where
    T: Dispose,
  {
    self.teardown = self.teardown.with_sync::<T>();
    self
  }

  /// Tears the value down with [`AsyncDispose`] when its store is disposed.
  pub fn async_disposable(mut self) -> Self
  where
    T: AsyncDispose,
  {
    self.teardown = self.teardown.with_async::<T>();
    self
  }

  pub(crate) fn into_binding(self, name: Arc<str>, lifetime: Lifetime) -> Binding {
    Binding {
      name,
      lifetime,
      construct: self.construct,
      teardown: self.teardown,
      type_name: type_name::<T>(),
    }
  }
}

fn erase<T, E>(outcome: Result<T, E>) -> Result<Instance, BoxError>
where
  T: Any + Send + Sync,
  E: Into<BoxError>,
{
  match outcome {
    Ok(value) => Ok(Arc::new(value)),
    Err(err) => Err(err.into()),
  }
}

impl<T> fmt::Debug for Provider<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (sync_dispose, async_dispose) = self.teardown.capabilities();
    f.debug_struct("Provider")
      .field("type", &type_name::<T>())
      .field("async", &matches!(self.construct, Construct::Async(_)))
      .field("dispose", &sync_dispose)
      .field("async_dispose", &async_dispose)
      .finish()
  }
}
