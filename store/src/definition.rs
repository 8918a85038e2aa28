//! The immutable builder that accumulates bindings and produces a `Store`.

use crate::error::{BoxError, Result, StoreError};
use crate::provider::{Binding, Lifetime, Provider};
use crate::store::Store;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub(crate) type Bindings = Arc<HashMap<Arc<str>, Arc<Binding>>>;

/// Starts an empty definition with no parent.
pub fn define_store() -> StoreDefinition {
  StoreDefinition::default()
}

/// An append-only set of bindings, optionally layered over a parent [`Store`].
///
/// Every builder method consumes the definition and returns a new one, so a
/// definition can be cloned and extended along independent branches without
/// either branch observing the other's additions. Cloning is cheap; the
/// binding map is only copied when a shared definition is extended.
///
/// Names are unique across the whole chain: `add` refuses a name that is
/// already bound here or in any ancestor store, and the `override_*` methods
/// are the only way to shadow or replace an existing binding.
#[derive(Clone, Default)]
pub struct StoreDefinition {
  label: Option<Arc<str>>,
  bindings: Bindings,
  parent: Option<Store>,
}

impl StoreDefinition {
  pub(crate) fn with_parent(parent: Store) -> Self {
    Self {
      label: None,
      bindings: Bindings::default(),
      parent: Some(parent),
    }
  }

  // --- PRIVATE HELPERS ---

  fn insert(mut self, binding: Binding) -> Self {
    tracing::trace!(
      binding = %binding.name,
      lifetime = ?binding.lifetime,
      "registering binding"
    );
    Arc::make_mut(&mut self.bindings).insert(binding.name.clone(), Arc::new(binding));
    self
  }

  fn bind<T: Any + Send + Sync>(
    self,
    name: &str,
    provider: Provider<T>,
    lifetime: Lifetime,
  ) -> Result<Self> {
    if self.contains(name) {
      return Err(StoreError::DuplicateBinding {
        name: Arc::from(name),
      });
    }
    let binding = provider.into_binding(Arc::from(name), lifetime);
    Ok(self.insert(binding))
  }

  fn rebind<T: Any + Send + Sync>(self, name: &str, provider: Provider<T>) -> Result<Self> {
    let lifetime = match self.bindings.get(name) {
      Some(existing) => existing.lifetime,
      None => self
        .parent
        .as_ref()
        .and_then(|parent| parent.locate(name))
        .map(|(_, inherited)| inherited.lifetime)
        .ok_or_else(|| StoreError::UnknownBinding {
          name: Arc::from(name),
        })?,
    };
    let binding = provider.into_binding(Arc::from(name), lifetime);
    Ok(self.insert(binding))
  }

  // --- PUBLIC API ---

  /// Attaches a label used in `Debug` output and log fields.
  pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
    self.label = Some(label.into());
    self
  }

  // --- Singleton Registration ---

  /// Registers a synchronous singleton. The factory is not invoked until the
  /// first `get`.
  pub fn add<T, F>(self, name: &str, factory: F) -> Result<Self>
  where
    T: Any + Send + Sync,
    F: Fn(&Store) -> T + Send + Sync + 'static,
  {
    self.bind(name, Provider::new(factory), Lifetime::Singleton)
  }

  /// Registers an asynchronous singleton, resolved through
  /// [`Store::get_async`].
  pub fn add_async<T, E, F, Fut>(self, name: &str, factory: F) -> Result<Self>
  where
    T: Any + Send + Sync,
    E: Into<BoxError>,
    F: Fn(Store) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.bind(name, Provider::future(factory), Lifetime::Singleton)
  }

  pub fn add_provider<T: Any + Send + Sync>(
    self,
    name: &str,
    provider: Provider<T>,
  ) -> Result<Self> {
    self.bind(name, provider, Lifetime::Singleton)
  }

  // --- Transient Registration ---

  /// Registers a synchronous transient; every `get` invokes the factory.
  pub fn add_transient<T, F>(self, name: &str, factory: F) -> Result<Self>
  where
    T: Any + Send + Sync,
    F: Fn(&Store) -> T + Send + Sync + 'static,
  {
    self.bind(name, Provider::new(factory), Lifetime::Transient)
  }

  pub fn add_transient_async<T, E, F, Fut>(self, name: &str, factory: F) -> Result<Self>
  where
    T: Any + Send + Sync,
    E: Into<BoxError>,
    F: Fn(Store) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.bind(name, Provider::future(factory), Lifetime::Transient)
  }

  pub fn add_transient_provider<T: Any + Send + Sync>(
    self,
    name: &str,
    provider: Provider<T>,
  ) -> Result<Self> {
    self.bind(name, provider, Lifetime::Transient)
  }

  // --- Overrides ---

  /// Replaces the factory of an existing binding, keeping its lifetime.
  ///
  /// A binding inherited from an ancestor store is shadowed for stores
  /// finalized from this definition only; the ancestor is unchanged. Fails
  /// with [`StoreError::UnknownBinding`] if `name` is bound nowhere.
  pub fn override_with<T, F>(self, name: &str, factory: F) -> Result<Self>
  where
    T: Any + Send + Sync,
    F: Fn(&Store) -> T + Send + Sync + 'static,
  {
    self.rebind(name, Provider::new(factory))
  }

  pub fn override_with_async<T, E, F, Fut>(self, name: &str, factory: F) -> Result<Self>
  where
    T: Any + Send + Sync,
    E: Into<BoxError>,
    F: Fn(Store) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.rebind(name, Provider::future(factory))
  }

  pub fn override_provider<T: Any + Send + Sync>(
    self,
    name: &str,
    provider: Provider<T>,
  ) -> Result<Self> {
    self.rebind(name, provider)
  }

  // --- Inspection ---

  /// Returns `true` if `name` is bound here or in any ancestor store.
  pub fn contains(&self, name: &str) -> bool {
    self.bindings.contains_key(name)
      || self
        .parent
        .as_ref()
        .map_or(false, |parent| parent.has(name))
  }

  /// Names bound directly in this definition, in no particular order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.bindings.keys().map(|name| &**name)
  }

  pub fn parent(&self) -> Option<&Store> {
    self.parent.as_ref()
  }

  /// Freezes the current bindings into a new [`Store`]. No factory runs.
  ///
  /// Each call yields an independent store with its own memo table.
  pub fn finalize(&self) -> Store {
    Store::new(self.label.clone(), self.bindings.clone(), self.parent.clone())
  }
}

impl fmt::Debug for StoreDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut bindings: Vec<&Arc<Binding>> = self.bindings.values().collect();
    bindings.sort_by(|a, b| a.name.cmp(&b.name));
    f.debug_struct("StoreDefinition")
      .field("label", &self.label)
      .field("bindings", &bindings)
      .field("parent", &self.parent)
      .finish()
  }
}
