use std::sync::Arc;
use thiserror::Error;

/// A boxed error as returned by fallible factories and teardown hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error a failed factory produced, shared between every caller that was
/// awaiting the same construction.
pub type ConstructionError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for the `fibre_store` library.
#[derive(Debug, Error)]
pub enum StoreError {
  /// `add` was called with a name that is already bound in the definition or
  /// anywhere in its parent chain. Use `override_with` to replace it.
  #[error("binding '{name}' is already registered; use override_with to replace it")]
  DuplicateBinding { name: Arc<str> },

  /// The name is bound neither locally nor in any ancestor store.
  #[error("no binding registered for '{name}'")]
  UnknownBinding { name: Arc<str> },

  /// Synchronous disposal reached a value that can only be torn down
  /// asynchronously.
  #[error("'{name}' can only be disposed asynchronously; use dispose_async instead")]
  SyncDisposeOfAsyncResource { name: Arc<str> },

  /// The factory itself failed. The factory's error is surfaced unchanged.
  #[error(transparent)]
  Construction(ConstructionError),

  /// The binding exists but produced a value of a different type.
  #[error("binding '{name}' does not hold a value of type {expected}")]
  TypeMismatch {
    name: Arc<str>,
    expected: &'static str,
  },

  /// A synchronous `get` hit an asynchronous binding that has not settled yet.
  #[error("binding '{name}' resolves asynchronously and has not settled; use get_async")]
  AsyncBinding { name: Arc<str> },

  /// A teardown hook returned an error.
  #[error("failed to dispose '{name}': {source}")]
  Teardown {
    name: Arc<str>,
    #[source]
    source: BoxError,
  },

  /// Several teardown hooks failed during an asynchronous disposal pass.
  #[error("{} teardowns failed during disposal", .0.len())]
  Disposal(Vec<StoreError>),
}

impl StoreError {
  /// The binding name this error refers to, if it refers to exactly one.
  pub fn binding_name(&self) -> Option<&str> {
    match self {
      StoreError::DuplicateBinding { name }
      | StoreError::UnknownBinding { name }
      | StoreError::SyncDisposeOfAsyncResource { name }
      | StoreError::TypeMismatch { name, .. }
      | StoreError::AsyncBinding { name }
      | StoreError::Teardown { name, .. } => Some(name),
      StoreError::Construction(_) | StoreError::Disposal(_) => None,
    }
  }
}

/// A specialized `Result` type for `fibre_store` operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
