//! Public macros for ergonomic service resolution.

/// Resolves a required service from a store, panicking if it cannot be
/// resolved.
///
/// Use this where a missing or failing dependency is a wiring bug rather than
/// a runtime condition. For a non-panicking version, call `Store::get` or
/// `Store::get_async` directly.
///
/// # Panics
///
/// Panics with the resolution error if the name is unknown, the stored type
/// differs, or the factory fails.
///
/// # Examples
///
/// ```
/// use fibre_store::{define_store, resolve};
///
/// let store = define_store()
///   .add("greeting", |_| String::from("hello"))
///   .unwrap()
///   .finalize();
///
/// let greeting = resolve!(store, String, "greeting");
/// assert_eq!(*greeting, "hello");
/// ```
///
/// Inside an `async` context, prefix the store with `async` to await an
/// asynchronous binding:
///
/// ```
/// use fibre_store::{define_store, resolve, BoxError};
///
/// # futures_executor::block_on(async {
/// let store = define_store()
///   .add_async("port", |_| async { Ok::<_, BoxError>(8080_u16) })
///   .unwrap()
///   .finalize();
///
/// let port = resolve!(async store, u16, "port");
/// assert_eq!(*port, 8080);
/// # });
/// ```
#[macro_export]
macro_rules! resolve {
  // Arm for awaiting a service: resolve!(async store, MyService, "name")
  (async $store:expr, $type:ty, $name:expr) => {{
    let name = $name;
    $store
      .get_async::<$type>(name)
      .await
      .unwrap_or_else(|err| {
        panic!(
          "Failed to resolve required service '{}' as {}: {}",
          name,
          std::any::type_name::<$type>(),
          err
        )
      })
  }};

  // Arm for a synchronous service: resolve!(store, MyService, "name")
  ($store:expr, $type:ty, $name:expr) => {{
    let name = $name;
    $store.get::<$type>(name).unwrap_or_else(|err| {
      panic!(
        "Failed to resolve required service '{}' as {}: {}",
        name,
        std::any::type_name::<$type>(),
        err
      )
    })
  }};
}
