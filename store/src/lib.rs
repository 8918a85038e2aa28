//! # Fibre Store
//!
//! A scoped, lazily-resolving dependency-injection store for Rust.
//!
//! Services are registered by name as factories on an immutable
//! [`StoreDefinition`], which is frozen into a [`Store`]. The store constructs
//! each service on first request, memoizes singletons, hands out transients
//! fresh every time, and tears down what it built when it is disposed.
//!
//! ## Core Concepts
//!
//! - **Definition**: an append-only set of bindings. Every builder call returns
//!   a new definition, so a base definition can be extended along several
//!   independent branches.
//! - **Store**: the finalized container. Resolution is lazy; factories receive
//!   the store so they can resolve their own dependencies.
//! - **Singletons & Transients**: a singleton is built at most once per store,
//!   including when several async callers race for it before it settles. A
//!   transient is built on every request and never memoized.
//! - **Scopes**: [`Store::create_child`] starts a definition layered over an
//!   existing store. Shared services live in the parent, per-operation
//!   services in children; a child never disposes its parent's values.
//! - **Teardown**: values registered through a [`Provider`] may declare
//!   [`Dispose`] and/or [`AsyncDispose`]; [`Store::dispose`],
//!   [`Store::dispose_async`], [`Store::scoped`] and [`Store::run_scoped`]
//!   release them.
//!
//! ## Quick Start
//!
//! ```
//! use fibre_store::{define_store, Store};
//! use std::sync::Arc;
//!
//! struct Config {
//!   database_url: String,
//! }
//!
//! struct Database {
//!   url: String,
//! }
//!
//! struct RequestContext {
//!   db: Arc<Database>,
//!   request_id: u64,
//! }
//!
//! // Application-lifetime services.
//! let app = define_store()
//!   .add("config", |_| Config {
//!     database_url: "postgres://localhost/app".to_string(),
//!   })
//!   .unwrap()
//!   .add("db", |store: &Store| {
//!     let config = store.get::<Config>("config").unwrap();
//!     Database { url: config.database_url.clone() }
//!   })
//!   .unwrap()
//!   .finalize();
//!
//! // One child store per request, sharing the application's singletons.
//! let request = app
//!   .create_child()
//!   .add("context", |store: &Store| RequestContext {
//!     db: store.get::<Database>("db").unwrap(),
//!     request_id: 7,
//!   })
//!   .unwrap()
//!   .finalize();
//!
//! let context = request.get::<RequestContext>("context").unwrap();
//! assert_eq!(context.request_id, 7);
//! assert!(Arc::ptr_eq(&context.db, &app.get::<Database>("db").unwrap()));
//! assert_eq!(context.db.url, "postgres://localhost/app");
//! ```

mod definition;
mod dispose;
mod error;
mod macros;
mod memo;
mod provider;
mod store;

pub use definition::{define_store, StoreDefinition};
pub use dispose::{AsyncDispose, Dispose, StoreGuard};
pub use error::{BoxError, ConstructionError, Result, StoreError};
pub use provider::{Lifetime, Provider};
pub use store::Store;
