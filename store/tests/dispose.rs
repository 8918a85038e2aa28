use fibre_store::{
  define_store, AsyncDispose, BoxError, Dispose, Provider, Store, StoreDefinition, StoreError,
};
use futures_util::future::{BoxFuture, FutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

// --- Test Fixtures ---

/// Records teardown calls as "<name>:sync" / "<name>:async".
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  fn record(&self, entry: String) {
    self.0.lock().unwrap().push(entry);
  }

  fn entries(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }
}

struct SyncResource {
  name: &'static str,
  journal: Journal,
}

impl Dispose for SyncResource {
  fn dispose(&self) -> Result<(), BoxError> {
    self.journal.record(format!("{}:sync", self.name));
    Ok(())
  }
}

struct AsyncResource {
  name: &'static str,
  journal: Journal,
}

impl AsyncDispose for AsyncResource {
  fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>> {
    async move {
      sleep(Duration::from_millis(5)).await;
      self.journal.record(format!("{}:async", self.name));
      Ok(())
    }
    .boxed()
  }
}

/// Supports both teardown paths.
struct DualResource {
  journal: Journal,
}

impl Dispose for DualResource {
  fn dispose(&self) -> Result<(), BoxError> {
    self.journal.record("dual:sync".to_string());
    Ok(())
  }
}

impl AsyncDispose for DualResource {
  fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>> {
    async move {
      self.journal.record("dual:async".to_string());
      Ok(())
    }
    .boxed()
  }
}

struct FailingResource;

impl Dispose for FailingResource {
  fn dispose(&self) -> Result<(), BoxError> {
    Err("socket already closed".into())
  }
}

impl AsyncDispose for FailingResource {
  fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>> {
    async { Err::<(), BoxError>("flush timed out".into()) }.boxed()
  }
}

fn sync_resource(
  definition: StoreDefinition,
  name: &'static str,
  journal: &Journal,
) -> StoreDefinition {
  let journal = journal.clone();
  definition
    .add_provider(
      name,
      Provider::new(move |_: &Store| SyncResource {
        name,
        journal: journal.clone(),
      })
      .disposable(),
    )
    .unwrap()
}

fn async_resource(
  definition: StoreDefinition,
  name: &'static str,
  journal: &Journal,
) -> StoreDefinition {
  let journal = journal.clone();
  definition
    .add_provider(
      name,
      Provider::new(move |_: &Store| AsyncResource {
        name,
        journal: journal.clone(),
      })
      .async_disposable(),
    )
    .unwrap()
}

// --- Disposal Tests ---

#[test]
fn test_dispose_only_touches_constructed_values() {
  // Arrange
  let journal = Journal::default();
  let definition = sync_resource(define_store(), "used", &journal);
  let store = sync_resource(definition, "unused", &journal).finalize();
  store.get::<SyncResource>("used").unwrap();

  // Act
  store.dispose().unwrap();

  // Assert
  assert_eq!(journal.entries(), vec!["used:sync"]);
  assert!(!store.is_constructed("used"));
}

#[test]
fn test_dispose_runs_newest_first_and_only_once() {
  let journal = Journal::default();
  let definition = sync_resource(define_store(), "first", &journal);
  let definition = sync_resource(definition, "second", &journal);
  let store = sync_resource(definition, "third", &journal).finalize();
  for name in ["first", "second", "third"] {
    store.get::<SyncResource>(name).unwrap();
  }

  store.dispose().unwrap();
  store.dispose().unwrap();

  assert_eq!(
    journal.entries(),
    vec!["third:sync", "second:sync", "first:sync"]
  );
}

#[test]
fn test_values_without_teardown_are_skipped() {
  let store = define_store()
    .add("plain", |_| String::from("no teardown"))
    .unwrap()
    .finalize();
  store.get::<String>("plain").unwrap();

  assert!(store.dispose().is_ok());
}

#[test]
fn test_child_dispose_leaves_parent_values() {
  // Arrange
  let journal = Journal::default();
  let app = sync_resource(define_store(), "pool", &journal).finalize();
  let request = sync_resource(app.create_child(), "session", &journal).finalize();
  request.get::<SyncResource>("pool").unwrap();
  request.get::<SyncResource>("session").unwrap();

  // Act
  request.dispose().unwrap();

  // Assert
  assert_eq!(journal.entries(), vec!["session:sync"]);
  assert!(app.is_constructed("pool"));

  app.dispose().unwrap();
  assert_eq!(journal.entries(), vec!["session:sync", "pool:sync"]);
}

#[test]
fn test_sync_dispose_of_async_only_value_fails_and_stops() {
  // Arrange: "older" is constructed first, so it would be disposed last.
  let journal = Journal::default();
  let definition = sync_resource(define_store(), "older", &journal);
  let store = async_resource(definition, "newer", &journal).finalize();
  store.get::<SyncResource>("older").unwrap();
  store.get::<AsyncResource>("newer").unwrap();

  // Act
  let err = store.dispose().unwrap_err();

  // Assert
  assert!(matches!(
    err,
    StoreError::SyncDisposeOfAsyncResource { ref name } if &**name == "newer"
  ));
  assert!(journal.entries().is_empty());
  assert!(store.is_constructed("older"));
  assert!(store.is_constructed("newer"));
}

#[test]
fn test_sync_teardown_failure_is_reported() {
  let store = define_store()
    .add_provider("socket", Provider::new(|_| FailingResource).disposable())
    .unwrap()
    .finalize();
  store.get::<FailingResource>("socket").unwrap();

  let err = store.dispose().unwrap_err();

  assert_eq!(err.binding_name(), Some("socket"));
  assert!(err.to_string().contains("socket already closed"));
}

#[tokio::test]
async fn test_async_dispose_prefers_async_teardown() {
  // Arrange
  let journal = Journal::default();
  let store = define_store()
    .add_provider(
      "dual",
      Provider::new({
        let journal = journal.clone();
        move |_: &Store| DualResource {
          journal: journal.clone(),
        }
      })
      .disposable()
      .async_disposable(),
    )
    .unwrap()
    .finalize();
  store.get::<DualResource>("dual").unwrap();

  // Act
  store.dispose_async().await.unwrap();

  // Assert
  assert_eq!(journal.entries(), vec!["dual:async"]);
}

#[tokio::test]
async fn test_async_dispose_handles_mixed_capabilities() {
  let journal = Journal::default();
  let definition = sync_resource(define_store(), "sync_only", &journal);
  let definition = async_resource(definition, "async_only", &journal);
  let store = definition
    .add("plain", |_| 7_u8)
    .unwrap()
    .finalize();
  store.get::<SyncResource>("sync_only").unwrap();
  store.get::<AsyncResource>("async_only").unwrap();
  store.get::<u8>("plain").unwrap();

  store.dispose_async().await.unwrap();

  let mut entries = journal.entries();
  entries.sort();
  assert_eq!(entries, vec!["async_only:async", "sync_only:sync"]);
  assert!(!store.is_constructed("plain"));
}

#[tokio::test]
async fn test_async_dispose_attempts_everything_and_aggregates_failures() {
  let journal = Journal::default();
  let definition = define_store()
    .add_provider("first", Provider::new(|_| FailingResource).async_disposable())
    .unwrap()
    .add_provider("second", Provider::new(|_| FailingResource).disposable())
    .unwrap();
  let store = async_resource(definition, "healthy", &journal).finalize();
  for name in ["first", "second"] {
    store.get::<FailingResource>(name).unwrap();
  }
  store.get::<AsyncResource>("healthy").unwrap();

  let err = store.dispose_async().await.unwrap_err();

  match err {
    StoreError::Disposal(failures) => {
      let mut names: Vec<_> = failures
        .iter()
        .filter_map(|failure| failure.binding_name())
        .collect();
      names.sort();
      assert_eq!(names, vec!["first", "second"]);
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(journal.entries(), vec!["healthy:async"]);
}

#[tokio::test]
async fn test_async_singleton_is_disposed_after_settling() {
  let journal = Journal::default();
  let store = define_store()
    .add_provider(
      "remote",
      Provider::future({
        let journal = journal.clone();
        move |_: Store| {
          let journal = journal.clone();
          async move {
            sleep(Duration::from_millis(5)).await;
            Ok::<_, BoxError>(AsyncResource {
              name: "remote",
              journal,
            })
          }
        }
      })
      .async_disposable(),
    )
    .unwrap()
    .finalize();

  store.get_async::<AsyncResource>("remote").await.unwrap();
  store.dispose_async().await.unwrap();

  assert_eq!(journal.entries(), vec!["remote:async"]);
}

#[test]
fn test_guard_disposes_on_every_exit_path() {
  fn handle(request: &StoreDefinition, fail: bool) -> Result<(), StoreError> {
    let scope = request.finalize().scoped();
    scope.get::<SyncResource>("session")?;
    if fail {
      return Err(StoreError::UnknownBinding {
        name: "user".into(),
      });
    }
    Ok(())
  }

  // Arrange
  let journal = Journal::default();
  let app = define_store().finalize();
  let request = sync_resource(app.create_child(), "session", &journal);

  // Act
  assert!(handle(&request, true).is_err());
  assert!(handle(&request, false).is_ok());
  {
    let guard = request.finalize().scoped();
    guard.get::<SyncResource>("session").unwrap();
  }

  // Assert
  assert_eq!(journal.entries(), vec!["session:sync"; 3]);
}

#[test]
fn test_guard_explicit_dispose_and_release() {
  let journal = Journal::default();
  let definition = sync_resource(define_store(), "cache", &journal);

  let guard = definition.finalize().scoped();
  guard.get::<SyncResource>("cache").unwrap();
  guard.dispose().unwrap();
  assert_eq!(journal.entries(), vec!["cache:sync"]);

  let guard = definition.finalize().scoped();
  guard.get::<SyncResource>("cache").unwrap();
  let store = guard.into_inner();
  assert_eq!(journal.entries(), vec!["cache:sync"]);
  assert!(store.is_constructed("cache"));
}

#[tokio::test]
async fn test_run_scoped_disposes_after_body() {
  let journal = Journal::default();
  let store = async_resource(define_store(), "conn", &journal).finalize();

  let name = store
    .run_scoped(|store| async move {
      let conn = store.get::<AsyncResource>("conn").unwrap();
      conn.name
    })
    .await
    .unwrap();

  assert_eq!(name, "conn");
  assert_eq!(journal.entries(), vec!["conn:async"]);
  assert!(!store.is_constructed("conn"));
}

#[tokio::test]
async fn test_run_scoped_disposes_when_body_panics() {
  let journal = Journal::default();
  let store = async_resource(define_store(), "conn", &journal).finalize();

  let outcome = AssertUnwindSafe(store.run_scoped(|store| async move {
    let conn = store.get::<AsyncResource>("conn").unwrap();
    if conn.name == "conn" {
      panic!("handler crashed");
    }
    conn.name
  }))
  .catch_unwind()
  .await;

  assert!(outcome.is_err());
  assert_eq!(journal.entries(), vec!["conn:async"]);
  assert!(!store.is_constructed("conn"));
}
