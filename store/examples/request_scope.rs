use fibre_store::{define_store, resolve, BoxError, Dispose, Provider, Store};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// --- Application Services ---

struct Database {
  url: String,
}

impl Database {
  fn query(&self, sql: &str) -> String {
    format!("[{}] {}", self.url, sql)
  }
}

impl Dispose for Database {
  fn dispose(&self) -> Result<(), BoxError> {
    println!("Closing database connection to {}", self.url);
    Ok(())
  }
}

struct RequestContext {
  id: usize,
  db: Arc<Database>,
}

impl Dispose for RequestContext {
  fn dispose(&self) -> Result<(), BoxError> {
    println!("Request #{} finished", self.id);
    Ok(())
  }
}

fn handle_request(
  app: &Store,
  next_id: &Arc<AtomicUsize>,
  path: &str,
) -> Result<String, BoxError> {
  let next_id = next_id.clone();
  // Every request gets its own child store; it is disposed when `scope` drops.
  let scope = app
    .create_child()
    .with_label("request")
    .add_provider(
      "ctx",
      Provider::new(move |store: &Store| RequestContext {
        id: next_id.fetch_add(1, Ordering::SeqCst) + 1,
        db: resolve!(store, Database, "db"),
      })
      .disposable(),
    )?
    .finalize()
    .scoped();

  let ctx = scope.get::<RequestContext>("ctx")?;
  Ok(ctx.db.query(&format!("SELECT * FROM pages WHERE path = '{path}'")))
}

fn main() -> Result<(), BoxError> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let app = define_store()
    .with_label("app")
    .add("url", |_| String::from("postgres://localhost/site"))?
    .add_provider(
      "db",
      Provider::new(|store: &Store| Database {
        url: resolve!(store, String, "url").to_string(),
      })
      .disposable(),
    )?
    .finalize();

  let next_id = Arc::new(AtomicUsize::new(0));
  for path in ["/", "/about", "/contact"] {
    println!("{}", handle_request(&app, &next_id, path)?);
  }

  // The database was shared by every request and is torn down last.
  app.dispose()?;
  Ok(())
}
