use fibre_store::{define_store, AsyncDispose, BoxError, Provider, Store};
use futures_util::future::{BoxFuture, FutureExt};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct RemoteConfig {
  endpoint: String,
  retries: u32,
}

struct HttpClient {
  config: std::sync::Arc<RemoteConfig>,
}

impl AsyncDispose for HttpClient {
  fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>> {
    async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      println!("Drained connections to {}", self.config.endpoint);
      Ok(())
    }
    .boxed()
  }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let store = define_store()
    .add_async("config", |_: Store| async {
      println!("Fetching remote configuration...");
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok::<_, BoxError>(RemoteConfig {
        endpoint: "https://api.example.com".to_string(),
        retries: 3,
      })
    })?
    .add_provider(
      "client",
      Provider::future(|store: Store| async move {
        let config = store.get_async::<RemoteConfig>("config").await?;
        Ok::<_, BoxError>(HttpClient { config })
      })
      .async_disposable(),
    )?
    .finalize();

  // Both lookups join the same in-flight fetch; the config is loaded once.
  let (first, second) = tokio::join!(
    store.get_async::<HttpClient>("client"),
    store.get_async::<RemoteConfig>("config"),
  );
  let (client, config) = (first?, second?);
  println!(
    "Client targets {} with {} retries",
    client.config.endpoint, config.retries
  );

  // Settled async values are also readable synchronously.
  assert!(store.get::<RemoteConfig>("config").is_ok());

  store.dispose_async().await?;
  Ok(())
}
