//! ServerBuilder for fluent API to build HTTP servers

use super::exposure::GraphQLExposure;
use super::host::ServerHost;
use crate::config::MongokeConfig;
use crate::core::store::DocumentStore;
use anyhow::Result;
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builder for the GraphQL server of a configuration
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_config_file("mongoke.yml")?
///     .with_store(InMemoryStore::new())
///     .build()?;
/// ```
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<MongokeConfig>,
    store: Option<Arc<dyn DocumentStore>>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: MongokeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the configuration from a YAML file
    pub fn with_config_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let config = MongokeConfig::from_yaml_file(path)?;
        Ok(self.with_config(config))
    }

    /// Serve documents from `store` instead of the configured database
    pub fn with_store(self, store: impl DocumentStore + 'static) -> Self {
        self.with_store_arc(Arc::new(store))
    }

    pub fn with_store_arc(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add custom routes to the server
    ///
    /// # Example
    ///
    /// ```ignore
    /// let admin = Router::new().route("/admin/reload", post(reload_handler));
    ///
    /// ServerBuilder::new()
    ///     .with_config(config)
    ///     .with_custom_routes(admin)
    ///     .build()?;
    /// ```
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Connect to the configured database now
    ///
    /// Without this the MongoDB store connects on first use. Does nothing
    /// when a store was given explicitly.
    pub async fn connect(mut self) -> Result<Self> {
        if self.store.is_some() {
            return Ok(self);
        }
        let Some(config) = &self.config else {
            anyhow::bail!("A configuration is required. Call .with_config()");
        };
        let Some(uri) = config.database_uri() else {
            return Ok(self);
        };
        self.store = Some(Self::connect_store(uri, config).await?);
        tracing::info!("connected to the database");
        Ok(self)
    }

    #[cfg(feature = "mongodb_backend")]
    async fn connect_store(uri: &str, config: &MongokeConfig) -> Result<Arc<dyn DocumentStore>> {
        let id_fields = config.id_fields(&config.load_schema()?);
        let store = crate::storage::MongoStore::connect(uri, config.database.connect_timeout())
            .await?
            .with_id_fields(id_fields);
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "mongodb_backend"))]
    async fn connect_store(_uri: &str, _config: &MongokeConfig) -> Result<Arc<dyn DocumentStore>> {
        anyhow::bail!(
            "`database_uri` needs the 'mongodb_backend' feature. Enable it or call .with_store()"
        )
    }

    /// Build the transport-agnostic host
    ///
    /// Fails when the configuration is invalid or no store is available.
    pub fn build_host(&mut self) -> Result<ServerHost> {
        let config = self
            .config
            .take()
            .ok_or_else(|| anyhow::anyhow!("A configuration is required. Call .with_config()"))?;
        let store = match self.store.take() {
            Some(store) => store,
            None => Self::configured_store(&config)?,
        };
        Ok(ServerHost::from_config(config, store)?)
    }

    #[cfg(feature = "mongodb_backend")]
    fn configured_store(config: &MongokeConfig) -> Result<Arc<dyn DocumentStore>> {
        let uri = config.database_uri().ok_or_else(|| {
            anyhow::anyhow!("No store configured. Set `database_uri` or call .with_store()")
        })?;
        Ok(Arc::new(
            crate::storage::MongoStore::new(uri)
                .with_connect_timeout(config.database.connect_timeout())
                .with_id_fields(config.id_fields(&config.load_schema()?)),
        ))
    }

    #[cfg(not(feature = "mongodb_backend"))]
    fn configured_store(config: &MongokeConfig) -> Result<Arc<dyn DocumentStore>> {
        if config.database_uri().is_some() {
            anyhow::bail!(
                "`database_uri` needs the 'mongodb_backend' feature. Enable it or call .with_store()"
            );
        }
        anyhow::bail!("No store configured. Call .with_store()")
    }

    /// Build the final router
    ///
    /// The GraphQL routes and any custom routes, with CORS and HTTP tracing.
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);

        let mut app = GraphQLExposure::build_router(host)?;
        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Ok(app.layer(cors).layer(TraceLayer::new_for_http()))
    }

    /// Serve the application with graceful shutdown
    ///
    /// Handles SIGTERM and SIGINT (Ctrl+C).
    ///
    /// # Example
    ///
    /// ```ignore
    /// ServerBuilder::new()
    ///     .with_config_file("mongoke.yml")?
    ///     .connect()
    ///     .await?
    ///     .serve("127.0.0.1:4000")
    ///     .await?;
    /// ```
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
