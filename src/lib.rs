//! folio-schema - Schema reconciler for the portfolio site's backend
//!
//! Makes a hosted document store's schema match what the site expects,
//! tolerating whatever partial state earlier runs left behind.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Reconciler                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │   Config    │  │  SchemaSet  │  │   Reconciliation        │  │
//! │  │   (env)     │  │  (declared) │  │   Driver                │  │
//! │  └──────┬──────┘  └──────┬──────┘  └───────────┬─────────────┘  │
//! │         │                │                     │                │
//! │         ▼                ▼                     ▼                │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                    Remote (one database)                    ││
//! │  │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  ││
//! │  │  │  Schema     │  │  Schema     │  │  Data               │  ││
//! │  │  │  Inspector  │  │  Mutator    │  │  Migrator           │  ││
//! │  │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  ││
//! │  └─────────┼────────────────┼────────────────────┼─────────────┘│
//! │            ▼                ▼                    ▼              │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │              Transport (HTTP / in-memory)                   ││
//! │  │  error classification: not found, exists, unsupported, max  ││
//! │  └─────────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod migrate;
pub mod reconcile;
pub mod remote;
pub mod schema;
pub mod transport;
pub mod validation;

pub use error::{Error, Result};

pub use config::{Config, Environment, ReconcileOptions};
pub use reconcile::ReconcileReport;
pub use remote::{Document, Remote};
pub use schema::SchemaSet;
pub use transport::{HttpTransport, Transport};
#[cfg(any(test, feature = "test-util"))]
pub use transport::MemoryBackend;

/// The main reconciler handle
pub struct Reconciler<T> {
    remote: Remote<T>,
    schema: SchemaSet,
    options: ReconcileOptions,
}

impl Reconciler<HttpTransport> {
    /// Load configuration and connect over HTTP.
    ///
    /// Missing variables are reported before any transport is built.
    pub fn from_environment(
        env: &Environment,
        schema: SchemaSet,
        options: ReconcileOptions,
    ) -> Result<Self> {
        let config = Config::load(env)?;
        tracing::debug!("Loaded {:?}", config);
        let transport = HttpTransport::new(&config)?;
        Self::new(transport, config.database_id, schema, options)
    }
}

impl<T: Transport> Reconciler<T> {
    /// Create a reconciler over any transport; the schema is validated first
    pub fn new(
        transport: T,
        database_id: impl Into<String>,
        schema: SchemaSet,
        options: ReconcileOptions,
    ) -> Result<Self> {
        schema.validate()?;
        Ok(Self {
            remote: Remote::new(transport, database_id),
            schema,
            options,
        })
    }

    /// Converge the backend towards the schema
    pub async fn run(&self) -> ReconcileReport {
        tracing::info!(
            "Reconciling {} collection(s) in database {}",
            self.schema.collections.len(),
            self.remote.database_id()
        );
        reconcile::reconcile(&self.remote, &self.schema, &self.options).await
    }

    /// Ids of declared collections that do not exist yet (read-only)
    pub async fn missing_collections(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for collection in &self.schema.collections {
            if self.remote.find_collection(&collection.id).await?.is_none() {
                missing.push(collection.id.clone());
            }
        }
        Ok(missing)
    }
}
