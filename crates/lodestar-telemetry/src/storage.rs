//! Database handle and backend setup.
//!
//! A [`Storage`] owns one root DuckDB connection. Every ingestion or query
//! works on its own clone of that connection inside a blocking task, so
//! statements never run on the async runtime threads.
//!
//! # Backends
//!
//! - **Local**: a single DuckDB file. Its parent directory is created on open.
//! - **Lake**: DuckLake with a PostgreSQL catalog and data files in
//!   S3-compatible storage. The `ducklake` and `postgres` extensions are
//!   installed, credentials are registered as DuckDB secrets and the lake is
//!   attached and selected with `USE`. `USE` is per connection, so every
//!   clone re-selects the lake before running anything.
//! - **Memory**: an in-memory database, gone on close.
//!
//! Table creation is idempotent: opening an existing database leaves its
//! tables and rows alone.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use duckdb::Connection;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use crate::config::{CatalogConfig, QueryConfig, S3Config, StorageConfig, TelemetryConfig};
use crate::schema::{escape_literal, quote_ident, Table, TableNames};
use crate::TelemetryError;

/// Which database the handle is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local { path: PathBuf },
    Lake { alias: String },
    Memory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "local:{}", path.display()),
            Self::Lake { alias } => write!(f, "ducklake:{alias}"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Open telemetry database.
pub struct Storage {
    root: Mutex<Connection>,
    backend: Backend,
    tables: Arc<TableNames>,
    query: QueryConfig,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend)
            .field("tables", &self.tables)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Open the configured backend and make sure every table exists.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened, lake setup fails, or a table
    /// cannot be created.
    #[tracing::instrument(skip_all)]
    pub async fn open(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let (backend, setup) = match &config.storage {
            StorageConfig::Local { path } => (Backend::Local { path: path.clone() }, None),
            StorageConfig::Memory => (Backend::Memory, None),
            StorageConfig::Lake {
                catalog,
                s3,
                data_path,
                alias,
            } => (
                Backend::Lake {
                    alias: alias.clone(),
                },
                Some(lake_setup_sql(catalog, s3, data_path, alias)),
            ),
        };

        let tables = Arc::new(config.tables.clone());
        let names = Arc::clone(&tables);
        let target = backend.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = connect(&target)?;
            if let Some(sql) = setup {
                conn.execute_batch(sql.expose_secret())?;
            }
            create_tables(&conn, &names)?;
            Ok::<_, TelemetryError>(conn)
        })
        .await??;

        tracing::info!(backend = %backend, "telemetry storage ready");

        Ok(Self {
            root: Mutex::new(conn),
            backend,
            tables,
            query: config.query.clone(),
        })
    }

    /// Close the root connection.
    ///
    /// Connections handed out by [`Storage::connection`] stay usable until
    /// they are dropped.
    pub fn close(self) -> Result<(), TelemetryError> {
        let conn = self
            .root
            .into_inner()
            .map_err(|_| TelemetryError::Task("connection lock poisoned".to_owned()))?;
        conn.close().map_err(|(_, err)| TelemetryError::from(err))?;
        tracing::info!(backend = %self.backend, "telemetry storage closed");
        Ok(())
    }

    /// A fresh connection to the same database, with the lake selected.
    pub fn connection(&self) -> Result<Connection, TelemetryError> {
        let conn = {
            let root = self
                .root
                .lock()
                .map_err(|_| TelemetryError::Task("connection lock poisoned".to_owned()))?;
            root.try_clone()?
        };
        if let Backend::Lake { alias } = &self.backend {
            conn.execute_batch(&format!("USE {}", quote_ident(alias)))?;
        }
        Ok(conn)
    }

    /// Create any missing table. Existing tables are left untouched.
    pub async fn create_tables(&self, cancel: &CancellationToken) -> Result<(), TelemetryError> {
        let names = self.tables();
        self.run(cancel, move |conn, _| create_tables(conn, &names))
            .await
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Configured table names.
    pub fn tables(&self) -> Arc<TableNames> {
        Arc::clone(&self.tables)
    }

    pub fn query_config(&self) -> &QueryConfig {
        &self.query
    }

    /// Run `op` on a fresh connection inside a blocking task.
    pub(crate) async fn run<T, F>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, TelemetryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &CancellationToken) -> Result<T, TelemetryError> + Send + 'static,
    {
        ensure_active(cancel)?;
        let conn = self.connection()?;
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || op(&conn, &cancel)).await?
    }
}

/// Fail with [`TelemetryError::Cancelled`] once the token is cancelled.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<(), TelemetryError> {
    if cancel.is_cancelled() {
        Err(TelemetryError::Cancelled)
    } else {
        Ok(())
    }
}

fn connect(backend: &Backend) -> Result<Connection, TelemetryError> {
    match backend {
        Backend::Local { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Connection::open(path)?)
        }
        Backend::Lake { .. } | Backend::Memory => Ok(Connection::open_in_memory()?),
    }
}

fn create_tables(conn: &Connection, names: &TableNames) -> Result<(), TelemetryError> {
    for table in Table::ALL {
        let name = table.name(names);
        conn.execute_batch(&table.create_sql(names))
            .map_err(TelemetryError::storage("create table", name))?;
        tracing::debug!(table = name, "table ready");
    }
    Ok(())
}

/// Statements that register lake credentials and attach the lake.
///
/// The rendered SQL embeds both secrets, so it is kept wrapped.
pub(crate) fn lake_setup_sql(
    catalog: &CatalogConfig,
    s3: &S3Config,
    data_path: &str,
    alias: &str,
) -> SecretString {
    let mut s3_options = vec![
        "TYPE s3".to_owned(),
        "PROVIDER config".to_owned(),
        format!("KEY_ID '{}'", escape_literal(&s3.key_id)),
        format!("SECRET '{}'", escape_literal(s3.secret.expose_secret())),
        format!("REGION '{}'", escape_literal(&s3.region)),
    ];
    if let Some(endpoint) = &s3.endpoint {
        s3_options.push(format!("ENDPOINT '{}'", escape_literal(endpoint)));
    }
    s3_options.push(format!(
        "URL_STYLE '{}'",
        if s3.path_style { "path" } else { "vhost" }
    ));
    s3_options.push(format!("USE_SSL {}", s3.use_ssl));

    let attach = format!("ducklake:postgres:dbname={}", catalog.database);
    let sql = format!(
        "INSTALL ducklake;\n\
         LOAD ducklake;\n\
         INSTALL postgres;\n\
         LOAD postgres;\n\
         CREATE OR REPLACE SECRET (\n    {s3}\n);\n\
         CREATE OR REPLACE SECRET (\n    TYPE postgres,\n    HOST '{host}',\n    PORT {port},\n    \
         DATABASE '{database}',\n    USER '{user}',\n    PASSWORD '{password}'\n);\n\
         ATTACH '{attach}' AS {alias} (DATA_PATH '{data_path}');\n\
         USE {alias};",
        s3 = s3_options.join(",\n    "),
        host = escape_literal(&catalog.host),
        port = catalog.port,
        database = escape_literal(&catalog.database),
        user = escape_literal(&catalog.user),
        password = escape_literal(catalog.password.expose_secret()),
        attach = escape_literal(&attach),
        alias = quote_ident(alias),
        data_path = escape_literal(data_path),
    );
    SecretString::from(sql)
}
