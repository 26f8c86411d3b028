//! # Schema Materialization
//!
//! The provisioning code does not know individual table definitions. It asks a
//! [`SchemaDefinition`] to create everything it declares against a connection,
//! then checks the catalog for the tables it claims to own.

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Executor};
use tracing::debug;

/// Something that can emit "create all tables" DDL against a connection
#[async_trait]
pub trait SchemaDefinition: Send + Sync {
    /// Names of the tables `create_all` creates in the `public` schema
    fn table_names(&self) -> Vec<String>;

    /// Create every declared table
    ///
    /// Called once per worker database, inside a transaction opened by the
    /// caller.
    async fn create_all(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error>;
}

/// One table and the DDL that creates it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub ddl: String,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, ddl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ddl: ddl.into(),
        }
    }
}

/// Schema declared as an ordered list of table DDL statements
#[derive(Debug, Clone, Default)]
pub struct SqlSchema {
    tables: Vec<TableDefinition>,
}

impl SqlSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table; statements run in the order they were added
    pub fn table(mut self, name: impl Into<String>, ddl: impl Into<String>) -> Self {
        self.tables.push(TableDefinition::new(name, ddl));
        self
    }

    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }
}

#[async_trait]
impl SchemaDefinition for SqlSchema {
    fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    async fn create_all(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        for table in &self.tables {
            debug!(table = %table.name, "Creating table");
            conn.execute(table.ddl.as_str()).await?;
        }
        Ok(())
    }
}

/// Create all tables of `schema` in a single transaction
pub async fn materialize(
    conn: &mut PgConnection,
    schema: &dyn SchemaDefinition,
) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;
    schema.create_all(&mut tx).await?;
    tx.commit().await
}

/// Declared tables that are not present in the `public` schema
pub async fn missing_tables(
    conn: &mut PgConnection,
    schema: &dyn SchemaDefinition,
) -> Result<Vec<String>, sqlx::Error> {
    let declared = schema.table_names();
    if declared.is_empty() {
        return Ok(Vec::new());
    }

    let present: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_name = ANY($1)",
    )
    .bind(&declared)
    .fetch_all(&mut *conn)
    .await?;

    Ok(declared
        .into_iter()
        .filter(|name| !present.contains(name))
        .collect())
}
