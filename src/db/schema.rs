use crate::db::{display_value, quote_identifier, value_to_json, Database};
use crate::error::PipelineError;
use rusqlite::Connection;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Declared type as written in the DDL; SQLite allows it to be empty.
    pub declared_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub sample_rows: Vec<Vec<String>>,
}

/// Table and column metadata for every user table, rendered into the generation prompt.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableSchema>,
}

fn schema_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::Schema(e.to_string())
}

impl SchemaDescription {
    /// Reads the schema fresh from `db`, including up to `sample_rows` rows per table.
    pub fn introspect(db: &Database, sample_rows: usize) -> Result<Self, PipelineError> {
        let conn = db.connection();
        let table_names = list_tables(conn)?;

        if table_names.is_empty() {
            return Err(PipelineError::Schema(format!(
                "no tables found in {}",
                db.path().display()
            )));
        }

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns = describe_columns(conn, &name)?;
            let samples = if sample_rows > 0 {
                fetch_samples(conn, &name, sample_rows)?
            } else {
                Vec::new()
            };
            debug!("Table {} has {} columns", name, columns.len());
            tables.push(TableSchema {
                name,
                columns,
                sample_rows: samples,
            });
        }

        info!("Found {} tables in {}", tables.len(), db.path().display());
        Ok(Self { tables })
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn render(&self) -> String {
        let mut metadata = String::from("# DATABASE SCHEMA\n\n");

        for table in &self.tables {
            metadata.push_str(&format!("### Table: {}\n\n", table.name));
            metadata.push_str("| Column Name | Data Type | Nullable | Primary Key |\n");
            metadata.push_str("|-------------|-----------|----------|-------------|\n");

            for column in &table.columns {
                let data_type = if column.declared_type.is_empty() {
                    "ANY"
                } else {
                    column.declared_type.as_str()
                };
                metadata.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    column.name,
                    data_type,
                    if column.nullable { "YES" } else { "NO" },
                    if column.primary_key { "YES" } else { "" }
                ));
            }
            metadata.push('\n');

            if !table.sample_rows.is_empty() {
                metadata.push_str("#### Sample Data:\n\n");
                let header: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
                metadata.push_str(&format!("| {} |\n", header.join(" | ")));
                metadata.push_str(&format!("|{}\n", " --- |".repeat(header.len())));
                for row in &table.sample_rows {
                    metadata.push_str(&format!("| {} |\n", row.join(" | ")));
                }
                metadata.push('\n');
            }
        }

        metadata
    }
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn list_tables(conn: &Connection) -> Result<Vec<String>, PipelineError> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .map_err(schema_err)?;

    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(schema_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(schema_err)?;

    Ok(tables)
}

fn describe_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnSchema>, PipelineError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))
        .map_err(schema_err)?;

    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnSchema {
                name: row.get(1)?,
                declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                nullable: row.get::<_, i64>(3)? == 0,
                primary_key: row.get::<_, i64>(5)? > 0,
            })
        })
        .map_err(schema_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(schema_err)?;

    Ok(columns)
}

fn fetch_samples(conn: &Connection, table: &str, limit: usize) -> Result<Vec<Vec<String>>, PipelineError> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), limit))
        .map_err(schema_err)?;
    let column_count = stmt.column_count();

    let rows = stmt
        .query_map([], |row| {
            (0..column_count)
                .map(|i| row.get_ref(i).map(|v| display_value(&value_to_json(v))))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(schema_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(schema_err)?;

    Ok(rows)
}
