use crate::db::{display_value, guard, value_to_json, Database};
use crate::error::PipelineError;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rows returned by a query, in order. Each row holds one value per entry of `columns`.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub execution_time_ms: u64,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// First `limit` rows as CSV with a header line.
    pub fn to_csv(&self, limit: usize) -> Result<String, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in self.rows.iter().take(limit) {
            writer.write_record(row.iter().map(display_value))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Column-aligned table for terminal output.
    pub fn to_text_table(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(display_value).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                cells
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let format_line = |values: Vec<&str>| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(value, width)| format!("{:<width$}", value, width = *width))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = format_line(self.columns.iter().map(String::as_str).collect());
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        out.push('\n');
        for row in &cells {
            out.push_str(&format_line(row.iter().map(String::as_str).collect()));
            out.push('\n');
        }
        out.push_str(&format!("({} row{})\n", self.row_count(), if self.row_count() == 1 { "" } else { "s" }));
        out
    }
}

/// One row viewed as a column name to value mapping.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [serde_json::Value],
}

#[cfg(test)]
impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a serde_json::Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

// Rows serialize as objects with keys in column order.
impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

struct RowList<'a>(&'a ResultSet);

impl Serialize for RowList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ResultSet", 4)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &RowList(self))?;
        state.serialize_field("row_count", &self.row_count())?;
        state.serialize_field("execution_time_ms", &self.execution_time_ms)?;
        state.end()
    }
}

fn execution_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::Execution(e.to_string())
}

/// Runs one guarded, read-only query and collects every row.
pub fn execute(db: &Database, sql: &str) -> Result<ResultSet, PipelineError> {
    guard::check_read_only(sql)?;

    let start_time = Instant::now();
    info!("Executing SQL query: {}", sql);

    let mut stmt = db.connection().prepare(sql).map_err(execution_err)?;

    if !stmt.readonly() {
        warn!("SQLite reports the statement as writable: {}", sql);
        return Err(PipelineError::UnsafeStatement(
            "statement would modify the database".to_string(),
        ));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let column_count = columns.len();

    let rows = stmt
        .query_map([], |row| {
            (0..column_count)
                .map(|i| row.get_ref(i).map(value_to_json))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(execution_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(execution_err)?;

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    info!(
        "Query executed successfully. Row count: {}, Execution time: {}ms",
        rows.len(),
        execution_time_ms
    );
    debug!("Columns: {:?}", columns);

    Ok(ResultSet {
        columns,
        rows,
        execution_time_ms,
    })
}
