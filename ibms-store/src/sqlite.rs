use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use async_trait::async_trait;
use ibms_policy::ValidatedSql;
use ibms_types::ResultSet;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use tracing::{debug, info};

use crate::{DataError, DataPlane};

#[derive(Clone, Debug)]
pub struct SqliteConfig {
    pub path: PathBuf,
    pub pool_size: u32,
    pub query_timeout: Duration,
    /// Rows held in memory per result; further rows are only counted.
    pub max_materialized_rows: usize,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ibms.sqlite"),
            pool_size: 3,
            query_timeout: Duration::from_secs(30),
            max_materialized_rows: 10_000,
        }
    }
}

/// Pooled, read-only SQLite data plane.
///
/// Connections are opened read-only with `query_only` set, validated on
/// checkout, and held only for the duration of one statement.
pub struct SqliteDataPlane {
    pool: Pool<SqliteConnectionManager>,
    query_timeout: Duration,
    max_rows: usize,
}

impl SqliteDataPlane {
    pub fn open(cfg: &SqliteConfig) -> Result<Self, DataError> {
        if !cfg.path.exists() {
            return Err(DataError::new(format!(
                "database file not found: {}",
                cfg.path.display()
            )));
        }
        let manager = SqliteConnectionManager::file(&cfg.path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(|conn| {
                conn.pragma_update(None, "query_only", true)?;
                conn.busy_timeout(Duration::from_secs(5))
            });
        let pool = Pool::builder()
            .max_size(cfg.pool_size.max(1))
            .test_on_check_out(true)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| DataError::new(format!("cannot open database pool: {e}")))?;
        info!(path = %cfg.path.display(), pool_size = cfg.pool_size, "database pool ready");
        Ok(Self {
            pool,
            query_timeout: cfg.query_timeout,
            max_rows: cfg.max_materialized_rows,
        })
    }
}

#[async_trait]
impl DataPlane for SqliteDataPlane {
    async fn query(&self, sql: &ValidatedSql) -> Result<ResultSet, DataError> {
        let pool = self.pool.clone();
        let statement = sql.as_str().to_string();
        let max_rows = self.max_rows;
        let interrupt: Arc<Mutex<Option<InterruptHandle>>> = Arc::default();
        let slot = Arc::clone(&interrupt);

        let task = tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| DataError::new(format!("connection unavailable: {e}")))?;
            if let Ok(mut s) = slot.lock() {
                *s = Some(conn.get_interrupt_handle());
            }
            run_query(&conn, &statement, max_rows)
        });

        match tokio::time::timeout(self.query_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(DataError::new(format!("query task failed: {join}"))),
            Err(_) => {
                if let Ok(mut s) = interrupt.lock() {
                    if let Some(handle) = s.take() {
                        handle.interrupt();
                    }
                }
                Err(DataError::new(format!(
                    "query timed out after {}s",
                    self.query_timeout.as_secs_f32()
                )))
            }
        }
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<ResultSet, DataError> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(DataError::new("statement is not read-only"));
    }
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); names.len()];

    let mut total = 0usize;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if total < max_rows {
            for (idx, column) in columns.iter_mut().enumerate() {
                column.push(row.get::<_, Value>(idx)?);
            }
        }
        total += 1;
    }
    debug!(total, materialized = total.min(max_rows), "rows read");

    let batch = build_batch(&names, columns, total.min(max_rows))?;
    Ok(ResultSet::new(batch, total))
}

fn build_batch(names: &[String], columns: Vec<Vec<Value>>, rows: usize) -> Result<RecordBatch, DataError> {
    let mut fields = Vec::with_capacity(names.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(names.len());
    for (name, values) in names.iter().zip(columns) {
        let (data_type, array) = column_to_array(values);
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)
        .map_err(|e| DataError::new(format!("cannot build result batch: {e}")))
}

// SQLite is dynamically typed per cell: integer-only columns become Int64,
// numeric columns Float64, anything else Utf8.
fn column_to_array(values: Vec<Value>) -> (DataType, ArrayRef) {
    let any_int = values.iter().any(|v| matches!(v, Value::Integer(_)));
    let any_real = values.iter().any(|v| matches!(v, Value::Real(_)));
    let numeric = values
        .iter()
        .all(|v| matches!(v, Value::Null | Value::Integer(_) | Value::Real(_)));

    if numeric && any_int && !any_real {
        let array: Int64Array = values
            .into_iter()
            .map(|v| match v {
                Value::Integer(i) => Some(i),
                _ => None,
            })
            .collect();
        (DataType::Int64, Arc::new(array) as ArrayRef)
    } else if numeric && any_real {
        let array: Float64Array = values
            .into_iter()
            .map(|v| match v {
                Value::Integer(i) => Some(i as f64),
                Value::Real(f) => Some(f),
                _ => None,
            })
            .collect();
        (DataType::Float64, Arc::new(array) as ArrayRef)
    } else {
        let array: StringArray = values
            .into_iter()
            .map(|v| match v {
                Value::Null => None,
                Value::Integer(i) => Some(i.to_string()),
                Value::Real(f) => Some(f.to_string()),
                Value::Text(s) => Some(s),
                Value::Blob(b) => Some(format!("<{} bytes>", b.len())),
            })
            .collect();
        (DataType::Utf8, Arc::new(array) as ArrayRef)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use arrow::array::Array;
    use ibms_policy::{CandidateSql, SqlPolicy};

    use super::*;

    pub(crate) fn temp_db_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ibms-{label}-{}.sqlite", uuid::Uuid::new_v4()))
    }

    pub(crate) fn seed_travelers(path: &Path, rows: usize) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE travelers (traveler_id INTEGER PRIMARY KEY, full_name TEXT, nationality TEXT, risk_score REAL);",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO travelers (full_name, nationality, risk_score) VALUES (?1, ?2, ?3)",
                rusqlite::params![format!("Traveler {i}"), if i % 2 == 0 { "PK" } else { "AE" }, i as f64 / 2.0],
            )
            .unwrap();
        }
    }

    pub(crate) fn validated(sql: &str) -> ValidatedSql {
        SqlPolicy::ibms().validate(&CandidateSql::new(sql)).unwrap()
    }

    fn open(path: &Path, max_rows: usize, timeout: Duration) -> SqliteDataPlane {
        SqliteDataPlane::open(&SqliteConfig {
            path: path.to_path_buf(),
            pool_size: 2,
            query_timeout: timeout,
            max_materialized_rows: max_rows,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn query_materializes_typed_columns() {
        let path = temp_db_path("typed");
        seed_travelers(&path, 4);
        let plane = open(&path, 100, Duration::from_secs(5));

        let rs = plane
            .query(&validated("SELECT traveler_id, full_name, risk_score FROM travelers ORDER BY traveler_id"))
            .await
            .unwrap();
        assert_eq!(rs.total_rows(), 4);
        assert_eq!(rs.column_names(), vec!["traveler_id", "full_name", "risk_score"]);
        let schema = rs.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(2).data_type(), &DataType::Float64);

        let count = plane
            .query(&validated("SELECT COUNT(*) AS n FROM travelers"))
            .await
            .unwrap();
        let n = count.batch().column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(n.value(0), 4);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn materialization_is_bounded_but_count_is_exact() {
        let path = temp_db_path("bounded");
        seed_travelers(&path, 7);
        let plane = open(&path, 3, Duration::from_secs(5));

        let rs = plane.query(&validated("SELECT * FROM travelers")).await.unwrap();
        assert_eq!(rs.materialized_rows(), 3);
        assert_eq!(rs.total_rows(), 7);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn empty_result_keeps_columns() {
        let path = temp_db_path("empty");
        seed_travelers(&path, 2);
        let plane = open(&path, 100, Duration::from_secs(5));

        let rs = plane
            .query(&validated("SELECT full_name FROM travelers WHERE nationality = 'ZZ'"))
            .await
            .unwrap();
        assert!(rs.is_empty());
        assert_eq!(rs.column_names(), vec!["full_name"]);
        assert_eq!(rs.batch().column(0).null_count(), 0);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn unknown_column_is_an_error() {
        let path = temp_db_path("badcol");
        seed_travelers(&path, 1);
        let plane = open(&path, 100, Duration::from_secs(5));

        let err = plane
            .query(&validated("SELECT no_such_column FROM travelers"))
            .await
            .unwrap_err();
        assert!(err.message.contains("no_such_column"));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn runaway_query_times_out() {
        let path = temp_db_path("timeout");
        seed_travelers(&path, 1);
        let plane = open(&path, 100, Duration::from_millis(200));

        let err = plane
            .query(&validated(
                "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r) SELECT COUNT(*) FROM r, travelers",
            ))
            .await
            .unwrap_err();
        assert!(err.message.contains("timed out"), "{}", err.message);
    }

    #[test]
    fn missing_database_file_is_reported() {
        let cfg = SqliteConfig {
            path: temp_db_path("missing"),
            ..SqliteConfig::default()
        };
        let err = SqliteDataPlane::open(&cfg).err().unwrap();
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn mixed_cells_fall_back_to_text() {
        let (dt, array) = column_to_array(vec![
            Value::Integer(1),
            Value::Text("two".into()),
            Value::Null,
            Value::Blob(vec![0, 1, 2]),
        ]);
        assert_eq!(dt, DataType::Utf8);
        let strings = array.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(strings.value(0), "1");
        assert!(strings.is_null(2));
        assert_eq!(strings.value(3), "<3 bytes>");
    }
}
