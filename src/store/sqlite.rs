use crate::error::{Result, UpsertError};
use crate::store::{sql, BatchSink, KeyLookup};
use crate::types::{FieldValue, Row};
use rusqlite::limits::Limit;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rows per statement when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// The single connection a pipeline owns for its whole lifetime.
pub struct SqliteStore {
    conn: Connection,
    page_size: usize,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        info!("Opened store at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Caps the rows bound into one statement; a flush still runs in one transaction.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn execute_batch(&self, statements: &str) -> Result<()> {
        self.conn.execute_batch(statements)?;
        Ok(())
    }

    /// Releases the connection, surfacing any error the engine reports on close.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| UpsertError::Database(e))?;
        debug!("Store connection closed");
        Ok(())
    }

    /// Most parameters SQLite accepts in one statement on this connection.
    pub fn variable_limit(&self) -> usize {
        let limit = self.conn.limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER);
        usize::try_from(limit).unwrap_or(0).max(1)
    }

    /// Rows per statement: the configured page size, capped so that
    /// `rows * width` stays within the variable limit.
    fn rows_per_page(&self, width: usize) -> usize {
        let cap = (self.variable_limit() / width.max(1)).max(1);
        if cap < self.page_size {
            debug!(
                "Page size {} exceeds {} rows of {} values; capping",
                self.page_size, cap, width
            );
        }
        self.page_size.min(cap)
    }

    fn write_pages<F>(&mut self, table: &str, rows: &[Row], statement: F) -> Result<usize>
    where
        F: Fn(usize) -> String,
    {
        let write_error = |statement: String, source| UpsertError::Write {
            table: table.to_string(),
            statement: sql::abbreviate(&statement),
            rows: rows.len(),
            source,
        };

        let page_size = self.rows_per_page(rows.first().map_or(1, Vec::len));
        let tx = self
            .conn
            .transaction()
            .map_err(|e| write_error("BEGIN".into(), e))?;

        let mut affected = 0;
        for page in rows.chunks(page_size) {
            let sql = statement(page.len());
            let result = tx.execute(&sql, params_from_iter(page.iter().flatten()));
            match result {
                Ok(n) => affected += n,
                Err(source) => {
                    if let Err(e) = tx.rollback() {
                        warn!("Rollback on {} failed: {}", table, e);
                    }
                    return Err(write_error(sql, source));
                }
            }
        }

        tx.commit().map_err(|e| write_error("COMMIT".into(), e))?;
        Ok(affected)
    }

    fn select_chunk(
        &self,
        table: &str,
        primary_key: &str,
        referenced_field: &str,
        values: &[FieldValue],
    ) -> Result<Vec<(FieldValue, FieldValue)>> {
        let statement = sql::select_references(table, primary_key, referenced_field, values.len());
        let lookup_error = |source| UpsertError::Lookup {
            table: table.to_string(),
            statement: sql::abbreviate(&statement),
            source,
        };

        let mut stmt = self.conn.prepare(&statement).map_err(lookup_error)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, FieldValue>(0)?, row.get::<_, FieldValue>(1)?))
            })
            .map_err(lookup_error)?;
        let pairs = rows.collect::<rusqlite::Result<Vec<_>>>();
        pairs.map_err(lookup_error)
    }
}

impl KeyLookup for SqliteStore {
    fn select_references(
        &self,
        table: &str,
        primary_key: &str,
        referenced_field: &str,
        values: &[FieldValue],
    ) -> Result<Vec<(FieldValue, FieldValue)>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let chunk_size = self.variable_limit();
        if values.len() <= chunk_size {
            return self.select_chunk(table, primary_key, referenced_field, values);
        }

        // One read transaction so every chunk sees the same snapshot.
        let tx = self.conn.unchecked_transaction().map_err(|source| UpsertError::Lookup {
            table: table.to_string(),
            statement: "BEGIN".into(),
            source,
        })?;
        let mut pairs = Vec::new();
        for chunk in values.chunks(chunk_size) {
            pairs.extend(self.select_chunk(table, primary_key, referenced_field, chunk)?);
        }
        tx.commit().map_err(|source| UpsertError::Lookup {
            table: table.to_string(),
            statement: "COMMIT".into(),
            source,
        })?;
        debug!(
            "Looked up {} values on {} in {} chunks",
            values.len(),
            table,
            values.len().div_ceil(chunk_size)
        );
        Ok(pairs)
    }

    fn exists(&self, table: &str, matches: &[(&str, &FieldValue)]) -> Result<bool> {
        let fields: Vec<&str> = matches.iter().map(|(field, _)| *field).collect();
        let statement = sql::exists(table, &fields);
        let found = self
            .conn
            .query_row(&statement, params_from_iter(matches.iter().map(|(_, v)| *v)), |row| {
                row.get::<_, bool>(0)
            });
        found.map_err(|source| UpsertError::ExistenceCheck {
            table: table.to_string(),
            statement,
            source,
        })
    }
}

impl BatchSink for SqliteStore {
    fn create(&mut self, table: &str, fields: &[String], rows: &[Row]) -> Result<usize> {
        self.write_pages(table, rows, |n| sql::insert(table, fields, n))
    }

    fn update(
        &mut self,
        table: &str,
        fields: &[String],
        match_fields: &[String],
        rows: &[Row],
    ) -> Result<usize> {
        self.write_pages(table, rows, |n| sql::update(table, fields, match_fields, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap().with_page_size(2);
        store
            .execute_batch(
                "CREATE TABLE products_tag (id TEXT PRIMARY KEY, name TEXT NOT NULL, group_id INTEGER);",
            )
            .unwrap();
        store
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn count(store: &SqliteStore) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM products_tag", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_create_spans_pages_in_one_transaction() {
        let mut store = store();
        let rows: Vec<Row> = (0..5)
            .map(|i| vec![FieldValue::from(format!("t{i}")), FieldValue::from(format!("Tag {i}"))])
            .collect();

        let created = store.create("products_tag", &fields(&["id", "name"]), &rows).unwrap();
        assert_eq!(created, 5);
        assert_eq!(count(&store), 5);
    }

    #[test]
    fn test_pages_shrink_to_fit_the_variable_limit() {
        let mut store = store().with_page_size(100);
        store
            .connection()
            .set_limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER, 7);
        assert_eq!(store.variable_limit(), 7);

        // 3 values per row: at most 2 rows fit in one statement.
        let names = fields(&["id", "name", "group_id"]);
        let rows: Vec<Row> = (0..5)
            .map(|i| vec![format!("t{i}").into(), format!("Tag {i}").into(), FieldValue::from(i)])
            .collect();
        assert_eq!(store.create("products_tag", &names, &rows).unwrap(), 5);
        assert_eq!(count(&store), 5);

        let renamed: Vec<Row> = rows
            .iter()
            .map(|r| vec![r[0].clone(), "Renamed".into(), r[2].clone()])
            .collect();
        assert_eq!(
            store.update("products_tag", &names, &fields(&["id"]), &renamed).unwrap(),
            5
        );
    }

    #[test]
    fn test_reference_lookup_is_chunked_past_the_variable_limit() {
        let mut store = store();
        let rows: Vec<Row> = (0..10)
            .map(|i| vec![format!("t{i}").into(), format!("code{}", i % 7).into()])
            .collect();
        store.create("products_tag", &fields(&["id", "name"]), &rows).unwrap();
        store
            .connection()
            .set_limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER, 3);

        let wanted: Vec<FieldValue> = (0..7).map(|i| format!("code{i}").into()).collect();
        let pairs = store
            .select_references("products_tag", "id", "name", &wanted)
            .unwrap();
        assert_eq!(pairs.len(), 10);
        let mut found: Vec<String> = pairs.iter().map(|(_, code)| code.lookup_key()).collect();
        found.sort();
        found.dedup();
        assert_eq!(found.len(), 7);
    }

    #[test]
    fn test_lookup_error_keeps_statement_short() {
        let store = store();
        let wanted: Vec<FieldValue> = (0..1000).map(|i| FieldValue::from(i)).collect();
        let err = store
            .select_references("missing_table", "id", "code", &wanted)
            .unwrap_err();
        let statement = err.statement().unwrap();
        assert!(statement.starts_with(r#"SELECT "id", "code" FROM "missing_table""#));
        assert!(statement.len() < 300);
    }

    #[test]
    fn test_failed_page_rolls_back_earlier_pages() {
        let mut store = store();
        // Third row repeats the first key, so the second page violates the primary key.
        let rows: Vec<Row> = vec![
            vec!["a".into(), "A".into()],
            vec!["b".into(), "B".into()],
            vec!["a".into(), "again".into()],
        ];

        let err = store
            .create("products_tag", &fields(&["id", "name"]), &rows)
            .unwrap_err();
        assert!(matches!(err, UpsertError::Write { rows: 3, .. }));
        assert!(err.statement().unwrap().starts_with("INSERT INTO \"products_tag\""));
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn test_update_joins_on_match_fields() {
        let mut store = store();
        let names = fields(&["id", "name", "group_id"]);
        store
            .create(
                "products_tag",
                &names,
                &[vec!["a".into(), "A".into(), 1.into()], vec!["b".into(), "B".into(), 1.into()]],
            )
            .unwrap();

        let updated = store
            .update(
                "products_tag",
                &names,
                &fields(&["id"]),
                &[vec!["b".into(), "B2".into(), 9.into()]],
            )
            .unwrap();
        assert_eq!(updated, 1);

        let (name, group): (String, i64) = store
            .connection()
            .query_row("SELECT name, group_id FROM products_tag WHERE id = 'b'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "B2");
        assert_eq!(group, 9);
    }

    #[test]
    fn test_exists_binds_values() {
        let mut store = store();
        store
            .create("products_tag", &fields(&["id", "name"]), &[vec!["x'y".into(), "Quote".into()]])
            .unwrap();

        let key = FieldValue::from("x'y");
        assert!(store.exists("products_tag", &[("id", &key)]).unwrap());
        let other = FieldValue::from("' OR '1'='1");
        assert!(!store.exists("products_tag", &[("id", &other)]).unwrap());
    }

    #[test]
    fn test_existence_check_error_is_typed() {
        let store = store();
        let key = FieldValue::from("a");
        let err = store.exists("missing_table", &[("id", &key)]).unwrap_err();
        assert!(matches!(err, UpsertError::ExistenceCheck { .. }));
    }

    #[test]
    fn test_open_on_disk_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let store = SqliteStore::open(&path, Duration::from_millis(100)).unwrap();
        store.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        store.close().unwrap();
        assert!(path.exists());
    }
}
