//! Execution of prepared statements with a per-session result cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{TranslateError, TranslateResult};
use crate::schema::Schema;
use crate::types::Value;

use super::{Database, Prepared, StatementKind};

/// Runs rendered SQL against a connection.
pub trait Executor {
    /// Run a SELECT and return its rows, each `width` values wide.
    fn query(&mut self, sql: &str, args: &[Value], width: usize) -> TranslateResult<Vec<Vec<Value>>>;

    /// Run a statement that changes data and return the affected row count.
    fn execute(&mut self, sql: &str, args: &[Value]) -> TranslateResult<u64>;
}

/// Rendered text plus concrete arguments.
type ResultKey = (String, Vec<Value>);

/// A unit of work over one executor.
///
/// Fetched results are cached by statement and arguments until the session
/// writes. A write marks the session modified; the next [`flush`] or fetch
/// drops every cached result.
///
/// [`flush`]: Session::flush
pub struct Session<E> {
    schema: Arc<Schema>,
    executor: E,
    results: HashMap<ResultKey, Arc<Vec<Value>>>,
    result_cache: bool,
    modified: bool,
}

impl<E: Executor> Session<E> {
    pub fn new(db: &Database, executor: E) -> Self {
        Self {
            schema: Arc::clone(&db.schema),
            executor,
            results: HashMap::new(),
            result_cache: db.settings.result_cache,
            modified: false,
        }
    }

    pub fn executor(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn cached_results(&self) -> usize {
        self.results.len()
    }

    /// Run a SELECT and decode its rows.
    pub fn fetch(&mut self, prepared: &Prepared) -> TranslateResult<Arc<Vec<Value>>> {
        if prepared.kind != StatementKind::Select {
            return Err(TranslateError::Execution(
                "Only SELECT statements can be fetched".into(),
            ));
        }
        self.flush();
        let use_cache = self.result_cache && prepared.cacheable;
        let key = (prepared.sql.clone(), prepared.args.clone());
        if use_cache {
            if let Some(rows) = self.results.get(&key) {
                tracing::debug!(target: "gensql::session", sql = %prepared.sql, "result cache hit");
                return Ok(Arc::clone(rows));
            }
        }
        let raw = self
            .executor
            .query(&prepared.sql, &prepared.args, prepared.layout.width())?;
        let mut rows = Vec::with_capacity(raw.len());
        for row in &raw {
            rows.push(prepared.layout.decode(&self.schema, row)?);
        }
        tracing::debug!(
            target: "gensql::session",
            sql = %prepared.sql,
            rows = rows.len(),
            cached = use_cache,
            "fetched"
        );
        let rows = Arc::new(rows);
        if use_cache {
            self.results.insert(key, Arc::clone(&rows));
        }
        Ok(rows)
    }

    /// The single value of an aggregate or the first row, if any.
    pub fn fetch_one(&mut self, prepared: &Prepared) -> TranslateResult<Option<Value>> {
        Ok(self.fetch(prepared)?.first().cloned())
    }

    /// Run a DELETE and mark the session modified.
    pub fn execute(&mut self, prepared: &Prepared) -> TranslateResult<u64> {
        if prepared.kind != StatementKind::Delete {
            return Err(TranslateError::Execution(
                "Only DELETE statements can be executed".into(),
            ));
        }
        let affected = self.executor.execute(&prepared.sql, &prepared.args)?;
        self.record_write();
        Ok(affected)
    }

    /// Note a write made outside this session's statements.
    pub fn record_write(&mut self) {
        self.modified = true;
    }

    /// Drop cached results if the session wrote since the last flush.
    pub fn flush(&mut self) {
        if self.modified {
            tracing::debug!(
                target: "gensql::session",
                dropped = self.results.len(),
                "flushing result cache"
            );
            self.results.clear();
            self.modified = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::extract::Vars;
    use crate::schema::SchemaBuilder;
    use crate::types::CanonicalType;

    #[derive(Default)]
    struct Recorder {
        queries: usize,
        rows: Vec<Vec<Value>>,
    }

    impl Executor for Recorder {
        fn query(&mut self, _sql: &str, _args: &[Value], _width: usize) -> TranslateResult<Vec<Vec<Value>>> {
            self.queries += 1;
            Ok(self.rows.clone())
        }

        fn execute(&mut self, _sql: &str, _args: &[Value]) -> TranslateResult<u64> {
            Ok(1)
        }
    }

    fn db(result_cache: bool) -> Database {
        let schema = SchemaBuilder::new()
            .entity("Student", |e| {
                e.pk("id", CanonicalType::INT)
                    .required("name", CanonicalType::Text)
            })
            .build()
            .unwrap();
        Database::new(
            schema,
            Settings {
                result_cache,
                ..Settings::default()
            },
        )
    }

    fn recorder() -> Recorder {
        Recorder {
            queries: 0,
            rows: vec![vec![Value::from("Ann")]],
        }
    }

    #[test]
    fn test_results_are_cached_until_a_write() {
        let db = db(true);
        let prepared = db
            .select("s.name for s in Student", &Vars::new())
            .unwrap()
            .prepare()
            .unwrap();
        let mut session = Session::new(&db, recorder());
        let first = session.fetch(&prepared).unwrap();
        let second = session.fetch(&prepared).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(session.executor().queries, 1);
        assert_eq!(*first, vec![Value::from("Ann")]);

        session.record_write();
        assert!(session.is_modified());
        session.fetch(&prepared).unwrap();
        assert_eq!(session.executor().queries, 2);
        assert!(!session.is_modified());
    }

    #[test]
    fn test_cache_can_be_disabled() {
        let db = db(false);
        let prepared = db
            .select("s.name for s in Student", &Vars::new())
            .unwrap()
            .prepare()
            .unwrap();
        let mut session = Session::new(&db, recorder());
        session.fetch(&prepared).unwrap();
        session.fetch(&prepared).unwrap();
        assert_eq!(session.executor().queries, 2);
        assert_eq!(session.cached_results(), 0);
    }

    #[test]
    fn test_delete_marks_the_session_modified() {
        let db = db(true);
        let query = db.select("s for s in Student", &Vars::new()).unwrap();
        let mut session = Session::new(&db, recorder());
        assert!(session.fetch(&query.delete().unwrap()).is_err());
        assert_eq!(session.execute(&query.delete().unwrap()).unwrap(), 1);
        assert!(session.is_modified());
        session.flush();
        assert!(!session.is_modified());
    }
}
