use super::{QueryJob, TabularService};
use crate::error::{BqVizError, Result};
use crate::result::ResultSet;
use async_trait::async_trait;
use sqlparser::ast::{visit_relations, Statement};
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// In-memory stand-in for the warehouse.
///
/// Tables are registered by name with a canned result. A submitted query is
/// parsed with the BigQuery dialect; unparsable SQL or references to
/// unregistered tables are rejected the way the warehouse would. A response
/// registered for the exact SQL text takes precedence over the table's
/// canned result.
#[derive(Default)]
pub struct MockService {
    tables: HashMap<String, ResultSet>,
    responses: HashMap<String, ResultSet>,
    revoked: AtomicBool,
    offline: AtomicBool,
    history: Mutex<Vec<QueryJob>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: ResultSet) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    pub fn with_response(mut self, sql: impl Into<String>, rows: ResultSet) -> Self {
        self.responses.insert(sql.into(), rows);
        self
    }

    /// Simulate a credential revoked after the session was opened.
    pub fn revoke_credential(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<QueryJob> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    fn referenced_tables(statements: &[Statement]) -> BTreeSet<String> {
        let mut tables = BTreeSet::new();
        for statement in statements {
            let _ = visit_relations(statement, |relation| {
                let name: Vec<&str> = relation.0.iter().map(|ident| ident.value.as_str()).collect();
                tables.insert(name.join("."));
                ControlFlow::<()>::Continue(())
            });
        }
        tables
    }

    fn resolve_table<'a>(&'a self, name: &str, job: &QueryJob) -> Option<&'a ResultSet> {
        if let Some(rows) = self.tables.get(name) {
            return Some(rows);
        }
        // Unqualified names resolve against the default dataset.
        let dataset = job.default_dataset.as_ref()?;
        let qualified = [
            format!("{}.{}", dataset.dataset_id, name),
            format!("{}.{}.{}", dataset.project_id, dataset.dataset_id, name),
        ];
        qualified.iter().find_map(|q| self.tables.get(q))
    }
}

#[async_trait]
impl TabularService for MockService {
    async fn execute(&self, job: &QueryJob) -> Result<ResultSet> {
        if let Ok(mut history) = self.history.lock() {
            history.push(job.clone());
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(BqVizError::Transport(
                "error sending request: connection refused".to_string(),
            ));
        }
        if self.revoked.load(Ordering::SeqCst) {
            return Err(BqVizError::Authentication(
                "Request had invalid authentication credentials.".to_string(),
            ));
        }

        let statements = Parser::parse_sql(&BigQueryDialect {}, &job.sql)
            .map_err(|e| BqVizError::Query(format!("Syntax error: {}", e)))?;

        if let Some(rows) = self.responses.get(&job.sql) {
            return Ok(rows.clone());
        }

        let tables = Self::referenced_tables(&statements);
        debug!(tables = ?tables, "mock query");

        let mut result = None;
        for table in &tables {
            match self.resolve_table(table, job) {
                Some(rows) => {
                    result.get_or_insert(rows);
                }
                None => {
                    let dataset = job
                        .default_dataset
                        .as_ref()
                        .map(|d| format!("{}:{}", d.project_id, d.dataset_id))
                        .unwrap_or_else(|| job.billing_project.clone());
                    return Err(BqVizError::Query(format!(
                        "Not found: Table {}.{} was not found",
                        dataset, table
                    )));
                }
            }
        }

        result
            .cloned()
            .ok_or_else(|| BqVizError::Query("Query references no table".to_string()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
