mod client;
mod mock;

pub use client::BqClient;
pub use mock::MockService;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::result::ResultSet;
use async_trait::async_trait;

/// One query submission: SQL plus the billing and default-dataset context
/// the warehouse needs to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryJob {
    pub sql: String,
    pub billing_project: String,
    pub default_dataset: Option<DatasetRef>,
    pub location: Option<String>,
    pub timeout_ms: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub project_id: String,
    pub dataset_id: String,
}

impl QueryJob {
    pub fn new(sql: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            sql: sql.into(),
            billing_project: config.billing_project.clone(),
            default_dataset: config.dataset.as_ref().map(|dataset| DatasetRef {
                project_id: config.data_project().to_string(),
                dataset_id: dataset.clone(),
            }),
            location: config.location.clone(),
            timeout_ms: config.timeout_ms,
        }
    }
}

/// A remote tabular-data service. Implementations report failures as
/// `Authentication`, `Query` or `Transport` errors and never retry.
#[async_trait]
pub trait TabularService: Send + Sync {
    async fn execute(&self, job: &QueryJob) -> Result<ResultSet>;

    fn name(&self) -> &'static str;
}
