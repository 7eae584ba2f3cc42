use super::{QueryJob, TabularService};
use crate::config::Credential;
use crate::error::{BqVizError, Result};
use crate::result::{ColumnInfo, ColumnType, ResultSet, Value};
use async_trait::async_trait;
use gcp_bigquery_client::error::{BQError, NestedResponseError};
use gcp_bigquery_client::model::dataset_reference::DatasetReference;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest as BqQueryRequest;
use gcp_bigquery_client::model::query_response::QueryResponse;
use gcp_bigquery_client::Client;
use tracing::{debug, info};

/// 403 reasons that mean the caller was throttled rather than refused.
const THROTTLED_REASONS: &[&str] = &["quotaExceeded", "rateLimitExceeded"];

/// 403 reasons that mean the credential itself lacks permission.
const DENIED_REASONS: &[&str] = &["accessDenied", "forbidden", "insufficientPermissions"];

/// BigQuery-backed `TabularService`.
#[derive(Clone)]
pub struct BqClient {
    client: Client,
}

impl BqClient {
    /// Build an authenticated client from service-account key contents.
    /// Token exchange happens lazily on the first request.
    pub async fn from_credential(credential: &Credential) -> Result<Self> {
        let key = gcp_bigquery_client::yup_oauth2::parse_service_account_key(
            credential.contents(),
        )
        .map_err(|e| {
            BqVizError::Authentication(format!(
                "Invalid service account key {}: {}",
                credential.source().display(),
                e
            ))
        })?;

        let client = Client::from_service_account_key(key, false)
            .await
            .map_err(map_bq_error)?;

        info!(source = %credential.source().display(), "BigQuery client ready");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn build_request(job: &QueryJob) -> BqQueryRequest {
        let mut request = BqQueryRequest::new(job.sql.clone());
        request.use_legacy_sql = false;
        request.timeout_ms = Some(job.timeout_ms);
        request.location = job.location.clone();
        request.default_dataset = job.default_dataset.as_ref().map(|d| DatasetReference {
            dataset_id: d.dataset_id.clone(),
            project_id: d.project_id.clone(),
        });
        request
    }

    async fn fetch_page(
        &self,
        job: &QueryJob,
        next: &NextPage,
    ) -> Result<QueryResponse> {
        let params = GetQueryResultsParameters {
            page_token: next.page_token.clone(),
            location: next.location.clone().or_else(|| job.location.clone()),
            timeout_ms: Some(job.timeout_ms),
            ..Default::default()
        };
        let page = self
            .client
            .job()
            .get_query_results(&job.billing_project, &next.job_id, params)
            .await
            .map_err(map_bq_error)?;
        Ok(page.into())
    }
}

#[async_trait]
impl TabularService for BqClient {
    async fn execute(&self, job: &QueryJob) -> Result<ResultSet> {
        let request = Self::build_request(job);
        let first = self
            .client
            .job()
            .query(&job.billing_project, request)
            .await
            .map_err(map_bq_error)?;

        let mut pages = PageCollector::default();
        let mut next = pages.absorb(first)?;
        while let Some(cursor) = next {
            debug!(
                job_id = %cursor.job_id,
                fetched = pages.rows.len(),
                waiting = cursor.page_token.is_none(),
                "Fetching query results"
            );
            let page = self.fetch_page(job, &cursor).await?;
            next = pages.absorb(page)?;
        }
        pages.finish()
    }

    fn name(&self) -> &'static str {
        "bigquery"
    }
}

/// Where to read the next batch of results for a running or paged job.
#[derive(Debug, Clone, PartialEq)]
struct NextPage {
    job_id: String,
    location: Option<String>,
    /// `None` while the job is still running.
    page_token: Option<String>,
}

/// Accumulates rows across `jobs.query` and `jobs.getQueryResults` pages.
#[derive(Debug, Default)]
struct PageCollector {
    columns: Option<Vec<ColumnInfo>>,
    rows: Vec<Vec<Value>>,
}

impl PageCollector {
    /// Decode one page and say where the next one is, if anywhere.
    fn absorb(&mut self, page: QueryResponse) -> Result<Option<NextPage>> {
        if let Some(errors) = page.errors.as_ref().filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors.iter().filter_map(|e| e.message.clone()).collect();
            if !messages.is_empty() && page.rows.is_none() {
                return Err(BqVizError::Query(messages.join("; ")));
            }
        }

        let complete = page.job_complete != Some(false);
        if complete {
            if self.columns.is_none() {
                self.columns = page.schema.as_ref().map(|s| {
                    s.fields
                        .as_deref()
                        .unwrap_or_default()
                        .iter()
                        .map(|field| {
                            let type_name = format!("{:?}", field.r#type);
                            ColumnInfo::new(field.name.clone(), ColumnType::from_bq_type(&type_name))
                        })
                        .collect()
                });
            }
            let columns = self.columns.as_deref().unwrap_or_default();
            for row in page.rows.unwrap_or_default() {
                let cells = row.columns.unwrap_or_default();
                self.rows.push(
                    columns
                        .iter()
                        .enumerate()
                        .map(|(idx, column)| {
                            Value::from_bq_cell(
                                cells.get(idx).and_then(|c| c.value.as_ref()),
                                column.column_type,
                            )
                        })
                        .collect(),
                );
            }
            if page.page_token.is_none() {
                return Ok(None);
            }
        }

        let reference = page.job_reference.unwrap_or_default();
        let job_id = reference.job_id.ok_or_else(|| {
            BqVizError::Transport(
                "BigQuery returned a partial result without a job reference".to_string(),
            )
        })?;
        Ok(Some(NextPage {
            job_id,
            location: reference.location,
            page_token: if complete { page.page_token } else { None },
        }))
    }

    fn finish(self) -> Result<ResultSet> {
        ResultSet::new(self.columns.unwrap_or_default(), self.rows)
    }
}

fn map_bq_error(err: BQError) -> BqVizError {
    match err {
        BQError::ResponseError { error } => classify_response(error.error),
        BQError::RequestError(e) => BqVizError::Transport(e.to_string()),
        e @ (BQError::InvalidServiceAccountKey(_)
        | BQError::InvalidServiceAccountAuthenticator(_)
        | BQError::AuthError(_)
        | BQError::YupAuthError(_)
        | BQError::NoToken) => BqVizError::Authentication(e.to_string()),
        other => BqVizError::Transport(other.to_string()),
    }
}

fn classify_response(nested: NestedResponseError) -> BqVizError {
    let reasons: Vec<&str> = nested
        .errors
        .iter()
        .filter_map(|e| e.get("reason").map(String::as_str))
        .collect();
    let has_reason = |set: &[&str]| reasons.iter().any(|r| set.contains(r));

    match nested.code {
        401 => BqVizError::Authentication(nested.message),
        429 => BqVizError::Transport(nested.message),
        403 if has_reason(THROTTLED_REASONS) => BqVizError::Transport(nested.message),
        403 if reasons.is_empty() || has_reason(DENIED_REASONS) => {
            BqVizError::Authentication(nested.message)
        }
        code if code >= 500 => BqVizError::Transport(nested.message),
        _ => BqVizError::Query(nested.message),
    }
}
