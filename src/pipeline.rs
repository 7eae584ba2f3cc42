use crate::config::{Credential, PipelineConfig};
use crate::error::Result;
use crate::query::QueryRequest;
use crate::render::{self, RenderKind, RenderSpec, RenderedArtifact};
use crate::result::ResultSet;
use crate::service::{BqClient, QueryJob, TabularService};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Explicit connection context: configuration plus an authenticated
/// service. Immutable once opened and cheap to clone.
#[derive(Clone)]
pub struct Session {
    config: Arc<PipelineConfig>,
    service: Arc<dyn TabularService>,
}

impl Session {
    /// Load the credential once and open a BigQuery-backed session.
    pub async fn open(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let credential = Credential::load(config.credentials_path.as_deref())?;
        let client = BqClient::from_credential(&credential).await?;
        Ok(Self::with_service(config, Arc::new(client)))
    }

    pub fn with_service(config: PipelineConfig, service: Arc<dyn TabularService>) -> Self {
        Self {
            config: Arc::new(config),
            service,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn service_name(&self) -> &'static str {
        self.service.name()
    }
}

pub struct QueryPipeline {
    session: Session,
}

impl QueryPipeline {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn translate(&self, request: &QueryRequest) -> Result<String> {
        request.to_sql()
    }

    /// Translate and run one request. Errors from the service are returned
    /// as-is and nothing is retried.
    pub async fn submit(&self, request: &QueryRequest) -> Result<ResultSet> {
        let sql = self.translate(request)?;
        let job = QueryJob::new(sql, self.session.config());

        info!(
            service = self.session.service_name(),
            source = %request.source,
            "Submitting query"
        );
        debug!(sql = %job.sql);

        let started = Instant::now();
        match self.session.service.execute(&job).await {
            Ok(rows) => {
                info!(
                    rows = rows.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query complete"
                );
                Ok(rows)
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "Query failed");
                Err(e)
            }
        }
    }

    pub fn render(
        rows: &ResultSet,
        kind: RenderKind,
        spec: &RenderSpec,
    ) -> Result<RenderedArtifact> {
        render::render(rows, kind, spec)
    }

    pub async fn submit_and_render(
        &self,
        request: &QueryRequest,
        kind: RenderKind,
        spec: &RenderSpec,
    ) -> Result<(ResultSet, RenderedArtifact)> {
        let rows = self.submit(request).await?;
        let artifact = Self::render(&rows, kind, spec)?;
        Ok((rows, artifact))
    }
}
