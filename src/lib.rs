pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod query;
pub mod render;
pub mod result;
pub mod service;

pub use config::{Credential, PipelineConfig};
pub use error::{BqVizError, Result};
pub use loader::{PipelineDef, PipelineLoader, RenderDef};
pub use pipeline::{QueryPipeline, Session};
pub use query::{AggregateFn, Aggregation, CompareOp, Filter, Literal, OrderBy, QueryRequest};
pub use render::{render, MapMarker, RenderKind, RenderSpec, RenderedArtifact};
pub use result::{ColumnInfo, ColumnType, ResultRow, ResultSet, RowRef, Value};
pub use service::{BqClient, DatasetRef, MockService, QueryJob, TabularService};
