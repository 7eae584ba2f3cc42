mod request;
mod sql_builder;

pub use request::{
    AggregateFn, Aggregation, CompareOp, Filter, Literal, OrderBy, QueryRequest,
};

use crate::error::Result;

impl QueryRequest {
    /// Translate the request into BigQuery standard SQL.
    pub fn to_sql(&self) -> Result<String> {
        sql_builder::build_select_sql(self)
    }
}
