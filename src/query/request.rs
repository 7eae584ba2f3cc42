use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Aggregation applied to an input column, rendered as a BigQuery aggregate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    #[serde(alias = "avg")]
    Mean,
    Sum,
    Min,
    Max,
    Count,
    CountDistinct,
    Median,
    #[serde(alias = "sd")]
    Stddev,
}

impl AggregateFn {
    pub fn apply(&self, column: &str) -> String {
        match self {
            AggregateFn::Mean => format!("AVG({})", column),
            AggregateFn::Sum => format!("SUM({})", column),
            AggregateFn::Min => format!("MIN({})", column),
            AggregateFn::Max => format!("MAX({})", column),
            AggregateFn::Count => format!("COUNT({})", column),
            AggregateFn::CountDistinct => format!("COUNT(DISTINCT {})", column),
            AggregateFn::Median => format!("APPROX_QUANTILES({}, 2)[OFFSET(1)]", column),
            AggregateFn::Stddev => format!("STDDEV({})", column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Output column name.
    pub name: String,
    pub column: String,
    pub function: AggregateFn,
}

/// Filter operand. Dates are only recognised in the explicit `{date: YYYY-MM-DD}`
/// form; a bare `2020-01-01` stays a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    #[serde(with = "date_literal")]
    Date(NaiveDate),
    String(String),
}

mod date_literal {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        date: NaiveDate,
    }

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged { date: *date }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        Tagged::deserialize(deserializer).map(|t| t.date)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::String(s)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<NaiveDate> for Literal {
    fn from(d: NaiveDate) -> Self {
        Literal::Date(d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[serde(alias = "=", alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
    In,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: CompareOp,
    #[serde(default)]
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

/// A logical data pull, translated to SQL only at submit time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub source: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default, rename = "aggregate")]
    pub aggregations: Vec<Aggregation>,
    #[serde(default, rename = "filter")]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl QueryRequest {
    pub fn from_table(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            if !self.group_by.contains(&column) {
                self.group_by.push(column);
            }
        }
        self
    }

    pub fn aggregate(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        function: AggregateFn,
    ) -> Self {
        let name = name.into();
        // Later definitions of the same output column replace earlier ones.
        self.aggregations.retain(|a| a.name != name);
        self.aggregations.push(Aggregation {
            name,
            column: column.into(),
            function,
        });
        self
    }

    pub fn filter(
        mut self,
        column: impl Into<String>,
        op: CompareOp,
        value: impl Into<Literal>,
    ) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            values: vec![value.into()],
        });
        self
    }

    pub fn filter_in<I, L>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        self.filters.push(Filter {
            column: column.into(),
            op: CompareOp::In,
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn filter_null(mut self, column: impl Into<String>, is_null: bool) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op: if is_null {
                CompareOp::IsNull
            } else {
                CompareOp::IsNotNull
            },
            values: Vec::new(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_aggregate(&self) -> bool {
        !self.aggregations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_drops_duplicates_keeps_order() {
        let request = QueryRequest::from_table("t")
            .group_by(["state", "county"])
            .group_by(["state", "site"]);
        assert_eq!(request.group_by, vec!["state", "county", "site"]);
    }

    #[test]
    fn test_aggregate_replaces_same_output_name() {
        let request = QueryRequest::from_table("t")
            .aggregate("v", "value", AggregateFn::Mean)
            .aggregate("n", "value", AggregateFn::Count)
            .aggregate("v", "value", AggregateFn::Max);
        assert_eq!(request.aggregations.len(), 2);
        assert_eq!(request.aggregations[0].name, "n");
        assert_eq!(request.aggregations[1].function, AggregateFn::Max);
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
source: pm25_daily
columns: [state, value, date]
group_by: [state]
aggregate:
  - name: avg_value
    column: value
    function: mean
filter:
  - column: date
    op: ">="
    values: [{date: 2020-01-01}]
  - column: state
    op: in
    values: [Ohio, Texas]
order_by:
  - column: avg_value
    descending: true
limit: 10
"#;
        let request: QueryRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(request.source, "pm25_daily");
        assert_eq!(request.aggregations[0].function, AggregateFn::Mean);
        assert_eq!(request.filters[0].op, CompareOp::Ge);
        assert_eq!(
            request.filters[0].values,
            vec![Literal::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())]
        );
        assert_eq!(request.filters[1].values.len(), 2);
        assert!(request.order_by[0].descending);
        assert_eq!(request.limit, Some(10));
    }

    #[test]
    fn test_date_like_strings_stay_strings() {
        let yaml = r#"
- column: site_id
  op: in
  values: ["2020-01-01", 2020-01-02, 7, 2.5, true]
- column: date_local
  op: "<"
  values: [{date: 2021-06-30}]
"#;
        let filters: Vec<Filter> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            filters[0].values,
            vec![
                Literal::String("2020-01-01".into()),
                Literal::String("2020-01-02".into()),
                Literal::Int(7),
                Literal::Float(2.5),
                Literal::Bool(true),
            ]
        );
        assert_eq!(
            filters[1].values,
            vec![Literal::Date(NaiveDate::from_ymd_opt(2021, 6, 30).unwrap())]
        );
        assert!(serde_yaml::from_str::<Literal>("{date: not-a-date}").is_err());
    }

    #[test]
    fn test_date_literal_serializes_in_explicit_form() {
        let date = Literal::Date(NaiveDate::from_ymd_opt(2020, 9, 1).unwrap());
        let json = serde_json::to_value(&date).unwrap();
        assert_eq!(json, serde_json::json!({ "date": "2020-09-01" }));
        assert_eq!(serde_json::from_value::<Literal>(json).unwrap(), date);
    }

    #[test]
    fn test_median_uses_approx_quantiles() {
        assert_eq!(
            AggregateFn::Median.apply("value"),
            "APPROX_QUANTILES(value, 2)[OFFSET(1)]"
        );
    }
}
