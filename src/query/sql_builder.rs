use super::request::{CompareOp, Filter, Literal, QueryRequest};
use crate::error::{BqVizError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static PLAIN_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

pub(crate) fn quote_ident(name: &str) -> String {
    if PLAIN_IDENT.is_match(name) || name == "*" {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "\\`"))
    }
}

/// Table references may be dotted paths; a path with any non-plain segment
/// (e.g. `bigquery-public-data`) is quoted as a whole.
pub(crate) fn quote_table(source: &str) -> String {
    if source.starts_with('`') && source.ends_with('`') && source.len() > 1 {
        return source.to_string();
    }
    if source.split('.').all(|segment| PLAIN_IDENT.is_match(segment)) {
        source.to_string()
    } else {
        format!("`{}`", source.replace('`', "\\`"))
    }
}

fn escape_sql_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn literal_sql(literal: &Literal) -> String {
    match literal {
        Literal::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) if f.is_nan() => "CAST('NaN' AS FLOAT64)".to_string(),
        Literal::Float(f) if f.is_infinite() => {
            format!("CAST('{}' AS FLOAT64)", if *f > 0.0 { "inf" } else { "-inf" })
        }
        Literal::Float(f) => f.to_string(),
        Literal::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        Literal::String(s) => format!("'{}'", escape_sql_string(s)),
    }
}

fn filter_sql(filter: &Filter) -> Result<String> {
    let column = quote_ident(&filter.column);
    let single = || {
        filter.values.first().map(literal_sql).ok_or_else(|| {
            BqVizError::InvalidRequest(format!(
                "Filter on '{}' requires a value",
                filter.column
            ))
        })
    };

    let sql = match filter.op {
        CompareOp::Eq => format!("{} = {}", column, single()?),
        CompareOp::Ne => format!("{} != {}", column, single()?),
        CompareOp::Lt => format!("{} < {}", column, single()?),
        CompareOp::Le => format!("{} <= {}", column, single()?),
        CompareOp::Gt => format!("{} > {}", column, single()?),
        CompareOp::Ge => format!("{} >= {}", column, single()?),
        CompareOp::In => {
            if filter.values.is_empty() {
                return Err(BqVizError::InvalidRequest(format!(
                    "IN filter on '{}' requires at least one value",
                    filter.column
                )));
            }
            let values: Vec<String> = filter.values.iter().map(literal_sql).collect();
            format!("{} IN ({})", column, values.join(", "))
        }
        CompareOp::IsNull => format!("{} IS NULL", column),
        CompareOp::IsNotNull => format!("{} IS NOT NULL", column),
    };
    Ok(sql)
}

fn select_list(request: &QueryRequest) -> Vec<String> {
    if !request.is_aggregate() {
        if request.columns.is_empty() {
            return vec!["*".to_string()];
        }
        return request.columns.iter().map(|c| quote_ident(c)).collect();
    }

    // Grouping keys keep the order they were selected in; keys that were
    // never selected follow in group_by order.
    let mut keys: Vec<&str> = Vec::with_capacity(request.group_by.len());
    let selected_keys = request
        .columns
        .iter()
        .filter(|c| request.group_by.contains(c));
    for key in selected_keys.chain(request.group_by.iter()) {
        if !keys.contains(&key.as_str()) {
            keys.push(key.as_str());
        }
    }

    let mut items: Vec<String> = keys.into_iter().map(quote_ident).collect();
    items.extend(request.aggregations.iter().map(|agg| {
        format!(
            "{} AS {}",
            agg.function.apply(&quote_ident(&agg.column)),
            quote_ident(&agg.name)
        )
    }));
    items
}

pub(crate) fn build_select_sql(request: &QueryRequest) -> Result<String> {
    let source = request.source.trim();
    if source.is_empty() {
        return Err(BqVizError::InvalidRequest(
            "Query source table must not be empty".to_string(),
        ));
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list(request).join(", "),
        quote_table(source)
    );

    if !request.filters.is_empty() {
        let predicates = request
            .filters
            .iter()
            .map(filter_sql)
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    if !request.group_by.is_empty() {
        let keys: Vec<String> = request.group_by.iter().map(|c| quote_ident(c)).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&keys.join(", "));
    }

    if !request.order_by.is_empty() {
        let order: Vec<String> = request
            .order_by
            .iter()
            .map(|o| {
                if o.descending {
                    format!("{} DESC", quote_ident(&o.column))
                } else {
                    quote_ident(&o.column)
                }
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::AggregateFn;
    use chrono::NaiveDate;
    use sqlparser::dialect::BigQueryDialect;
    use sqlparser::parser::Parser;

    fn parses(sql: &str) -> bool {
        Parser::parse_sql(&BigQueryDialect {}, sql).is_ok()
    }

    #[test]
    fn test_grouped_mean_matches_expected_sql() {
        let request = QueryRequest::from_table("pm25_daily")
            .select(["state", "value", "date"])
            .group_by(["state"])
            .aggregate("avg_value", "value", AggregateFn::Mean);

        let sql = build_select_sql(&request).unwrap();
        assert_eq!(
            sql,
            "SELECT state, AVG(value) AS avg_value FROM pm25_daily GROUP BY state"
        );
        assert!(parses(&sql));
    }

    #[test]
    fn test_plain_projection() {
        let request = QueryRequest::from_table("pm25_daily").select(["state", "value", "date"]);
        let sql = build_select_sql(&request).unwrap();
        assert_eq!(sql, "SELECT state, value, date FROM pm25_daily");
    }

    #[test]
    fn test_no_columns_selects_star() {
        let sql = build_select_sql(&QueryRequest::from_table("pm25_daily")).unwrap();
        assert_eq!(sql, "SELECT * FROM pm25_daily");
    }

    #[test]
    fn test_every_column_appears_once() {
        let request = QueryRequest::from_table("air.sites")
            .select(["site", "county", "pm25"])
            .group_by(["site", "county"])
            .aggregate("max_pm25", "pm25", AggregateFn::Max)
            .aggregate("n_obs", "obs", AggregateFn::Count);
        let sql = build_select_sql(&request).unwrap();
        let select = sql.split(" FROM ").next().unwrap();

        for needle in ["site", "county", "MAX(pm25)", "max_pm25", "COUNT(obs)", "n_obs"] {
            assert_eq!(select.matches(needle).count(), 1, "{} in {}", needle, select);
        }
        assert!(sql.contains("air.sites"));
        assert!(parses(&sql));
    }

    #[test]
    fn test_group_key_not_selected_is_appended() {
        let request = QueryRequest::from_table("t")
            .select(["value"])
            .group_by(["state"])
            .aggregate("total", "value", AggregateFn::Sum);
        let sql = build_select_sql(&request).unwrap();
        assert_eq!(
            sql,
            "SELECT state, SUM(value) AS total FROM t GROUP BY state"
        );
    }

    #[test]
    fn test_aggregation_without_group_by_is_permitted() {
        let request = QueryRequest::from_table("t").aggregate("n", "id", AggregateFn::CountDistinct);
        let sql = build_select_sql(&request).unwrap();
        assert_eq!(sql, "SELECT COUNT(DISTINCT id) AS n FROM t");
    }

    #[test]
    fn test_full_clause_order() {
        let request = QueryRequest::from_table("bigquery-public-data.epa_historical_air_quality.pm25_frm_daily_summary")
            .select(["state_name", "date_local", "arithmetic_mean"])
            .group_by(["state_name", "date_local"])
            .aggregate("pm25", "arithmetic_mean", AggregateFn::Mean)
            .filter_in("state_name", ["California", "Oregon"])
            .filter(
                "date_local",
                CompareOp::Ge,
                NaiveDate::from_ymd_opt(2020, 8, 1).unwrap(),
            )
            .order_by("date_local", false)
            .order_by("pm25", true)
            .limit(500);

        let sql = build_select_sql(&request).unwrap();
        assert_eq!(
            sql,
            "SELECT state_name, date_local, AVG(arithmetic_mean) AS pm25 \
             FROM `bigquery-public-data.epa_historical_air_quality.pm25_frm_daily_summary` \
             WHERE state_name IN ('California', 'Oregon') AND date_local >= DATE '2020-08-01' \
             GROUP BY state_name, date_local \
             ORDER BY date_local, pm25 DESC \
             LIMIT 500"
        );
        assert!(parses(&sql));
    }

    #[test]
    fn test_string_literal_is_escaped() {
        let request = QueryRequest::from_table("t").filter("name", CompareOp::Eq, "O'Brien");
        let sql = build_select_sql(&request).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE name = 'O\\'Brien'");
    }

    #[test]
    fn test_non_finite_floats_are_cast() {
        let request = QueryRequest::from_table("t")
            .filter("value", CompareOp::Ne, f64::NAN)
            .filter_in("value", [f64::INFINITY, f64::NEG_INFINITY, 2.5]);
        let sql = build_select_sql(&request).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE value != CAST('NaN' AS FLOAT64) AND value IN \
             (CAST('inf' AS FLOAT64), CAST('-inf' AS FLOAT64), 2.5)"
        );
        assert!(parses(&sql));
    }

    #[test]
    fn test_null_filters() {
        let request = QueryRequest::from_table("t")
            .filter_null("lat", false)
            .filter_null("flag", true);
        let sql = build_select_sql(&request).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE lat IS NOT NULL AND flag IS NULL");
    }

    #[test]
    fn test_non_plain_column_is_quoted() {
        let request = QueryRequest::from_table("t").select(["Sample Duration", "value"]);
        let sql = build_select_sql(&request).unwrap();
        assert_eq!(sql, "SELECT `Sample Duration`, value FROM t");
    }

    #[test]
    fn test_empty_source_rejected() {
        let err = build_select_sql(&QueryRequest::from_table("  ")).unwrap_err();
        assert!(matches!(err, BqVizError::InvalidRequest(_)));
    }

    #[test]
    fn test_empty_in_rejected() {
        let request = QueryRequest::from_table("t").filter_in("state", Vec::<String>::new());
        assert!(matches!(
            build_select_sql(&request),
            Err(BqVizError::InvalidRequest(_))
        ));
    }
}
