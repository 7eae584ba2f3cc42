use super::{field, RenderSpec, RenderedArtifact};
use crate::error::Result;
use crate::result::{ColumnType, ResultSet};
use serde_json::{json, Map, Value as JsonValue};

const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";
const FACET_COLUMNS: u32 = 3;

/// Vega-Lite treats `.` and brackets in field names as nested access.
fn field_ref(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars() {
        if matches!(ch, '.' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn encoding_type(column_type: ColumnType) -> &'static str {
    if column_type.is_temporal() {
        "temporal"
    } else if column_type.is_numeric() {
        "quantitative"
    } else {
        "ordinal"
    }
}

pub(super) fn line_chart_by_group(rows: &ResultSet, spec: &RenderSpec) -> Result<RenderedArtifact> {
    let x = field(&spec.x, "x")?;
    let y = field(&spec.y, "y")?;
    let group = field(&spec.group, "group")?;

    let x_type = rows
        .column(x)
        .map(|c| encoding_type(c.column_type))
        .unwrap_or("ordinal");

    let values: Vec<JsonValue> = rows
        .rows()
        .map(|row| {
            let mut record = Map::new();
            for name in [x, y, group] {
                let value = row.get(name).map(|v| v.to_json()).unwrap_or(JsonValue::Null);
                record.insert(name.to_string(), value);
            }
            JsonValue::Object(record)
        })
        .collect();

    let mut chart = json!({
        "$schema": VEGA_LITE_SCHEMA,
        "data": { "values": values },
        "facet": {
            "field": field_ref(group),
            "type": "nominal",
            "title": group,
        },
        "columns": FACET_COLUMNS,
        "spec": {
            "width": 220,
            "height": 160,
            "mark": { "type": "line", "interpolate": "linear" },
            "encoding": {
                "x": { "field": field_ref(x), "type": x_type, "title": x },
                "y": { "field": field_ref(y), "type": "quantitative", "title": y },
            },
        },
    });

    if let (Some(title), Some(obj)) = (spec.title.as_ref(), chart.as_object_mut()) {
        obj.insert("title".to_string(), JsonValue::String(title.clone()));
    }

    Ok(RenderedArtifact::Chart { spec: chart })
}
