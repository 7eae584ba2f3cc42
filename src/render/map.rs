use super::{field, RenderSpec, RenderedArtifact};
use crate::error::Result;
use crate::result::{ResultSet, RowRef, Value};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

const LEAFLET_VERSION: &str = "1.9.4";
const DEFAULT_COLOR: &str = "#3182bd";
const NULL_COLOR: &str = "#808080";
const SCALE_LOW: (u8, u8, u8) = (0x44, 0x01, 0x54);
const SCALE_HIGH: (u8, u8, u8) = (0xfd, 0xe7, 0x25);
const CATEGORY_PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    pub lat: f64,
    pub lng: f64,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum ColorScale {
    Fixed,
    Numeric { min: f64, max: f64 },
    Categorical(Vec<String>),
}

impl ColorScale {
    fn color_for(&self, value: Option<&Value>) -> String {
        match (self, value) {
            (ColorScale::Fixed, _) => DEFAULT_COLOR.to_string(),
            (_, None) | (_, Some(Value::Null)) => NULL_COLOR.to_string(),
            (ColorScale::Numeric { min, max }, Some(v)) => match v.as_f64() {
                Some(x) => interpolate(*min, *max, x),
                None => NULL_COLOR.to_string(),
            },
            (ColorScale::Categorical(levels), Some(v)) => {
                let key = v.to_string();
                levels
                    .iter()
                    .position(|l| *l == key)
                    .map(|i| CATEGORY_PALETTE[i % CATEGORY_PALETTE.len()].to_string())
                    .unwrap_or_else(|| NULL_COLOR.to_string())
            }
        }
    }

    fn legend_html(&self, field: &str) -> String {
        match self {
            ColorScale::Fixed => String::new(),
            ColorScale::Numeric { min, max } => format!(
                "<div class=\"legend\"><b>{}</b><br><span style=\"color:{}\">&#9679;</span> {}<br><span style=\"color:{}\">&#9679;</span> {}</div>",
                escape_html(field),
                interpolate(*min, *max, *min),
                min,
                interpolate(*min, *max, *max),
                max
            ),
            ColorScale::Categorical(levels) => {
                let items: Vec<String> = levels
                    .iter()
                    .enumerate()
                    .map(|(i, level)| {
                        format!(
                            "<span style=\"color:{}\">&#9679;</span> {}",
                            CATEGORY_PALETTE[i % CATEGORY_PALETTE.len()],
                            escape_html(level)
                        )
                    })
                    .collect();
                format!(
                    "<div class=\"legend\"><b>{}</b><br>{}</div>",
                    escape_html(field),
                    items.join("<br>")
                )
            }
        }
    }
}

fn interpolate(min: f64, max: f64, x: f64) -> String {
    let t = if max > min {
        ((x - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let channel = |lo: u8, hi: u8| (lo as f64 + (hi as f64 - lo as f64) * t).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(SCALE_LOW.0, SCALE_HIGH.0),
        channel(SCALE_LOW.1, SCALE_HIGH.1),
        channel(SCALE_LOW.2, SCALE_HIGH.2)
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn coordinate(row: &RowRef<'_>, name: &str, bound: f64) -> Option<f64> {
    row.get(name)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && v.abs() <= bound)
}

fn build_scale(rows: &ResultSet, color: Option<&str>, placed: &[RowRef<'_>]) -> ColorScale {
    let Some(color) = color else {
        return ColorScale::Fixed;
    };
    let numeric = rows
        .column(color)
        .map(|c| c.column_type.is_numeric())
        .unwrap_or(false);

    if numeric {
        let values: Vec<f64> = placed
            .iter()
            .filter_map(|row| row.get(color).and_then(Value::as_f64))
            .collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if values.is_empty() {
            return ColorScale::Numeric { min: 0.0, max: 0.0 };
        }
        return ColorScale::Numeric { min, max };
    }

    let levels: BTreeSet<String> = placed
        .iter()
        .filter_map(|row| row.get(color))
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .collect();
    ColorScale::Categorical(levels.into_iter().collect())
}

pub(super) fn map_with_markers(rows: &ResultSet, spec: &RenderSpec) -> Result<RenderedArtifact> {
    let lat = field(&spec.lat, "lat")?;
    let lng = field(&spec.lng, "lng")?;
    let color = spec.color.as_deref();
    let label = spec.label.as_deref();

    let mut placed = Vec::with_capacity(rows.len());
    let mut coords = Vec::with_capacity(rows.len());
    for row in rows.rows() {
        if let (Some(la), Some(ln)) = (coordinate(&row, lat, 90.0), coordinate(&row, lng, 180.0)) {
            placed.push(row);
            coords.push((la, ln));
        }
    }
    let skipped = rows.len() - placed.len();
    if skipped > 0 {
        debug!(skipped, "rows without usable coordinates left off the map");
    }

    let scale = build_scale(rows, color, &placed);
    let markers: Vec<MapMarker> = placed
        .iter()
        .zip(coords)
        .map(|(row, (la, ln))| MapMarker {
            lat: la,
            lng: ln,
            color: scale.color_for(color.and_then(|c| row.get(c))),
            label: label
                .and_then(|l| row.get(l))
                .filter(|v| !v.is_null())
                .map(|v| escape_html(&v.to_string())),
        })
        .collect();

    let html = document(spec.title.as_deref(), &markers, &scale, color)?;
    Ok(RenderedArtifact::Map {
        html,
        markers,
        skipped,
    })
}

fn document(
    title: Option<&str>,
    markers: &[MapMarker],
    scale: &ColorScale,
    color: Option<&str>,
) -> Result<String> {
    // `</` inside an inline script would terminate the element early.
    let markers_json = serde_json::to_string(markers)?.replace("</", "<\\/");
    let title = escape_html(title.unwrap_or("Map"));
    let legend = color.map(|c| scale.legend_html(c)).unwrap_or_default();

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@{version}/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@{version}/dist/leaflet.js"></script>
<style>
html, body, #map {{ height: 100%; margin: 0; }}
.legend {{ position: absolute; bottom: 24px; right: 12px; z-index: 1000; background: #fff; padding: 6px 10px; font: 12px sans-serif; border-radius: 4px; }}
</style>
</head>
<body>
<div id="map"></div>
{legend}
<script>
const markers = {markers_json};
const map = L.map("map");
L.tileLayer("https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png", {{
  attribution: "&copy; OpenStreetMap contributors"
}}).addTo(map);
const bounds = [];
for (const m of markers) {{
  const marker = L.circleMarker([m.lat, m.lng], {{ radius: 6, color: m.color, fillColor: m.color, fillOpacity: 0.8, weight: 1 }});
  if (m.label !== undefined) {{ marker.bindPopup(m.label); }}
  marker.addTo(map);
  bounds.push([m.lat, m.lng]);
}}
if (bounds.length > 0) {{ map.fitBounds(bounds, {{ padding: [20, 20] }}); }} else {{ map.setView([0, 0], 2); }}
</script>
</body>
</html>
"#,
        title = title,
        version = LEAFLET_VERSION,
        legend = legend,
        markers_json = markers_json,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::{render, RenderKind};
    use super::*;
    use crate::result::{ColumnInfo, ColumnType};

    fn sites() -> ResultSet {
        ResultSet::new(
            vec![
                ColumnInfo::new("site_name", ColumnType::String),
                ColumnInfo::new("latitude", ColumnType::Float),
                ColumnInfo::new("longitude", ColumnType::Float),
                ColumnInfo::new("pm25", ColumnType::Float),
                ColumnInfo::new("state", ColumnType::String),
            ],
            vec![
                vec![
                    Value::String("Fresno <Garland>".into()),
                    Value::Float(36.78),
                    Value::Float(-119.77),
                    Value::Float(35.0),
                    Value::String("California".into()),
                ],
                vec![
                    Value::String("Portland".into()),
                    Value::Float(45.5),
                    Value::Float(-122.6),
                    Value::Float(5.0),
                    Value::String("Oregon".into()),
                ],
                vec![
                    Value::String("Unknown".into()),
                    Value::Null,
                    Value::Float(-120.0),
                    Value::Float(9.0),
                    Value::String("Nevada".into()),
                ],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_markers_skip_missing_coordinates() {
        let spec = RenderSpec::markers("latitude", "longitude").with_label("site_name");
        let artifact = render(&sites(), RenderKind::MapWithMarkers, &spec).unwrap();
        let RenderedArtifact::Map {
            markers, skipped, html,
        } = artifact
        else {
            panic!("expected a map");
        };
        assert_eq!(markers.len(), 2);
        assert_eq!(skipped, 1);
        assert_eq!(markers[0].label.as_deref(), Some("Fresno &lt;Garland&gt;"));
        assert!(markers.iter().all(|m| m.color == DEFAULT_COLOR));
        assert!(html.contains("leaflet@1.9.4"));
        assert!(!html.contains("<Garland>"));
    }

    #[test]
    fn test_numeric_color_scale_spans_observed_range() {
        let spec = RenderSpec::markers("latitude", "longitude").with_color("pm25");
        let artifact = render(&sites(), RenderKind::MapWithMarkers, &spec).unwrap();
        let RenderedArtifact::Map { markers, .. } = artifact else {
            panic!("expected a map");
        };
        assert_eq!(markers[0].color, "#fde725");
        assert_eq!(markers[1].color, "#440154");
    }

    #[test]
    fn test_categorical_colors_follow_sorted_levels() {
        let spec = RenderSpec::markers("latitude", "longitude").with_color("state");
        let artifact = render(&sites(), RenderKind::MapWithMarkers, &spec).unwrap();
        let RenderedArtifact::Map { markers, html, .. } = artifact else {
            panic!("expected a map");
        };
        assert_eq!(markers[0].color, CATEGORY_PALETTE[0]);
        assert_eq!(markers[1].color, CATEGORY_PALETTE[1]);
        assert!(html.contains("class=\"legend\""));
        assert!(!html.contains("Nevada"));
    }

    #[test]
    fn test_out_of_range_coordinates_are_skipped() {
        let rows = ResultSet::new(
            vec![
                ColumnInfo::new("lat", ColumnType::Float),
                ColumnInfo::new("lng", ColumnType::Float),
            ],
            vec![
                vec![Value::Float(91.0), Value::Float(0.0)],
                vec![Value::String("45.0".into()), Value::Int(10)],
            ],
        )
        .unwrap();
        let artifact = render(&rows, RenderKind::MapWithMarkers, &RenderSpec::markers("lat", "lng"))
            .unwrap();
        let RenderedArtifact::Map { markers, skipped, .. } = artifact else {
            panic!("expected a map");
        };
        assert_eq!(skipped, 1);
        assert_eq!((markers[0].lat, markers[0].lng), (45.0, 10.0));
    }

    #[test]
    fn test_map_render_is_deterministic() {
        let spec = RenderSpec::markers("latitude", "longitude")
            .with_color("state")
            .with_label("site_name")
            .with_title("Monitors");
        let a = render(&sites(), RenderKind::MapWithMarkers, &spec).unwrap();
        let b = render(&sites(), RenderKind::MapWithMarkers, &spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_interpolate_endpoints() {
        assert_eq!(interpolate(0.0, 10.0, 0.0), "#440154");
        assert_eq!(interpolate(0.0, 10.0, 10.0), "#fde725");
        assert_eq!(interpolate(5.0, 5.0, 5.0), "#440154");
    }
}
