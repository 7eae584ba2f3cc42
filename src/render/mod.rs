mod chart;
mod map;

pub use map::MapMarker;

use crate::error::{BqVizError, Result};
use crate::result::ResultSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    /// One line per facet panel, panels split by the `group` field.
    LineChartByGroup,
    /// Circle markers placed at `lat`/`lng`.
    MapWithMarkers,
}

/// Field mapping from result columns onto visual channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSpec {
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub lng: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl RenderSpec {
    pub fn line_chart(
        x: impl Into<String>,
        y: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            x: Some(x.into()),
            y: Some(y.into()),
            group: Some(group.into()),
            ..Default::default()
        }
    }

    pub fn markers(lat: impl Into<String>, lng: impl Into<String>) -> Self {
        Self {
            lat: Some(lat.into()),
            lng: Some(lng.into()),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, field: impl Into<String>) -> Self {
        self.color = Some(field.into());
        self
    }

    pub fn with_label(mut self, field: impl Into<String>) -> Self {
        self.label = Some(field.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn required_fields(&self, kind: RenderKind) -> Vec<(&'static str, Option<&str>)> {
        match kind {
            RenderKind::LineChartByGroup => vec![
                ("x", self.x.as_deref()),
                ("y", self.y.as_deref()),
                ("group", self.group.as_deref()),
            ],
            RenderKind::MapWithMarkers => vec![
                ("lat", self.lat.as_deref()),
                ("lng", self.lng.as_deref()),
            ],
        }
    }

    fn optional_fields(&self, kind: RenderKind) -> Vec<(&'static str, Option<&str>)> {
        match kind {
            RenderKind::LineChartByGroup => Vec::new(),
            RenderKind::MapWithMarkers => vec![
                ("color", self.color.as_deref()),
                ("label", self.label.as_deref()),
            ],
        }
    }

    /// Check every mapped field against the result columns before any
    /// output is produced.
    pub fn validate(&self, kind: RenderKind, rows: &ResultSet) -> Result<()> {
        for (channel, field) in self.required_fields(kind) {
            let field = field.ok_or_else(|| {
                BqVizError::RenderSpec(format!("{:?} requires a '{}' field", kind, channel))
            })?;
            check_column(rows, channel, field)?;
        }
        for (channel, field) in self.optional_fields(kind) {
            if let Some(field) = field {
                check_column(rows, channel, field)?;
            }
        }
        Ok(())
    }
}

fn check_column(rows: &ResultSet, channel: &str, field: &str) -> Result<()> {
    if rows.has_column(field) {
        return Ok(());
    }
    Err(BqVizError::RenderSpec(format!(
        "{} field '{}' is not a result column (available: {})",
        channel,
        field,
        rows.column_names().join(", ")
    )))
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedArtifact {
    /// Vega-Lite v5 specification with inline data.
    Chart { spec: serde_json::Value },
    /// Standalone Leaflet HTML document.
    Map {
        html: String,
        markers: Vec<MapMarker>,
        skipped: usize,
    },
}

impl RenderedArtifact {
    pub fn kind(&self) -> RenderKind {
        match self {
            RenderedArtifact::Chart { .. } => RenderKind::LineChartByGroup,
            RenderedArtifact::Map { .. } => RenderKind::MapWithMarkers,
        }
    }

    pub fn document(&self) -> Result<String> {
        match self {
            RenderedArtifact::Chart { spec } => Ok(serde_json::to_string_pretty(spec)?),
            RenderedArtifact::Map { html, .. } => Ok(html.clone()),
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            RenderedArtifact::Chart { .. } => "vl.json",
            RenderedArtifact::Map { .. } => "html",
        }
    }

    /// SHA-256 of the rendered document.
    pub fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.document()?.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Render a result set. Pure: identical inputs give identical artifacts,
/// and a spec that does not match the columns yields no artifact at all.
pub fn render(rows: &ResultSet, kind: RenderKind, spec: &RenderSpec) -> Result<RenderedArtifact> {
    spec.validate(kind, rows)?;
    match kind {
        RenderKind::LineChartByGroup => chart::line_chart_by_group(rows, spec),
        RenderKind::MapWithMarkers => map::map_with_markers(rows, spec),
    }
}

/// Spec fields are validated before rendering, so a lookup failure here is
/// an internal inconsistency.
fn field<'a>(name: &'a Option<String>, channel: &str) -> Result<&'a str> {
    name.as_deref()
        .ok_or_else(|| BqVizError::RenderSpec(format!("missing '{}' field", channel)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ColumnInfo, ColumnType, Value};

    fn rows() -> ResultSet {
        ResultSet::new(
            vec![
                ColumnInfo::new("state", ColumnType::String),
                ColumnInfo::new("date", ColumnType::Date),
                ColumnInfo::new("pm25", ColumnType::Float),
            ],
            vec![vec![
                Value::String("Ohio".into()),
                Value::Date(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
                Value::Float(7.1),
            ]],
        )
        .unwrap()
    }

    #[test]
    fn test_missing_required_mapping() {
        let spec = RenderSpec {
            x: Some("date".into()),
            y: Some("pm25".into()),
            ..Default::default()
        };
        let err = render(&rows(), RenderKind::LineChartByGroup, &spec).unwrap_err();
        assert!(matches!(err, BqVizError::RenderSpec(msg) if msg.contains("group")));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let spec = RenderSpec::line_chart("date", "value", "state");
        let err = render(&rows(), RenderKind::LineChartByGroup, &spec).unwrap_err();
        assert!(matches!(err, BqVizError::RenderSpec(msg) if msg.contains("'value'")));
    }

    #[test]
    fn test_optional_map_field_checked_when_set() {
        let spec = RenderSpec::markers("pm25", "pm25").with_label("site_name");
        assert!(matches!(
            render(&rows(), RenderKind::MapWithMarkers, &spec),
            Err(BqVizError::RenderSpec(_))
        ));
    }

    #[test]
    fn test_render_spec_from_yaml() {
        let spec: RenderSpec =
            serde_yaml::from_str("x: date\ny: pm25\ngroup: state\ntitle: PM2.5").unwrap();
        assert_eq!(spec, RenderSpec::line_chart("date", "pm25", "state").with_title("PM2.5"));
    }
}
