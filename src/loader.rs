use crate::error::{BqVizError, Result};
use crate::query::QueryRequest;
use crate::render::{RenderKind, RenderSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderDef {
    pub kind: RenderKind,
    #[serde(flatten)]
    pub spec: RenderSpec,
}

/// One query-and-visualize pipeline as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub request: QueryRequest,
    #[serde(default)]
    pub render: Option<RenderDef>,
    /// Artifact path, relative to the definition file.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(skip)]
    pub path: PathBuf,
}

impl PipelineDef {
    pub fn output_path(&self, out_dir: Option<&Path>, extension: &str) -> PathBuf {
        if let Some(dir) = out_dir {
            return dir.join(format!("{}.{}", self.name, extension));
        }
        match &self.output {
            Some(output) if output.is_absolute() => output.clone(),
            Some(output) => self
                .path
                .parent()
                .unwrap_or(Path::new("."))
                .join(output),
            None => PathBuf::from(format!("{}.{}", self.name, extension)),
        }
    }
}

pub struct PipelineLoader;

impl PipelineLoader {
    pub fn load_file(path: impl AsRef<Path>) -> Result<PipelineDef> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut def = Self::parse(&content)
            .map_err(|e| BqVizError::Config(format!("{}: {}", path.display(), e)))?;
        def.path = path.to_path_buf();
        Ok(def)
    }

    pub fn parse(content: &str) -> Result<PipelineDef> {
        let def: PipelineDef = serde_yaml::from_str(content)?;
        if def.name.trim().is_empty() {
            return Err(BqVizError::Config("pipeline name must not be empty".to_string()));
        }
        Ok(def)
    }

    /// Load every `*.yaml` / `*.yml` below `dir`, ordered by path.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<PipelineDef>> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for extension in ["yaml", "yml"] {
            let pattern = format!("{}/**/*.{}", dir.display(), extension);
            let entries =
                glob::glob(&pattern).map_err(|e| BqVizError::Config(e.to_string()))?;
            paths.extend(entries.filter_map(|entry| entry.ok()));
        }
        paths.sort();

        let defs = paths
            .iter()
            .map(Self::load_file)
            .collect::<Result<Vec<_>>>()?;

        let mut names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(BqVizError::Config(format!(
                "Duplicate pipeline name '{}' in {}",
                dup[0],
                dir.display()
            )));
        }
        Ok(defs)
    }
}
