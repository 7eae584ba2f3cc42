use crate::error::{BqVizError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_BILLING_PROJECT: &str = "BQVIZ_BILLING_PROJECT";
pub const ENV_DATA_PROJECT: &str = "BQVIZ_DATA_PROJECT";
pub const ENV_DATASET: &str = "BQVIZ_DATASET";
pub const ENV_LOCATION: &str = "BQVIZ_LOCATION";
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const DEFAULT_TIMEOUT_MS: i32 = 60_000;

fn default_timeout_ms() -> i32 {
    DEFAULT_TIMEOUT_MS
}

/// Connection settings for one session. Plain strings; nothing here is
/// validated against the warehouse until the first query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub billing_project: String,
    /// Project owning the default dataset; falls back to the billing project.
    #[serde(default)]
    pub data_project: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            billing_project: String::new(),
            data_project: None,
            dataset: None,
            credentials_path: None,
            location: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl PipelineConfig {
    pub fn new(billing_project: impl Into<String>) -> Self {
        Self {
            billing_project: billing_project.into(),
            ..Default::default()
        }
    }

    pub fn with_dataset(mut self, project: Option<String>, dataset: impl Into<String>) -> Self {
        self.data_project = project;
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_credentials(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("bqviz").join("config.yaml"))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Read `path` if given (it must exist), otherwise the default config
    /// file if present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup(ENV_BILLING_PROJECT) {
            self.billing_project = v;
        }
        if let Some(v) = lookup(ENV_DATA_PROJECT) {
            self.data_project = Some(v);
        }
        if let Some(v) = lookup(ENV_DATASET) {
            self.dataset = Some(v);
        }
        if let Some(v) = lookup(ENV_LOCATION) {
            self.location = Some(v);
        }
        if let Some(v) = lookup(ENV_CREDENTIALS) {
            self.credentials_path = Some(PathBuf::from(v));
        }
        self
    }

    pub fn data_project(&self) -> &str {
        self.data_project
            .as_deref()
            .unwrap_or(self.billing_project.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.billing_project.trim().is_empty() {
            return Err(BqVizError::Config(format!(
                "Billing project is not set (use --billing-project or {})",
                ENV_BILLING_PROJECT
            )));
        }
        if self.timeout_ms <= 0 {
            return Err(BqVizError::Config(format!(
                "timeout_ms must be positive, got {}",
                self.timeout_ms
            )));
        }
        Ok(())
    }
}

/// Service-account key contents, read once when a session is opened.
#[derive(Clone)]
pub struct Credential {
    source: PathBuf,
    contents: String,
}

impl Credential {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.ok_or_else(|| {
            BqVizError::Authentication(format!(
                "No credential file configured (set {} or --credentials)",
                ENV_CREDENTIALS
            ))
        })?;
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BqVizError::Authentication(format!(
                "Cannot read credential file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_contents(path, contents)
    }

    pub fn from_contents(source: impl Into<PathBuf>, contents: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let contents = contents.into();
        if contents.trim().is_empty() {
            return Err(BqVizError::Authentication(format!(
                "Credential file {} is empty",
                source.display()
            )));
        }
        Ok(Self { source, contents })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("contents", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_yaml_defaults() {
        let config: PipelineConfig = serde_yaml::from_str("billing_project: my-billing").unwrap();
        assert_eq!(config.billing_project, "my-billing");
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.data_project(), "my-billing");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env = HashMap::from([
            (ENV_DATASET, "epa_historical_air_quality".to_string()),
            (ENV_DATA_PROJECT, "bigquery-public-data".to_string()),
            (ENV_LOCATION, "  ".to_string()),
        ]);
        let config = PipelineConfig::new("billing")
            .with_env_overrides(|k| env.get(k).cloned());
        assert_eq!(config.dataset.as_deref(), Some("epa_historical_air_quality"));
        assert_eq!(config.data_project(), "bigquery-public-data");
        assert_eq!(config.location, None);
    }

    #[test]
    fn test_validate_requires_billing_project() {
        assert!(matches!(
            PipelineConfig::default().validate(),
            Err(BqVizError::Config(_))
        ));
        assert!(PipelineConfig::new("p").validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "billing_project: b\ndataset: d\ntimeout_ms: 1000").unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dataset.as_deref(), Some("d"));
        assert_eq!(config.timeout_ms, 1000);
    }

    #[test]
    fn test_missing_credential_is_authentication_error() {
        assert!(matches!(
            Credential::load(None),
            Err(BqVizError::Authentication(_))
        ));
        assert!(matches!(
            Credential::load(Some(Path::new("/nonexistent/key.json"))),
            Err(BqVizError::Authentication(_))
        ));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::from_contents("key.json", "{\"private_key\": \"secret\"}").unwrap();
        assert!(!format!("{:?}", cred).contains("secret"));
    }
}
