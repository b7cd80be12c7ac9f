//! Manifest loading: the host-side `service` / `provider` / `ecs` document

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use fleetform_core::{ClusterSpec, CompileContext};

const DEFAULT_STAGE: &str = "dev";

#[derive(Debug, Default, Deserialize)]
pub struct ProviderSection {
    pub stage: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Host service name, normalized into the naming prefix
    pub service: String,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub ecs: Vec<ClusterSpec>,
}

impl Manifest {
    /// Load a YAML (`.yml` / `.yaml`) or JSON (`.json`) manifest
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match extension.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display())),
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display())),
            other => bail!(
                "Unsupported manifest extension '{}' for {} (expected .yml, .yaml or .json)",
                other,
                path.display()
            ),
        }
    }

    /// Stage from the command line, else from the manifest, else "dev"
    pub fn stage<'a>(&'a self, overridden: Option<&'a str>) -> &'a str {
        overridden
            .or(self.provider.stage.as_deref())
            .unwrap_or(DEFAULT_STAGE)
    }

    pub fn context(&self, stage: Option<&str>) -> CompileContext {
        CompileContext::new(self.stage(stage), &self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_yaml_manifest() {
        let file = write_manifest(
            ".yml",
            r#"
service: my-app
provider:
  stage: prod
ecs:
  - clusterName: api
    vpc:
      cidr: 10.0.0.0/16
      subnets: [10.0.1.0/24, 10.0.2.0/24]
    services:
      - name: web
        cpu: 256
        memory: 512
        image: nginx
        listeners:
          - albProtocol: HTTP
"#,
        );
        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.service, "my-app");
        assert_eq!(manifest.ecs.len(), 1);
        assert_eq!(manifest.ecs[0].services[0].listeners.len(), 1);
        assert_eq!(manifest.stage(None), "prod");
        assert_eq!(manifest.stage(Some("qa")), "qa");
        assert_eq!(manifest.context(None).service_prefix(), "Myapp");
    }

    #[test]
    fn load_json_manifest_with_default_stage() {
        let file = write_manifest(".json", r#"{ "service": "orders", "ecs": [] }"#);
        let manifest = Manifest::load(file.path()).unwrap();
        assert!(manifest.ecs.is_empty());
        assert_eq!(manifest.stage(None), "dev");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = write_manifest(".toml", "service = 'x'");
        let err = Manifest::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported manifest extension"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let file = write_manifest(".yaml", "service: [unclosed");
        let err = Manifest::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
