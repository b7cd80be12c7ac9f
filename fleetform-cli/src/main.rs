use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use fleetform_core::{Compiler, Template};

mod manifest;

use manifest::Manifest;

#[derive(Parser)]
#[command(name = "fleetform")]
#[command(about = "Compile container cluster descriptions into CloudFormation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the manifest and print (or write) the template
    Compile {
        /// Path to the manifest (.yml, .yaml or .json)
        #[arg(default_value = "serverless.yml")]
        file: PathBuf,

        /// Deploy stage (overrides provider.stage)
        #[arg(long, short)]
        stage: Option<String>,

        /// Write the template to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Emit compact JSON
        #[arg(long)]
        compact: bool,
    },
    /// Compile the manifest and summarize the result without writing it
    Validate {
        /// Path to the manifest (.yml, .yaml or .json)
        #[arg(default_value = "serverless.yml")]
        file: PathBuf,

        /// Deploy stage (overrides provider.stage)
        #[arg(long, short)]
        stage: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            file,
            stage,
            output,
            compact,
        } => run_compile(&file, stage.as_deref(), output.as_deref(), compact),
        Commands::Validate { file, stage } => run_validate(&file, stage.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn compile_manifest(file: &Path, stage: Option<&str>) -> Result<Template> {
    let manifest = Manifest::load(file)?;
    let ctx = manifest.context(stage);
    log::info!(
        "Compiling {} cluster(s) of service {} for stage {}",
        manifest.ecs.len(),
        manifest.service,
        ctx.stage()
    );
    let compiler = Compiler::new(ctx);
    compiler
        .compile_all(&manifest.ecs)
        .with_context(|| format!("Failed to compile {}", file.display()))
}

fn run_compile(file: &Path, stage: Option<&str>, output: Option<&Path>, compact: bool) -> Result<()> {
    let template = compile_manifest(file, stage)?;
    let document = template.to_json()?;
    let rendered = if compact {
        serde_json::to_string(&document)?
    } else {
        serde_json::to_string_pretty(&document)?
    };

    match output {
        Some(path) => {
            fs::write(path, rendered + "\n")
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{}",
                format!(
                    "✓ Wrote {} resources and {} outputs to {}",
                    template.resources().len(),
                    template.outputs().len(),
                    path.display()
                )
                .green()
                .bold()
            );
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn run_validate(file: &Path, stage: Option<&str>) -> Result<()> {
    println!("{}", "Validating...".cyan());
    let template = compile_manifest(file, stage)?;

    println!(
        "{}",
        format!(
            "✓ {} resources and {} outputs compiled successfully.",
            template.resources().len(),
            template.outputs().len()
        )
        .green()
        .bold()
    );

    for (kind, count) in count_by_kind(&template) {
        println!("  • {} × {}", kind, count);
    }
    for key in template.outputs().keys() {
        println!("  {} {}", "output".dimmed(), key);
    }
    Ok(())
}

fn count_by_kind(template: &Template) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for resource in template.resources().values() {
        *counts.entry(resource.kind.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const MANIFEST: &str = r#"
service: my-app
provider:
  stage: dev
ecs:
  - clusterName: api
    vpc:
      cidr: 10.0.0.0/16
      subnets: [10.0.1.0/24, 10.0.2.0/24]
    services:
      - name: web
        image: nginx
        listeners:
          - albProtocol: HTTP
"#;

    #[test]
    fn compile_writes_template_file() {
        let manifest = manifest_file(MANIFEST);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("template.json");

        run_compile(manifest.path(), None, Some(&output), true).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert!(written["Resources"]["MyappApiECSClusterDev"].is_object());
        assert!(written["Outputs"]["MyappApiWebServiceDevHTTP80"].is_object());
    }

    #[test]
    fn stage_override_changes_names() {
        let manifest = manifest_file(MANIFEST);
        let template = compile_manifest(manifest.path(), Some("prod")).unwrap();
        assert!(template.resource("MyappApiECSClusterProd").is_some());
    }

    #[test]
    fn compile_errors_are_wrapped_with_file() {
        let manifest = manifest_file(
            r#"
service: my-app
ecs:
  - clusterName: api
    vpc: { cidr: 10.0.0.0/16, subnets: [] }
    services:
      - name: web
        image: nginx
        listeners:
          - albProtocol: HTTPS
"#,
        );
        let err = compile_manifest(manifest.path(), None).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to compile"));
        assert!(message.contains("Certificate ARN required"));
    }

    #[test]
    fn counts_group_resources_by_kind() {
        let manifest = manifest_file(MANIFEST);
        let template = compile_manifest(manifest.path(), None).unwrap();
        let counts = count_by_kind(&template);
        assert_eq!(counts.get("AWS::EC2::Subnet"), Some(&2));
        assert_eq!(counts.get("AWS::ECS::Service"), Some(&1));
    }
}
