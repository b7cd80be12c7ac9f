//! Compiler - Entry points turning cluster configurations into a template

use std::collections::HashMap;

use crate::cluster::Cluster;
use crate::config::ClusterSpec;
use crate::context::CompileContext;
use crate::error::{CompileError, CompileResult};
use crate::graph::DependencyGraph;
use crate::template::Template;

/// Compiles cluster configurations for one host service and stage
#[derive(Debug, Clone)]
pub struct Compiler {
    ctx: CompileContext,
}

impl Compiler {
    pub fn new(ctx: CompileContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &CompileContext {
        &self.ctx
    }

    /// Compile one cluster. Either the whole graph is returned or nothing is.
    pub fn compile(&self, spec: &ClusterSpec) -> CompileResult<Template> {
        let cluster = Cluster::new(&self.ctx, spec)?;
        self.emit(&cluster)
    }

    fn emit(&self, cluster: &Cluster) -> CompileResult<Template> {
        let mut template = Template::new();
        cluster.emit(&self.ctx, &mut template)?;

        let external = cluster.external_dependencies();
        check_graph(&template, &external)?;

        log::debug!(
            "Compiled cluster {}: {} resource(s), {} output(s)",
            cluster.prefix(),
            template.resources().len(),
            template.outputs().len()
        );
        Ok(template)
    }

    /// Compile every cluster of a manifest and merge the results.
    ///
    /// Entries without a network are skipped, as is an empty list.
    pub fn compile_all(&self, specs: &[ClusterSpec]) -> CompileResult<Template> {
        let mut template = Template::new();
        let mut prefixes = PrefixClaims::default();
        if specs.is_empty() {
            log::warn!("No clusters configured, nothing will be deployed");
            return Ok(template);
        }

        for spec in specs {
            if spec.vpc.is_none() {
                log::info!(
                    "Skipping cluster '{}': missing vpc configuration",
                    spec.cluster_name
                );
                continue;
            }
            let cluster = Cluster::new(&self.ctx, spec)?;
            prefixes.claim(&cluster)?;
            let compiled = self.emit(&cluster)?;
            log::info!(
                "Compiled cluster '{}' ({} resources)",
                spec.cluster_name,
                compiled.resources().len()
            );
            template.merge(compiled)?;
        }
        Ok(template)
    }
}

/// Naming prefixes already used by earlier clusters, with the names they came from
#[derive(Debug, Default)]
struct PrefixClaims {
    owners: HashMap<String, String>,
}

impl PrefixClaims {
    /// Distinct clusters or services must not share a prefix once their names are normalized
    fn claim(&mut self, cluster: &Cluster) -> CompileResult<()> {
        let cluster_name = cluster.name().to_string();
        let mut claims = vec![(cluster.prefix().to_string(), format!("cluster '{}'", cluster_name))];
        claims.extend(cluster.services().iter().map(|service| {
            (
                service.prefix().to_string(),
                format!("service '{}' of cluster '{}'", service.name(), cluster_name),
            )
        }));

        for (prefix, owner) in claims {
            if let Some(first) = self.owners.get(&prefix) {
                return Err(CompileError::invalid(
                    &owner,
                    format!("name normalizes to '{}', already used by {}", prefix, first),
                ));
            }
            self.owners.insert(prefix, owner);
        }
        Ok(())
    }
}

/// Every reference must resolve inside the template, except declared external targets
fn check_graph(template: &Template, external: &[String]) -> CompileResult<()> {
    let graph = DependencyGraph::from_template(template);
    if let Some((from, target)) = graph
        .dangling_references()
        .into_iter()
        .find(|(_, target)| !external.contains(target))
    {
        return Err(CompileError::DanglingReference { from, target });
    }
    if graph.has_cycle() {
        return Err(CompileError::DependencyCycle);
    }
    Ok(())
}
