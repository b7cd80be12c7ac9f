//! Cluster - Composes network, load balancer and services into one graph

use std::collections::HashMap;

use crate::config::{ClusterSpec, provided};
use crate::context::{CompileContext, Tags};
use crate::error::{CompileError, CompileResult};
use crate::load_balancer::LoadBalancer;
use crate::naming::{Role, normalize_name};
use crate::network::Network;
use crate::resource::{Resource, ResourceKind, Value};
use crate::service::{ExecutionRole, Service, ServiceScope};
use crate::template::Template;

/// Where the cluster lives
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterRef {
    /// Created by this compile under the given logical id
    Created(String),
    /// Supplied by another stack
    Shared { arn: Value, ingress_group: Value },
}

#[derive(Debug, Clone)]
pub struct Cluster {
    name: String,
    prefix: String,
    reference: ClusterRef,
    container_group: String,
    self_ingress: String,
    insights: bool,
    tags: Tags,
    network: Network,
    services: Vec<Service>,
    load_balancer: LoadBalancer,
    execution_role: ExecutionRole,
}

impl Cluster {
    /// Resolve every component of the cluster. All validation happens here,
    /// before anything is emitted.
    pub fn new(ctx: &CompileContext, spec: &ClusterSpec) -> CompileResult<Self> {
        let context = format!("cluster '{}'", spec.cluster_name);
        let token = normalize_name(&spec.cluster_name);
        if token.is_empty() {
            return Err(CompileError::invalid(
                &context,
                "clusterName must contain at least one alphanumeric character",
            ));
        }
        let network_spec = spec
            .vpc
            .as_ref()
            .ok_or_else(|| CompileError::missing_field(&context, "vpc"))?;

        let naming = ctx.naming();
        let prefix = format!("{}{}", ctx.service_prefix(), token);

        let shared = spec.cluster_arns.as_ref().and_then(|arns| {
            match (
                provided(&arns.ecs_cluster_arn),
                provided(&arns.ecs_ingress_sec_group_id),
            ) {
                (Some(arn), Some(group)) => Some(ClusterRef::Shared {
                    arn: Value::from_input(arn),
                    ingress_group: Value::from_input(group),
                }),
                _ => None,
            }
        });
        let reference = shared.unwrap_or_else(|| ClusterRef::Created(naming.name(&prefix, Role::Cluster)));

        let network = Network::resolve(ctx, &prefix, network_spec)?;
        let services = spec
            .services
            .iter()
            .map(|service| Service::new(ctx, &prefix, spec.alb_disabled, service))
            .collect::<CompileResult<Vec<_>>>()?;
        check_distinct_tokens(&context, &services)?;
        let load_balancer = LoadBalancer::new(ctx, &prefix, spec, &services)?;

        let execution_role = match provided(&spec.execution_role_arn) {
            Some(arn) => ExecutionRole::Supplied(Value::from_input(arn)),
            None => ExecutionRole::Generated(naming.name(&prefix, Role::ExecutionRole)),
        };

        log::debug!(
            "Resolved cluster {} with {} service(s), {} network, shared: {}",
            prefix,
            services.len(),
            if network.is_existing() { "existing" } else { "dedicated" },
            matches!(reference, ClusterRef::Shared { .. })
        );

        Ok(Self {
            container_group: naming.name(&prefix, Role::ContainerSecurityGroup),
            self_ingress: naming.name(&prefix, Role::SecurityGroupIngressSelf),
            insights: spec.enable_container_insights,
            tags: Tags::from_spec(&spec.tags),
            name: spec.cluster_name.clone(),
            prefix,
            reference,
            network,
            services,
            load_balancer,
            execution_role,
        })
    }

    /// Display name from the configuration
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.reference, ClusterRef::Shared { .. })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.load_balancer
    }

    /// Value of a service's `Cluster` property
    pub fn cluster_ref(&self) -> Value {
        match &self.reference {
            ClusterRef::Created(name) => Value::reference(name),
            ClusterRef::Shared { arn, .. } => arn.clone(),
        }
    }

    /// Cluster ARN, used as scheduler target
    pub fn cluster_arn(&self) -> Value {
        match &self.reference {
            ClusterRef::Created(name) => Value::get_att(name, "Arn"),
            ClusterRef::Shared { arn, .. } => arn.clone(),
        }
    }

    /// Security group the containers accept traffic on.
    /// A non-shared cluster on an existing network has none.
    pub fn ingress_group(&self) -> Option<Value> {
        match &self.reference {
            ClusterRef::Shared { ingress_group, .. } => Some(ingress_group.clone()),
            ClusterRef::Created(_) if self.network.is_existing() => None,
            ClusterRef::Created(_) => Some(Value::reference(&self.container_group)),
        }
    }

    /// Targets of `metricDependsOn` across all services; they may live outside this graph
    pub fn external_dependencies(&self) -> Vec<String> {
        self.services
            .iter()
            .filter_map(Service::autoscaling)
            .flat_map(|autoscaling| autoscaling.metric_dependencies())
            .collect()
    }

    pub fn emit(&self, ctx: &CompileContext, template: &mut Template) -> CompileResult<()> {
        self.network.emit(&self.tags, template)?;

        if let ClusterRef::Created(name) = &self.reference {
            template.insert_resource(
                name,
                Resource::new(ResourceKind::EcsCluster)
                    .with_property("ClusterName", name)
                    .with_optional("Tags", self.tags.to_value())
                    .with_optional(
                        "ClusterSettings",
                        self.insights.then(|| {
                            Value::list([Value::map([
                                ("Name", Value::from("containerInsights")),
                                ("Value", Value::from("enabled")),
                            ])])
                        }),
                    ),
            )?;
            if !self.network.is_existing() {
                self.emit_container_group(template)?;
            }
        }

        let ingress_group = self.ingress_group();
        self.load_balancer
            .emit(&self.tags, &self.network, ingress_group.as_ref(), template)?;

        let cluster_ref = self.cluster_ref();
        let cluster_arn = self.cluster_arn();
        let scope = ServiceScope {
            cluster_prefix: &self.prefix,
            tags: &self.tags,
            network: &self.network,
            load_balancer: &self.load_balancer,
            cluster_ref: &cluster_ref,
            cluster_arn: &cluster_arn,
            ingress_group: ingress_group.as_ref(),
            execution_role: &self.execution_role,
        };
        for service in &self.services {
            service.emit(ctx, &scope, template)?;
        }
        Ok(())
    }

    fn emit_container_group(&self, template: &mut Template) -> CompileResult<()> {
        template.insert_resource(
            &self.container_group,
            Resource::new(ResourceKind::SecurityGroup)
                .with_optional("Tags", self.tags.to_value())
                .with_property("GroupDescription", "Access to the ECS containers")
                .with_property("VpcId", self.network.vpc_ref()),
        )?;
        template.insert_resource(
            &self.self_ingress,
            Resource::new(ResourceKind::SecurityGroupIngress)
                .with_property(
                    "Description",
                    "Ingress from other containers in the same security group",
                )
                .with_property("GroupId", Value::reference(&self.container_group))
                .with_property("IpProtocol", Value::Int(-1))
                .with_property("SourceSecurityGroupId", Value::reference(&self.container_group)),
        )
    }
}

/// Names that normalize to the same token would share every logical id
fn check_distinct_tokens(context: &str, services: &[Service]) -> CompileResult<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for service in services {
        if let Some(first) = seen.insert(service.token(), service.name()) {
            return Err(CompileError::invalid(
                context,
                format!(
                    "services '{}' and '{}' both normalize to '{}'",
                    first,
                    service.name(),
                    service.token()
                ),
            ));
        }
    }
    Ok(())
}
