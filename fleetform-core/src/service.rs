//! Service - Task definition, service resource and everything hanging off one service

use std::collections::HashSet;

use crate::autoscaling::{AutoScaling, ScalingScope};
use crate::config::{
    CapacityProviderSpec, PlacementConstraintSpec, PlacementStrategySpec, PropagateTags, ServiceSpec,
    provided,
};
use crate::context::{CompileContext, Tags};
use crate::error::{CompileError, CompileResult};
use crate::listener::{Listener, ListenerOwner, Routing};
use crate::load_balancer::LoadBalancer;
use crate::naming::{Role, normalize_name};
use crate::network::Network;
use crate::resource::{Resource, ResourceKind, Value};
use crate::template::Template;

const DEFAULT_LOG_RETENTION_DAYS: u32 = 365;

/// Execution substrate of a service
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchType {
    Fargate {
        assign_public_ip: bool,
    },
    Ec2 {
        daemon: bool,
        placement_constraints: Vec<PlacementConstraintSpec>,
        placement_strategies: Vec<PlacementStrategySpec>,
        capacity_provider_strategy: Vec<CapacityProviderSpec>,
    },
}

impl LaunchType {
    pub fn from_spec(spec: &ServiceSpec) -> Self {
        if spec.ec2_launch_type {
            LaunchType::Ec2 {
                daemon: spec.daemon_ec2_type,
                placement_constraints: spec.placement_constraints.clone(),
                placement_strategies: spec.placement_strategies.clone(),
                capacity_provider_strategy: spec.capacity_provider_strategy.clone(),
            }
        } else {
            LaunchType::Fargate {
                assign_public_ip: !spec.disable_public_ip_assign,
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchType::Fargate { .. } => "FARGATE",
            LaunchType::Ec2 { .. } => "EC2",
        }
    }

    fn network_mode(&self) -> &'static str {
        match self {
            LaunchType::Fargate { .. } => "awsvpc",
            LaunchType::Ec2 { .. } => "bridge",
        }
    }

    fn target_type(&self) -> &'static str {
        match self {
            LaunchType::Fargate { .. } => "ip",
            LaunchType::Ec2 { .. } => "instance",
        }
    }
}

/// Role the tasks of a cluster run with
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionRole {
    Supplied(Value),
    /// Generated once per cluster under this logical id
    Generated(String),
}

impl ExecutionRole {
    pub fn arn(&self) -> Value {
        match self {
            ExecutionRole::Supplied(arn) => arn.clone(),
            ExecutionRole::Generated(name) => Value::reference(name),
        }
    }

    fn emit(&self, tags: &Tags, template: &mut Template) -> CompileResult<()> {
        let ExecutionRole::Generated(name) = self else {
            return Ok(());
        };
        let assume = Value::map([(
            "Statement",
            Value::list([Value::map([
                ("Effect", Value::from("Allow")),
                (
                    "Principal",
                    Value::map([("Service", Value::list([Value::from("ecs-tasks.amazonaws.com")]))]),
                ),
                ("Action", Value::list([Value::from("sts:AssumeRole")])),
            ])]),
        )]);
        let actions = [
            "ecr:GetAuthorizationToken",
            "ecr:BatchCheckLayerAvailability",
            "ecr:GetDownloadUrlForLayer",
            "ecr:BatchGetImage",
            "logs:CreateLogStream",
            "logs:PutLogEvents",
        ];
        let policies = Value::list([Value::map([
            ("PolicyName", Value::from("AmazonECSTaskExecutionRolePolicy")),
            (
                "PolicyDocument",
                Value::map([(
                    "Statement",
                    Value::list([Value::map([
                        ("Effect", Value::from("Allow")),
                        ("Action", Value::list(actions.into_iter().map(Value::from))),
                        ("Resource", Value::from("*")),
                    ])]),
                )]),
            ),
        ])]);

        // every service of the cluster emits the same role
        template.insert_shared_resource(
            name,
            Resource::new(ResourceKind::IamRole)
                .with_property("RoleName", name)
                .with_optional("Tags", tags.to_value())
                .with_property("AssumeRolePolicyDocument", assume)
                .with_property("Path", "/")
                .with_property("Policies", policies),
        )
    }
}

/// Cluster-level values a service reads while emitting
pub struct ServiceScope<'a> {
    pub cluster_prefix: &'a str,
    pub tags: &'a Tags,
    pub network: &'a Network,
    pub load_balancer: &'a LoadBalancer,
    /// Value of the service `Cluster` property
    pub cluster_ref: &'a Value,
    pub cluster_arn: &'a Value,
    /// Container ingress group, when one exists
    pub ingress_group: Option<&'a Value>,
    pub execution_role: &'a ExecutionRole,
}

#[derive(Debug, Clone)]
pub struct Service {
    spec: ServiceSpec,
    token: String,
    prefix: String,
    logical_id: String,
    task_definition: String,
    container: String,
    log_group: String,
    log_group_name: String,
    scheduler_rule: String,
    image: String,
    launch_type: LaunchType,
    listeners: Vec<Listener>,
    routing: Routing,
    autoscaling: Option<AutoScaling>,
}

impl Service {
    pub fn new(
        ctx: &CompileContext,
        cluster_prefix: &str,
        alb_disabled: bool,
        spec: &ServiceSpec,
    ) -> CompileResult<Self> {
        let context = format!("service '{}'", spec.name);
        let token = normalize_name(&spec.name);
        if token.is_empty() {
            return Err(CompileError::invalid(
                &context,
                "name must contain at least one alphanumeric character",
            ));
        }

        let image = match (&spec.image, &spec.image_repository) {
            (Some(image), _) => image.clone(),
            (None, Some(repository)) => match &spec.image_tag {
                Some(tag) => format!("{}:{}-{}", repository, spec.name, tag),
                None => format!("{}:{}", repository, spec.name),
            },
            (None, None) => return Err(CompileError::missing_field(&context, "image")),
        };

        let naming = ctx.naming();
        let prefix = format!("{}{}", cluster_prefix, token);
        let owner = ListenerOwner {
            cluster_prefix,
            service_prefix: &prefix,
            service_name: &spec.name,
            alb_disabled,
        };
        let listeners = spec
            .listeners
            .iter()
            .enumerate()
            .map(|(index, listener)| Listener::resolve(ctx, &owner, index, listener))
            .collect::<CompileResult<Vec<_>>>()?;

        let mut ports = HashSet::new();
        if let Some(listener) = listeners.iter().find(|l| !ports.insert(l.port())) {
            return Err(CompileError::invalid(
                &context,
                format!("port {} is declared by more than one listener", listener.port()),
            ));
        }

        let autoscaling = spec
            .auto_scale
            .as_ref()
            .map(|auto_scale| AutoScaling::resolve(&spec.name, auto_scale))
            .transpose()?;

        Ok(Self {
            token,
            logical_id: naming.name(&prefix, Role::Service),
            task_definition: naming.name(&prefix, Role::TaskDefinition),
            container: naming.name(&prefix, Role::Container),
            log_group: naming.name(&prefix, Role::LogGroup),
            log_group_name: format!("/aws/ecs/{}/{}/{}", cluster_prefix, ctx.stage(), spec.name),
            scheduler_rule: naming.name(&prefix, Role::SchedulerRule),
            image,
            launch_type: LaunchType::from_spec(spec),
            listeners,
            routing: Routing::from_spec(spec),
            autoscaling,
            prefix,
            spec: spec.clone(),
        })
    }

    /// Display name from the configuration
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Normalized name token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Cluster prefix followed by the service token
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Logical id of the service resource
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn launch_type(&self) -> &LaunchType {
        &self.launch_type
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn has_alb_listener(&self) -> bool {
        self.listeners.iter().any(Listener::is_alb_attached)
    }

    pub fn autoscaling(&self) -> Option<&AutoScaling> {
        self.autoscaling.as_ref()
    }

    pub fn emit(&self, ctx: &CompileContext, scope: &ServiceScope<'_>, template: &mut Template) -> CompileResult<()> {
        template.insert_resource(&self.logical_id, self.service_resource(scope))?;
        template.insert_resource(&self.task_definition, self.task_definition_resource(scope))?;
        template.insert_resource(
            &self.log_group,
            Resource::new(ResourceKind::LogGroup)
                .with_property("LogGroupName", &self.log_group_name)
                .with_property(
                    "RetentionInDays",
                    self.spec.logs_retention_in_days.unwrap_or(DEFAULT_LOG_RETENTION_DAYS),
                ),
        )?;
        if let Some(rule) = self.scheduler_rule_resource(scope) {
            template.insert_resource(&self.scheduler_rule, rule)?;
        }

        for listener in self.listeners.iter().filter(|l| l.is_alb_attached()) {
            let listener_arn = scope.load_balancer.listener_arn(self.name(), listener.port())?;
            listener.emit(&self.routing, &listener_arn, template)?;
            template.insert_resource(listener.target_group(), self.target_group_resource(scope, listener))?;
        }

        if let Some(autoscaling) = &self.autoscaling {
            let scaling_scope = ScalingScope {
                naming: ctx.naming(),
                service_prefix: &self.prefix,
                service: &self.logical_id,
                cluster_ref: scope.cluster_ref,
                tags: scope.tags,
            };
            autoscaling.emit(&scaling_scope, template)?;
        }

        scope.execution_role.emit(scope.tags, template)?;

        if scope.load_balancer.is_managed() {
            let dns_name = scope.load_balancer.dns_name();
            for listener in &self.listeners {
                listener.emit_output(&dns_name, template)?;
            }
        }
        Ok(())
    }

    fn security_groups(&self, scope: &ServiceScope<'_>) -> Value {
        match scope.network.security_groups() {
            Some(groups) => match groups.to_list() {
                Some(mut list) => {
                    list.extend(scope.ingress_group.cloned());
                    Value::List(list)
                }
                // an opaque expression must already include the ingress group
                None => groups.to_value(),
            },
            None => Value::list(scope.ingress_group.cloned()),
        }
    }

    fn service_resource(&self, scope: &ServiceScope<'_>) -> Resource {
        let tags = scope.tags.to_value();
        let attached: Vec<&Listener> = self.listeners.iter().filter(|l| l.is_alb_attached()).collect();

        let mut resource = Resource::new(ResourceKind::EcsService)
            .with_dependencies(attached.iter().flat_map(|l| l.rule_names(&self.routing)))
            .with_property("ServiceName", &self.logical_id)
            .with_property("Cluster", scope.cluster_ref.clone())
            .with_optional("EnableECSManagedTags", tags.as_ref().map(|_| Value::from(true)))
            .with_optional("Tags", tags)
            .with_property("LaunchType", self.launch_type.as_str());

        let daemon = matches!(self.launch_type, LaunchType::Ec2 { daemon: true, .. });
        if daemon {
            resource = resource.with_property("SchedulingStrategy", "DAEMON");
        }
        resource = resource.with_property(
            "DeploymentConfiguration",
            Value::map([
                ("MaximumPercent", Value::Int(200)),
                ("MinimumHealthyPercent", Value::Int(75)),
            ]),
        );
        if !daemon {
            resource = resource.with_property("DesiredCount", self.spec.desired_count.unwrap_or(1));
        }

        if let LaunchType::Fargate { assign_public_ip } = &self.launch_type {
            resource = resource.with_property(
                "NetworkConfiguration",
                Value::map([(
                    "AwsvpcConfiguration",
                    Value::map([
                        (
                            "AssignPublicIp",
                            Value::from(if *assign_public_ip { "ENABLED" } else { "DISABLED" }),
                        ),
                        ("SecurityGroups", self.security_groups(scope)),
                        ("Subnets", scope.network.subnets()),
                    ]),
                )]),
            );
        }

        resource = resource
            .with_property("TaskDefinition", Value::reference(&self.task_definition))
            .with_optional(
                "LoadBalancers",
                (!attached.is_empty()).then(|| {
                    Value::list(attached.iter().map(|l| {
                        Value::map([
                            ("ContainerName", Value::from(&self.container)),
                            ("ContainerPort", Value::from(l.container_port())),
                            ("TargetGroupArn", Value::reference(l.target_group())),
                        ])
                    }))
                }),
            );

        if self.spec.propagate_tags != PropagateTags::Off {
            resource = resource.with_property("PropagateTags", self.spec.propagate_tags.as_str());
        }

        if let LaunchType::Ec2 {
            placement_constraints,
            placement_strategies,
            capacity_provider_strategy,
            ..
        } = &self.launch_type
        {
            resource = resource
                .with_optional(
                    "PlacementConstraints",
                    non_empty(placement_constraints, |c| {
                        Value::map([
                            ("Expression", c.expression.as_ref().map_or_else(Value::no_value, Value::from)),
                            ("Type", Value::from(&c.kind)),
                        ])
                    }),
                )
                .with_optional(
                    "PlacementStrategies",
                    non_empty(placement_strategies, |s| {
                        Value::map([
                            ("Field", s.field.as_ref().map_or_else(Value::no_value, Value::from)),
                            ("Type", Value::from(&s.kind)),
                        ])
                    }),
                )
                .with_optional(
                    "CapacityProviderStrategy",
                    non_empty(capacity_provider_strategy, |s| {
                        Value::map([
                            ("Base", s.base.map_or_else(Value::no_value, Value::from)),
                            ("Weight", s.weight.map_or_else(Value::no_value, Value::from)),
                            ("CapacityProvider", Value::from(&s.capacity_provider)),
                        ])
                    }),
                );
        }
        resource
    }

    fn task_definition_resource(&self, scope: &ServiceScope<'_>) -> Resource {
        let spec = &self.spec;
        let cpu = spec.cpu.filter(|c| *c >= 0);
        let memory = spec.memory.filter(|m| *m >= 0);

        let mut log_options = vec![
            ("awslogs-group", Value::from(&self.log_group_name)),
            ("awslogs-region", Value::region()),
            ("awslogs-stream-prefix", Value::from(&self.task_definition)),
        ];
        if let Some(pattern) = &spec.logs_multiline_pattern {
            log_options.push(("awslogs-multiline-pattern", Value::from(pattern)));
        }

        let ulimits = (spec.soft_cpu.is_some() || spec.hard_cpu.is_some()).then(|| {
            Value::list([Value::map([
                ("SoftLimit", Value::Int(spec.soft_cpu.unwrap_or(-1))),
                ("Name", Value::from("cpu")),
                ("HardLimit", Value::Int(spec.hard_cpu.unwrap_or(-1))),
            ])])
        });

        let container = [
            ("Name", Some(Value::from(&self.container))),
            ("Cpu", cpu.map(Value::Int)),
            ("Memory", memory.map(Value::Int)),
            ("Ulimits", ulimits),
            ("MemoryReservation", spec.soft_memory.map(Value::Int)),
            ("Image", Some(Value::from(&self.image))),
            (
                "EntryPoint",
                spec.entry_point
                    .as_ref()
                    .map(|entry| Value::list(entry.iter().map(Value::from))),
            ),
            ("Privileged", spec.privileged.then(|| Value::from(true))),
            (
                "MountPoints",
                non_empty(&spec.mount_points, |m| {
                    Value::map([
                        ("SourceVolume", Value::from(&m.source)),
                        ("ContainerPath", Value::from(&m.dest)),
                    ])
                }),
            ),
            (
                "PortMappings",
                non_empty(&self.listeners, |l| {
                    Value::map([("ContainerPort", Value::from(l.container_port()))])
                }),
            ),
            (
                "LogConfiguration",
                Some(Value::map([
                    ("LogDriver", Value::from("awslogs")),
                    ("Options", Value::map(log_options)),
                ])),
            ),
            (
                "Environment",
                (!spec.environment.is_empty()).then(|| {
                    Value::list(spec.environment.iter().map(|(name, value)| {
                        Value::map([("Name", Value::from(name)), ("Value", Value::from_input(value))])
                    }))
                }),
            ),
        ];
        let container = Value::map(
            container
                .into_iter()
                .filter_map(|(key, value)| value.map(|value| (key, value))),
        );

        Resource::new(ResourceKind::EcsTaskDefinition)
            .with_optional("Tags", scope.tags.to_value())
            .with_property("Family", &self.task_definition)
            .with_optional("Cpu", cpu.map(Value::Int))
            .with_optional("Memory", memory.map(Value::Int))
            .with_property("NetworkMode", self.launch_type.network_mode())
            .with_property(
                "RequiresCompatibilities",
                Value::list([Value::from(self.launch_type.as_str())]),
            )
            .with_property("ExecutionRoleArn", scope.execution_role.arn())
            .with_property(
                "TaskRoleArn",
                provided(&spec.task_role_arn).map_or_else(Value::no_value, Value::from_input),
            )
            .with_optional(
                "Volumes",
                non_empty(&spec.volumes, |v| {
                    Value::map([
                        ("Name", Value::from(&v.name)),
                        ("Host", Value::map([("SourcePath", Value::from(&v.source))])),
                    ])
                }),
            )
            .with_property("ContainerDefinitions", Value::list([container]))
    }

    fn target_group_resource(&self, scope: &ServiceScope<'_>, listener: &Listener) -> Resource {
        let spec = &self.spec;
        Resource::new(ResourceKind::TargetGroup)
            .with_optional("Tags", scope.tags.to_value())
            .with_property("HealthCheckIntervalSeconds", spec.health_check_interval.unwrap_or(6))
            .with_property(
                "HealthCheckPath",
                spec.health_check_uri.as_deref().unwrap_or("/"),
            )
            .with_property(
                "HealthCheckProtocol",
                spec.health_check_protocol.as_deref().unwrap_or("HTTP"),
            )
            .with_property("HealthCheckTimeoutSeconds", spec.health_check_timeout.unwrap_or(5))
            .with_property("HealthyThresholdCount", spec.health_check_healthy_count.unwrap_or(2))
            .with_optional(
                "Matcher",
                spec.health_check_status_code
                    .as_ref()
                    .map(|code| Value::map([("HttpCode", Value::from(code))])),
            )
            .with_optional(
                "TargetGroupAttributes",
                spec.deregistration_delay.map(|delay| {
                    Value::list([Value::map([
                        ("Key", Value::from("deregistration_delay.timeout_seconds")),
                        ("Value", Value::from(delay.to_string())),
                    ])])
                }),
            )
            .with_property("TargetType", self.launch_type.target_type())
            .with_property("Port", listener.container_port())
            .with_property("Protocol", "HTTP")
            .with_property(
                "UnhealthyThresholdCount",
                spec.health_check_unhealthy_count.unwrap_or(2),
            )
            .with_property("VpcId", scope.network.vpc_ref())
    }

    fn scheduler_rule_resource(&self, scope: &ServiceScope<'_>) -> Option<Resource> {
        let rate = self.spec.scheduler_rate.as_ref()?;
        let input = provided(&self.spec.scheduler_input).map(|input| match input {
            serde_json::Value::String(text) => Value::from(text),
            other => Value::from(other.to_string()),
        });
        let mut target = vec![
            ("Id", Value::from(&self.scheduler_rule)),
            ("RoleArn", scope.execution_role.arn()),
            (
                "EcsParameters",
                Value::map([
                    ("TaskDefinitionArn", Value::reference(&self.task_definition)),
                    ("TaskCount", Value::from(self.spec.scheduler_concurrency.unwrap_or(1))),
                ]),
            ),
            ("Arn", scope.cluster_arn.clone()),
        ];
        target.extend(input.map(|input| ("Input", input)));

        Some(
            Resource::new(ResourceKind::EventsRule)
                .with_deletion_policy(None)
                .with_property("Description", format!("Scheduler for task {}", self.task_definition))
                .with_property("Name", &self.scheduler_rule)
                .with_property("ScheduleExpression", rate)
                .with_property("State", "ENABLED")
                .with_property("Targets", Value::list([Value::map(target)])),
        )
    }
}

/// Map a list into a list value, or None when it is empty
fn non_empty<T>(items: &[T], f: impl Fn(&T) -> Value) -> Option<Value> {
    (!items.is_empty()).then(|| Value::list(items.iter().map(f)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterSpec;
    use serde_json::json;

    struct Fixture {
        cluster: ClusterSpec,
        network: Network,
        services: Vec<Service>,
        load_balancer: LoadBalancer,
        cluster_ref: Value,
        cluster_arn: Value,
        ingress: Value,
        role: ExecutionRole,
        tags: Tags,
    }

    fn ctx() -> CompileContext {
        CompileContext::new("dev", "my-app")
    }

    fn fixture(cluster: serde_json::Value) -> Fixture {
        let cluster: ClusterSpec = serde_json::from_value(cluster).unwrap();
        let network_spec = cluster.vpc.clone().unwrap_or_else(|| {
            serde_json::from_value(json!({ "cidr": "10.0.0.0/16", "subnets": ["10.0.1.0/24"] })).unwrap()
        });
        let network = Network::resolve(&ctx(), "MyappApi", &network_spec).unwrap();
        let services: Vec<Service> = cluster
            .services
            .iter()
            .map(|s| Service::new(&ctx(), "MyappApi", cluster.alb_disabled, s).unwrap())
            .collect();
        let load_balancer = LoadBalancer::new(&ctx(), "MyappApi", &cluster, &services).unwrap();
        let tags = Tags::from_spec(&cluster.tags);
        Fixture {
            cluster,
            network,
            services,
            load_balancer,
            cluster_ref: Value::reference("MyappApiECSClusterDev"),
            cluster_arn: Value::get_att("MyappApiECSClusterDev", "Arn"),
            ingress: Value::reference("MyappApiContainerSecGroupDev"),
            role: ExecutionRole::Generated("MyappApiECSServiceExecutionRoleDev".to_string()),
            tags,
        }
    }

    fn emit(fixture: &Fixture) -> Template {
        let scope = ServiceScope {
            cluster_prefix: "MyappApi",
            tags: &fixture.tags,
            network: &fixture.network,
            load_balancer: &fixture.load_balancer,
            cluster_ref: &fixture.cluster_ref,
            cluster_arn: &fixture.cluster_arn,
            ingress_group: Some(&fixture.ingress),
            execution_role: &fixture.role,
        };
        let mut template = Template::new();
        for service in &fixture.services {
            service.emit(&ctx(), &scope, &mut template).unwrap();
        }
        template
    }

    #[test]
    fn fargate_service_with_http_listener() {
        let fixture = fixture(json!({
            "clusterName": "api",
            "services": [{ "name": "web", "cpu": 256, "memory": 512, "image": "nginx", "listeners": [{ "albProtocol": "HTTP" }] }]
        }));
        assert_eq!(fixture.cluster.services.len(), 1);
        let template = emit(&fixture);

        let service = template.resource("MyappApiWebServiceDev").unwrap();
        assert_eq!(service.depends_on, vec!["MyappApiWebALBListenerRuleDevHTTP80Rule0".to_string()]);
        assert_eq!(service.property("LaunchType"), Some(&Value::from("FARGATE")));
        assert_eq!(service.property("DesiredCount"), Some(&Value::Int(1)));
        assert_eq!(
            service.property("NetworkConfiguration").unwrap().to_json(),
            json!({
                "AwsvpcConfiguration": {
                    "AssignPublicIp": "ENABLED",
                    "SecurityGroups": [{ "Ref": "MyappApiContainerSecGroupDev" }],
                    "Subnets": [{ "Ref": "MyappApiSubnetDev0" }]
                }
            })
        );
        assert_eq!(
            service.property("LoadBalancers").unwrap().to_json(),
            json!([{
                "ContainerName": "MyappApiWebContainerDev",
                "ContainerPort": 80,
                "TargetGroupArn": { "Ref": "MyappApiWebTargetGroupDev80" }
            }])
        );
        assert!(service.property("PropagateTags").is_none());

        let task = template.resource("MyappApiWebTaskDefinitionDev").unwrap().to_owned();
        let rendered = serde_json::to_value(&task).unwrap();
        assert_eq!(rendered["Properties"]["NetworkMode"], json!("awsvpc"));
        assert_eq!(rendered["Properties"]["TaskRoleArn"], json!({ "Ref": "AWS::NoValue" }));
        assert_eq!(
            rendered["Properties"]["ExecutionRoleArn"],
            json!({ "Ref": "MyappApiECSServiceExecutionRoleDev" })
        );
        let container = &rendered["Properties"]["ContainerDefinitions"][0];
        assert_eq!(container["Image"], json!("nginx"));
        assert_eq!(container["PortMappings"], json!([{ "ContainerPort": 80 }]));
        assert_eq!(
            container["LogConfiguration"]["Options"]["awslogs-group"],
            json!("/aws/ecs/MyappApi/dev/web")
        );

        let target_group = template.resource("MyappApiWebTargetGroupDev80").unwrap();
        assert_eq!(target_group.property("TargetType"), Some(&Value::from("ip")));
        assert_eq!(target_group.property("HealthCheckPath"), Some(&Value::from("/")));
        assert_eq!(target_group.property("HealthCheckIntervalSeconds"), Some(&Value::Int(6)));

        let log_group = template.resource("MyappApiWebLogGroupDev").unwrap();
        assert_eq!(log_group.property("RetentionInDays"), Some(&Value::Int(365)));

        assert!(template.resource("MyappApiECSServiceExecutionRoleDev").is_some());
        assert!(template.output("MyappApiWebServiceDevHTTP80").is_some());
    }

    #[test]
    fn services_share_one_execution_role() {
        let fixture = fixture(json!({
            "clusterName": "api",
            "services": [
                { "name": "web", "image": "nginx" },
                { "name": "worker", "image": "busybox" }
            ]
        }));
        let template = emit(&fixture);
        let roles = template
            .resources()
            .values()
            .filter(|r| r.kind == ResourceKind::IamRole)
            .count();
        assert_eq!(roles, 1);
    }

    #[test]
    fn ec2_daemon_service() {
        let fixture = fixture(json!({
            "clusterName": "api",
            "services": [{
                "name": "agent",
                "image": "datadog/agent",
                "ec2LaunchType": true,
                "daemonEc2Type": true,
                "propagateTags": "SERVICE",
                "placementConstraints": [{ "type": "distinctInstance" }],
                "listeners": [{ "albProtocol": "HTTP", "port": 8080 }]
            }]
        }));
        let template = emit(&fixture);
        let service = template.resource("MyappApiAgentServiceDev").unwrap();
        assert_eq!(service.property("LaunchType"), Some(&Value::from("EC2")));
        assert_eq!(service.property("SchedulingStrategy"), Some(&Value::from("DAEMON")));
        assert!(service.property("DesiredCount").is_none());
        assert!(service.property("NetworkConfiguration").is_none());
        assert_eq!(service.property("PropagateTags"), Some(&Value::from("SERVICE")));
        assert_eq!(
            service.property("PlacementConstraints").unwrap().to_json(),
            json!([{ "Expression": { "Ref": "AWS::NoValue" }, "Type": "distinctInstance" }])
        );

        let target_group = template.resource("MyappApiAgentTargetGroupDev8080").unwrap();
        assert_eq!(target_group.property("TargetType"), Some(&Value::from("instance")));
        let task = serde_json::to_value(template.resource("MyappApiAgentTaskDefinitionDev").unwrap()).unwrap();
        assert_eq!(task["Properties"]["NetworkMode"], json!("bridge"));
        assert_eq!(task["Properties"]["RequiresCompatibilities"], json!(["EC2"]));
    }

    #[test]
    fn container_settings_pass_through() {
        let fixture = fixture(json!({
            "clusterName": "api",
            "services": [{
                "name": "web",
                "cpu": -1,
                "memory": 1024,
                "softCPU": 128,
                "softMemory": 256,
                "imageRepository": "123.dkr.ecr/app",
                "imageTag": "v3",
                "entryPoint": ["/bin/run"],
                "privileged": true,
                "environment": { "MODE": "prod", "TABLE": { "Ref": "OrdersTable" } },
                "volumes": [{ "name": "data", "source": "/mnt/data" }],
                "mountPoints": [{ "source": "data", "dest": "/data" }],
                "logsMultilinePattern": "^\\{",
                "taskRoleArn": "arn:aws:iam::1:role/app"
            }]
        }));
        let template = emit(&fixture);
        let task = serde_json::to_value(template.resource("MyappApiWebTaskDefinitionDev").unwrap()).unwrap();
        let properties = &task["Properties"];
        assert!(properties.get("Cpu").is_none());
        assert_eq!(properties["Memory"], json!(1024));
        assert_eq!(properties["TaskRoleArn"], json!("arn:aws:iam::1:role/app"));
        assert_eq!(
            properties["Volumes"],
            json!([{ "Name": "data", "Host": { "SourcePath": "/mnt/data" } }])
        );

        let container = &properties["ContainerDefinitions"][0];
        assert_eq!(container["Image"], json!("123.dkr.ecr/app:web-v3"));
        assert_eq!(
            container["Ulimits"],
            json!([{ "SoftLimit": 128, "Name": "cpu", "HardLimit": -1 }])
        );
        assert_eq!(container["MemoryReservation"], json!(256));
        assert_eq!(container["Privileged"], json!(true));
        assert!(container.get("PortMappings").is_none());
        assert_eq!(
            container["Environment"],
            json!([
                { "Name": "MODE", "Value": "prod" },
                { "Name": "TABLE", "Value": { "Ref": "OrdersTable" } }
            ])
        );
        assert_eq!(
            container["LogConfiguration"]["Options"]["awslogs-multiline-pattern"],
            json!("^\\{")
        );
    }

    #[test]
    fn scheduler_rule_serializes_structured_input() {
        let fixture = fixture(json!({
            "clusterName": "api",
            "services": [
                { "name": "cron", "image": "busybox", "schedulerRate": "rate(5 minutes)", "schedulerInput": { "job": "sync" } },
                { "name": "report", "image": "busybox", "schedulerRate": "cron(0 3 * * ? *)", "schedulerInput": "nightly", "schedulerConcurrency": 3 }
            ]
        }));
        let template = emit(&fixture);

        let cron = serde_json::to_value(template.resource("MyappApiCronSchedulerRuleDev").unwrap()).unwrap();
        assert!(cron.get("DeletionPolicy").is_none());
        let target = &cron["Properties"]["Targets"][0];
        assert_eq!(target["Input"], json!("{\"job\":\"sync\"}"));
        assert_eq!(target["Arn"], json!({ "Fn::GetAtt": ["MyappApiECSClusterDev", "Arn"] }));
        assert_eq!(target["EcsParameters"]["TaskCount"], json!(1));

        let report = serde_json::to_value(template.resource("MyappApiReportSchedulerRuleDev").unwrap()).unwrap();
        let target = &report["Properties"]["Targets"][0];
        assert_eq!(target["Input"], json!("nightly"));
        assert_eq!(target["EcsParameters"]["TaskCount"], json!(3));
    }

    #[test]
    fn invalid_services_are_rejected() {
        let empty_name: ServiceSpec = serde_json::from_value(json!({ "name": "---", "image": "nginx" })).unwrap();
        assert!(matches!(
            Service::new(&ctx(), "MyappApi", false, &empty_name),
            Err(CompileError::InvalidConfig { .. })
        ));

        let no_image: ServiceSpec = serde_json::from_value(json!({ "name": "web" })).unwrap();
        assert_eq!(
            Service::new(&ctx(), "MyappApi", false, &no_image).unwrap_err(),
            CompileError::missing_field("service 'web'", "image")
        );

        let same_port: ServiceSpec = serde_json::from_value(json!({
            "name": "web",
            "image": "nginx",
            "listeners": [{ "albProtocol": "HTTP" }, { "albProtocol": "HTTP" }]
        }))
        .unwrap();
        assert!(Service::new(&ctx(), "MyappApi", false, &same_port).is_err());
    }

    #[test]
    fn existing_network_groups_precede_ingress_group() {
        let mut fixture = fixture(json!({
            "clusterName": "api",
            "vpc": { "vpcId": "vpc-1", "securityGroupIds": ["sg-1"], "subnetIds": ["subnet-1"] },
            "services": [{ "name": "web", "image": "nginx" }]
        }));
        fixture.ingress = Value::from("sg-cluster");
        let template = emit(&fixture);
        let service = template.resource("MyappApiWebServiceDev").unwrap();
        assert_eq!(
            service.property("NetworkConfiguration").unwrap().to_json()["AwsvpcConfiguration"]["SecurityGroups"],
            json!(["sg-1", "sg-cluster"])
        );
    }
}
