//! Naming - Deterministic logical ids for generated resources
//!
//! Every resource key in the compiled graph is derived here from
//! `(prefix, role, stage, discriminator)`. The prefix already encodes the
//! host service, the cluster and (for service-scoped resources) the service,
//! so the same logical resource re-derives the same id on every compile.

use std::fmt;

/// Role of a generated resource; the closed set of name categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Cluster,
    ContainerSecurityGroup,
    SecurityGroupIngressSelf,
    Vpc,
    InternetGateway,
    GatewayAttachment,
    RouteTable,
    Route,
    Subnet,
    RouteTableAssociation,
    LoadBalancer,
    LoadBalancerListener,
    LoadBalancerSecurityGroup,
    SecurityGroupIngressAlb,
    ListenerRule,
    TargetGroup,
    TaskDefinition,
    Container,
    Service,
    LogGroup,
    SchedulerRule,
    ExecutionRole,
    AutoScalingRole,
    AutoScalingTarget,
    AutoScalingPolicy,
    AutoScalingPolicyIn,
    AutoScalingPolicyOut,
    AutoScalingAlarmIn,
    AutoScalingAlarmOut,
}

impl Role {
    pub fn tag(&self) -> &'static str {
        match self {
            Role::Cluster => "ECSCluster",
            Role::ContainerSecurityGroup => "ContainerSecGroup",
            Role::SecurityGroupIngressSelf => "ECSSecGroupIngressSelf",
            Role::Vpc => "VPC",
            Role::InternetGateway => "InternetGateway",
            Role::GatewayAttachment => "GatewayAttachment",
            Role::RouteTable => "RouteTable",
            Role::Route => "PublicRoute",
            Role::Subnet => "Subnet",
            Role::RouteTableAssociation => "RouteTableAssociation",
            Role::LoadBalancer => "ALB",
            Role::LoadBalancerListener => "ALBListener",
            Role::LoadBalancerSecurityGroup => "ALBSecGroup",
            Role::SecurityGroupIngressAlb => "ECSSecGroupIngressALB",
            Role::ListenerRule => "ALBListenerRule",
            Role::TargetGroup => "TargetGroup",
            Role::TaskDefinition => "TaskDefinition",
            Role::Container => "Container",
            Role::Service => "Service",
            Role::LogGroup => "LogGroup",
            Role::SchedulerRule => "SchedulerRule",
            Role::ExecutionRole => "ECSServiceExecutionRole",
            Role::AutoScalingRole => "AutoScalingRole",
            Role::AutoScalingTarget => "AutoScalingTarget",
            Role::AutoScalingPolicy => "AutoScalingPolicy",
            Role::AutoScalingPolicyIn => "AutoScalingPolicyIn",
            Role::AutoScalingPolicyOut => "AutoScalingPolicyOut",
            Role::AutoScalingAlarmIn => "AutoScalingAlarmIn",
            Role::AutoScalingAlarmOut => "AutoScalingAlarmOut",
        }
    }
}

/// Normalize a human-readable name into an identifier-safe token
/// e.g., "my web-api v2" -> "MyWebApiV2"
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let mut chars = piece.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

/// Normalize the host service name into the naming prefix.
/// Hyphens are dropped, the first letter is capitalized and underscores are spelled out.
/// e.g., "my-app" -> "Myapp", "orders_api" -> "OrdersUnderscoreapi"
pub fn normalize_service_prefix(service: &str) -> String {
    let stripped: String = service.chars().filter(|c| *c != '-').collect();
    let mut chars = stripped.chars();
    let capitalized: String = match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    };
    capitalized.replace('_', "Underscore")
}

/// Naming authority for one compile invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    stage_token: String,
}

impl Naming {
    pub fn new(stage: &str) -> Self {
        Self {
            stage_token: normalize_name(stage),
        }
    }

    pub fn stage_token(&self) -> &str {
        &self.stage_token
    }

    /// `prefix + role + stage`
    pub fn name(&self, prefix: &str, role: Role) -> String {
        format!("{}{}{}", prefix, role.tag(), self.stage_token)
    }

    /// `prefix + role + stage + discriminator`, for roles with several instances
    pub fn name_with(&self, prefix: &str, role: Role, discriminator: impl fmt::Display) -> String {
        format!("{}{}", self.name(prefix, role), discriminator)
    }
}
