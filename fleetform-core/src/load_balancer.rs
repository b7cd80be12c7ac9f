//! Load balancer - The cluster-wide ALB and its security perimeter

use indexmap::IndexMap;

use crate::config::{AlbProtocol, ClusterSpec, provided};
use crate::context::{CompileContext, Tags};
use crate::error::{CompileError, CompileResult};
use crate::naming::Role;
use crate::network::Network;
use crate::resource::{Resource, ResourceKind, Value};
use crate::service::Service;
use crate::template::Template;

const DEFAULT_IDLE_TIMEOUT: u32 = 30;

/// How the cluster reaches its load balancer
#[derive(Debug, Clone, PartialEq)]
pub enum AlbMode {
    /// No load balancer at all
    Disabled,
    /// Rules attach to an externally managed listener; no ALB is created
    External { listener_arn: Value },
    /// The ALB and its per-port listeners are created here
    Managed,
}

/// One ALB listener, shared by every service listening on its port
#[derive(Debug, Clone, PartialEq)]
pub struct PortListener {
    pub name: String,
    pub port: u16,
    pub protocol: AlbProtocol,
    /// Target group of the first service registered on the port
    pub default_target_group: String,
    pub certificate_arns: Vec<String>,
}

/// Dedicated ingress group of one service behind a public ALB
#[derive(Debug, Clone, PartialEq)]
struct ServiceGroup {
    name: String,
    ingress: String,
    service: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancer {
    name: String,
    mode: AlbMode,
    private: bool,
    idle_timeout: u32,
    listeners: Vec<PortListener>,
    service_groups: Vec<ServiceGroup>,
}

impl LoadBalancer {
    /// Aggregate every listener of the cluster by port.
    ///
    /// The protocol check runs over all listeners declaring a protocol before
    /// anything is emitted, whether or not the ALB is enabled.
    pub fn new(
        ctx: &CompileContext,
        prefix: &str,
        spec: &ClusterSpec,
        services: &[Service],
    ) -> CompileResult<Self> {
        let naming = ctx.naming();
        let cluster = naming.name(prefix, Role::Cluster);

        let mut by_port: IndexMap<u16, PortListener> = IndexMap::new();
        for service in services {
            for listener in service.listeners() {
                let Some(protocol) = listener.protocol() else {
                    continue;
                };
                match by_port.get(&listener.port()) {
                    Some(existing) if existing.protocol != protocol => {
                        return Err(CompileError::PortProtocolConflict {
                            service: service.name().to_string(),
                            cluster,
                            port: listener.port(),
                            protocol: protocol.to_string(),
                            existing: existing.protocol.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        by_port.insert(
                            listener.port(),
                            PortListener {
                                name: naming.name_with(prefix, Role::LoadBalancerListener, listener.port()),
                                port: listener.port(),
                                protocol,
                                default_target_group: listener.target_group().to_string(),
                                certificate_arns: listener.certificate_arns().to_vec(),
                            },
                        );
                    }
                }
            }
        }

        let mode = if spec.alb_disabled {
            AlbMode::Disabled
        } else if let Some(listener_arn) = provided(&spec.alb_listener_arn) {
            AlbMode::External {
                listener_arn: Value::from_input(listener_arn),
            }
        } else {
            AlbMode::Managed
        };

        let service_groups = if mode == AlbMode::Disabled || spec.alb_private {
            Vec::new()
        } else {
            services
                .iter()
                .filter(|service| service.has_alb_listener())
                .map(|service| ServiceGroup {
                    name: naming.name_with(prefix, Role::LoadBalancerSecurityGroup, service.token()),
                    ingress: naming.name_with(prefix, Role::SecurityGroupIngressAlb, service.token()),
                    service: service.logical_id().to_string(),
                })
                .collect()
        };

        let listeners = match mode {
            AlbMode::Disabled => Vec::new(),
            _ => by_port.into_values().collect(),
        };

        Ok(Self {
            name: naming.name(prefix, Role::LoadBalancer),
            mode,
            private: spec.alb_private,
            idle_timeout: spec.timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
            listeners,
            service_groups,
        })
    }

    pub fn logical_id(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> &AlbMode {
        &self.mode
    }

    /// True when the ALB resource is created by this compile
    pub fn is_managed(&self) -> bool {
        self.mode == AlbMode::Managed
    }

    pub fn listeners(&self) -> &[PortListener] {
        &self.listeners
    }

    /// Listener that rules of `service` on `port` attach to
    pub fn listener_arn(&self, service: &str, port: u16) -> CompileResult<Value> {
        match &self.mode {
            AlbMode::External { listener_arn } => Ok(listener_arn.clone()),
            _ => self
                .listeners
                .iter()
                .find(|l| l.port == port)
                .map(|l| Value::reference(&l.name))
                .ok_or_else(|| CompileError::UnknownListenerPort {
                    service: service.to_string(),
                    port,
                }),
        }
    }

    pub fn dns_name(&self) -> Value {
        Value::get_att(&self.name, "DNSName")
    }

    fn security_group_refs(&self, network: &Network, container_group: Option<&Value>) -> Vec<Value> {
        let mut groups: Vec<Value> = self
            .service_groups
            .iter()
            .map(|group| Value::reference(&group.name))
            .collect();
        if self.private && !network.is_existing() {
            groups.extend(container_group.cloned());
        }
        if let Some(existing) = network.security_groups() {
            match existing.to_list() {
                Some(list) => groups.extend(list),
                None => groups.push(existing.to_value()),
            }
        }
        groups
    }

    /// Emit the per-service security groups and, when managed, the ALB and its listeners
    pub fn emit(
        &self,
        tags: &Tags,
        network: &Network,
        container_group: Option<&Value>,
        template: &mut Template,
    ) -> CompileResult<()> {
        if self.mode == AlbMode::Disabled {
            return Ok(());
        }

        for group in &self.service_groups {
            template.insert_resource(
                &group.name,
                Resource::new(ResourceKind::SecurityGroup)
                    .with_optional("Tags", tags.to_value())
                    .with_property(
                        "GroupDescription",
                        format!("Access to the public facing load balancer - task {}", group.service),
                    )
                    .with_property("VpcId", network.vpc_ref())
                    .with_property(
                        "SecurityGroupIngress",
                        Value::list([Value::map([
                            ("CidrIp", Value::from("0.0.0.0/0")),
                            ("IpProtocol", Value::Int(-1)),
                        ])]),
                    ),
            )?;
            if let (false, Some(container_group)) = (network.is_existing(), container_group) {
                template.insert_resource(
                    &group.ingress,
                    Resource::new(ResourceKind::SecurityGroupIngress)
                        .with_property(
                            "Description",
                            format!("Ingress from the ALB - task {}", group.service),
                        )
                        .with_property("GroupId", container_group.clone())
                        .with_property("IpProtocol", Value::Int(-1))
                        .with_property("SourceSecurityGroupId", Value::reference(&group.name)),
                )?;
            }
        }

        if !self.is_managed() {
            return Ok(());
        }

        let security_groups = self.security_group_refs(network, container_group);
        template.insert_resource(
            &self.name,
            Resource::new(ResourceKind::LoadBalancer)
                .with_property("Name", &self.name)
                .with_optional("Tags", tags.to_value())
                .with_property("Scheme", if self.private { "internal" } else { "internet-facing" })
                .with_property(
                    "LoadBalancerAttributes",
                    Value::list([Value::map([
                        ("Key", Value::from("idle_timeout.timeout_seconds")),
                        ("Value", Value::from(self.idle_timeout.to_string())),
                    ])]),
                )
                .with_property("Subnets", network.alb_subnets())
                .with_optional(
                    "SecurityGroups",
                    (!security_groups.is_empty()).then(|| Value::List(security_groups)),
                ),
        )?;

        for listener in &self.listeners {
            let certificates = (listener.protocol == AlbProtocol::Https).then(|| {
                Value::list(
                    listener
                        .certificate_arns
                        .iter()
                        .map(|arn| Value::map([("CertificateArn", Value::from(arn))])),
                )
            });
            template.insert_resource(
                &listener.name,
                Resource::new(ResourceKind::LoadBalancerListener)
                    .depends_on(&self.name)
                    .with_property(
                        "DefaultActions",
                        Value::list([Value::map([
                            ("TargetGroupArn", Value::reference(&listener.default_target_group)),
                            ("Type", Value::from("forward")),
                        ])]),
                    )
                    .with_property("LoadBalancerArn", Value::reference(&self.name))
                    .with_property("Port", listener.port)
                    .with_property("Protocol", listener.protocol.as_str())
                    .with_optional("Certificates", certificates),
            )?;
        }
        Ok(())
    }
}
