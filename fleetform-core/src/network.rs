//! Network - Dedicated or pre-existing virtual network of a cluster

use crate::config::{NetworkSpec, provided};
use crate::context::{CompileContext, Tags};
use crate::error::{CompileError, CompileResult};
use crate::naming::Role;
use crate::resource::{Resource, ResourceKind, Value};
use crate::template::Template;

/// Security groups of an existing network
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityGroupRefs {
    List(Vec<Value>),
    /// Opaque provider expression resolving to a list at deploy time
    Expression(serde_json::Value),
    /// `{"Fn::Split": [delimiter, source]}` over a literal string
    Split { delimiter: String, source: String },
}

impl SecurityGroupRefs {
    pub fn from_input(input: &serde_json::Value) -> Self {
        match input {
            serde_json::Value::Array(items) => {
                SecurityGroupRefs::List(items.iter().map(Value::from_input).collect())
            }
            serde_json::Value::String(s) => SecurityGroupRefs::List(vec![Value::from(s)]),
            serde_json::Value::Object(map) => {
                let split = map.get("Fn::Split").and_then(|args| match args.as_array() {
                    Some(args) if args.len() == 2 => {
                        Some((args[0].as_str()?.to_string(), args[1].as_str()?.to_string()))
                    }
                    _ => None,
                });
                match split {
                    Some((delimiter, source)) => SecurityGroupRefs::Split { delimiter, source },
                    None => SecurityGroupRefs::Expression(input.clone()),
                }
            }
            other => SecurityGroupRefs::Expression(other.clone()),
        }
    }

    /// The groups as a list, expanding a split; None for an opaque expression
    pub fn to_list(&self) -> Option<Vec<Value>> {
        match self {
            SecurityGroupRefs::List(items) => Some(items.clone()),
            SecurityGroupRefs::Split { delimiter, source } => Some(
                source
                    .split(delimiter.as_str())
                    .map(Value::from)
                    .collect(),
            ),
            SecurityGroupRefs::Expression(_) => None,
        }
    }

    /// The groups as a single property value
    pub fn to_value(&self) -> Value {
        match self {
            SecurityGroupRefs::Expression(raw) => Value::Expression(raw.clone()),
            other => Value::List(other.to_list().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Network {
    /// Network created by this compile
    Dedicated {
        vpc: String,
        internet_gateway: String,
        gateway_attachment: String,
        route_table: String,
        route: String,
        cidr: String,
        /// (subnet name, route table association name, cidr)
        subnets: Vec<(String, String, String)>,
    },
    /// Network created elsewhere, referenced through caller-supplied ids
    Existing {
        vpc_id: Value,
        security_groups: SecurityGroupRefs,
        subnet_ids: Value,
        alb_subnet_ids: Option<Value>,
    },
}

impl Network {
    /// Resolve the network variant once. Dedicated resources are named under `prefix`.
    pub fn resolve(ctx: &CompileContext, prefix: &str, spec: &NetworkSpec) -> CompileResult<Self> {
        if let (Some(vpc_id), Some(security_groups), Some(subnet_ids)) = (
            provided(&spec.vpc_id),
            provided(&spec.security_group_ids),
            provided(&spec.subnet_ids),
        ) {
            return Ok(Network::Existing {
                vpc_id: Value::from_input(vpc_id),
                security_groups: SecurityGroupRefs::from_input(security_groups),
                subnet_ids: Value::from_input(subnet_ids),
                alb_subnet_ids: provided(&spec.alb_subnet_ids).map(Value::from_input),
            });
        }

        let context = format!("vpc of cluster {}", prefix);
        let cidr = spec
            .cidr
            .as_deref()
            .ok_or_else(|| CompileError::missing_field(&context, "cidr"))?;
        validate_cidr(cidr).map_err(|e| CompileError::invalid(&context, e))?;

        let naming = ctx.naming();
        let subnets = spec
            .subnets
            .iter()
            .enumerate()
            .map(|(index, subnet)| {
                validate_cidr(subnet).map_err(|e| CompileError::invalid(&context, e))?;
                Ok((
                    naming.name_with(prefix, Role::Subnet, index),
                    naming.name_with(prefix, Role::RouteTableAssociation, index),
                    subnet.clone(),
                ))
            })
            .collect::<CompileResult<Vec<_>>>()?;

        Ok(Network::Dedicated {
            vpc: naming.name(prefix, Role::Vpc),
            internet_gateway: naming.name(prefix, Role::InternetGateway),
            gateway_attachment: naming.name(prefix, Role::GatewayAttachment),
            route_table: naming.name(prefix, Role::RouteTable),
            route: naming.name(prefix, Role::Route),
            cidr: cidr.to_string(),
            subnets,
        })
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Network::Existing { .. })
    }

    pub fn vpc_ref(&self) -> Value {
        match self {
            Network::Dedicated { vpc, .. } => Value::reference(vpc),
            Network::Existing { vpc_id, .. } => vpc_id.clone(),
        }
    }

    pub fn subnets(&self) -> Value {
        match self {
            Network::Dedicated { subnets, .. } => Value::list(
                subnets
                    .iter()
                    .map(|(name, _, _)| Value::reference(name)),
            ),
            Network::Existing { subnet_ids, .. } => subnet_ids.clone(),
        }
    }

    /// Subnets for the load balancer; the override applies to existing networks only
    pub fn alb_subnets(&self) -> Value {
        match self {
            Network::Existing {
                alb_subnet_ids: Some(alb_subnets),
                ..
            } => alb_subnets.clone(),
            _ => self.subnets(),
        }
    }

    pub fn security_groups(&self) -> Option<&SecurityGroupRefs> {
        match self {
            Network::Existing { security_groups, .. } => Some(security_groups),
            Network::Dedicated { .. } => None,
        }
    }

    /// Emit the dedicated network; an existing network emits nothing
    pub fn emit(&self, tags: &Tags, template: &mut Template) -> CompileResult<()> {
        let Network::Dedicated {
            vpc,
            internet_gateway,
            gateway_attachment,
            route_table,
            route,
            cidr,
            subnets,
        } = self
        else {
            return Ok(());
        };

        template.insert_resource(
            vpc,
            Resource::new(ResourceKind::Vpc)
                .with_optional("Tags", tags.to_value())
                .with_property("EnableDnsSupport", true)
                .with_property("EnableDnsHostnames", true)
                .with_property("CidrBlock", cidr),
        )?;
        template.insert_resource(
            internet_gateway,
            Resource::new(ResourceKind::InternetGateway).with_optional("Tags", tags.to_value()),
        )?;
        template.insert_resource(
            gateway_attachment,
            Resource::new(ResourceKind::VpcGatewayAttachment)
                .with_property("VpcId", Value::reference(vpc))
                .with_property("InternetGatewayId", Value::reference(internet_gateway)),
        )?;
        template.insert_resource(
            route_table,
            Resource::new(ResourceKind::RouteTable)
                .with_optional("Tags", tags.to_value())
                .with_property("VpcId", Value::reference(vpc)),
        )?;
        template.insert_resource(
            route,
            Resource::new(ResourceKind::Route)
                .depends_on(gateway_attachment)
                .with_property("RouteTableId", Value::reference(route_table))
                .with_property("DestinationCidrBlock", "0.0.0.0/0")
                .with_property("GatewayId", Value::reference(internet_gateway)),
        )?;

        for (index, (subnet, association, subnet_cidr)) in subnets.iter().enumerate() {
            let zone = Value::Select(index, Box::new(Value::GetAzs(Box::new(Value::region()))));
            template.insert_resource(
                subnet,
                Resource::new(ResourceKind::Subnet)
                    .with_optional("Tags", tags.to_value())
                    .with_property("AvailabilityZone", zone)
                    .with_property("VpcId", Value::reference(vpc))
                    .with_property("CidrBlock", subnet_cidr)
                    .with_property("MapPublicIpOnLaunch", true),
            )?;
            template.insert_resource(
                association,
                Resource::new(ResourceKind::SubnetRouteTableAssociation)
                    .with_property("SubnetId", Value::reference(subnet))
                    .with_property("RouteTableId", Value::reference(route_table)),
            )?;
        }
        Ok(())
    }
}

/// Validate IPv4 CIDR notation (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let Some((ip, prefix)) = cidr.split_once('/') else {
        return Err(format!("Invalid CIDR format '{}': expected IP/prefix", cidr));
    };

    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(format!("Invalid IP address '{}': expected 4 octets", ip));
    }
    if let Some(octet) = octets.iter().find(|o| o.parse::<u8>().is_err()) {
        return Err(format!(
            "Invalid octet '{}' in IP address: must be 0-255",
            octet
        ));
    }

    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        Ok(p) => Err(format!("Invalid prefix length '{}': must be 0-32", p)),
        Err(_) => Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        )),
    }
}
