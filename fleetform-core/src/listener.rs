//! Listener - One routable port of a service
//!
//! A listener declaring an ALB protocol is attached to the cluster load
//! balancer (unless the load balancer is disabled) and produces one listener
//! rule per routing entry plus an endpoint output. A listener without a
//! protocol only maps a container port.

use sha2::{Digest, Sha256};

use crate::config::{AlbProtocol, AuthorizerSpec, ListenerSpec, PathRuleSpec, PathSpec, ServiceSpec};
use crate::context::CompileContext;
use crate::error::{CompileError, CompileResult};
use crate::naming::Role;
use crate::resource::{Output, Resource, ResourceKind, Value};
use crate::template::Template;

const EPHEMERAL_PORT_START: u16 = 1024;
const EPHEMERAL_PORT_SPAN: u32 = 49151;

/// One routing entry of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub path: String,
    /// HTTP method filter; None matches every method
    pub method: Option<String>,
    pub priority: u32,
}

/// Routing rules and match conditions shared by every listener of a service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routing {
    rules: Vec<RouteRule>,
    hostnames: Option<Vec<String>>,
    source_ips: Option<Vec<String>>,
    headers: Vec<(String, Vec<String>)>,
}

impl Routing {
    /// An omitted path is the catch-all `*`
    pub fn from_spec(spec: &ServiceSpec) -> Self {
        let default_priority = spec.priority.unwrap_or(1);
        let rules = match &spec.path {
            None => vec![RouteRule {
                path: "*".to_string(),
                method: None,
                priority: default_priority,
            }],
            Some(PathSpec::Single(path)) => vec![RouteRule {
                path: path.clone(),
                method: None,
                priority: default_priority,
            }],
            Some(PathSpec::Rules(rules)) => rules
                .iter()
                .map(|rule| match rule {
                    PathRuleSpec::Path(path) => RouteRule {
                        path: path.clone(),
                        method: None,
                        priority: 1,
                    },
                    PathRuleSpec::Rule {
                        path,
                        method,
                        priority,
                    } => RouteRule {
                        path: path.clone(),
                        method: method
                            .clone()
                            .filter(|m| m.as_str() != "*" && !m.eq_ignore_ascii_case("ANY")),
                        priority: priority.unwrap_or(1),
                    },
                })
                .collect(),
        };

        Self {
            rules,
            hostnames: spec.hostname.as_ref().map(|h| h.to_vec()),
            source_ips: spec.limit_source_ips.as_ref().map(|ips| ips.to_vec()),
            headers: spec
                .limit_headers
                .iter()
                .map(|header| (header.name.clone(), header.value.to_vec()))
                .collect(),
        }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

/// The service a listener belongs to
#[derive(Debug, Clone, Copy)]
pub struct ListenerOwner<'a> {
    pub cluster_prefix: &'a str,
    pub service_prefix: &'a str,
    /// Display name from the configuration
    pub service_name: &'a str,
    pub alb_disabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    protocol: Option<AlbProtocol>,
    port: u16,
    container_port: u16,
    certificate_arns: Vec<String>,
    authorizer: Option<AuthorizerSpec>,
    alb_attached: bool,
    target_group: String,
    rule_base: String,
    output_key: String,
}

impl Listener {
    /// Resolve ports and names once. An ALB-attached HTTPS listener must carry certificates.
    pub fn resolve(
        ctx: &CompileContext,
        owner: &ListenerOwner<'_>,
        index: usize,
        spec: &ListenerSpec,
    ) -> CompileResult<Self> {
        let port = match (spec.port, spec.alb_protocol) {
            (Some(port), _) => port,
            (None, Some(protocol)) => protocol.default_port(),
            (None, None) => ephemeral_port(owner.cluster_prefix, owner.service_name, index),
        };
        let container_port = spec.container_port.unwrap_or(port);
        let alb_attached = !owner.alb_disabled && spec.alb_protocol.is_some();
        let certificate_arns = spec.certificate_arns.clone().unwrap_or_default();

        if alb_attached && spec.alb_protocol == Some(AlbProtocol::Https) && certificate_arns.is_empty()
        {
            return Err(CompileError::MissingCertificate {
                service: owner.service_name.to_string(),
                port,
            });
        }

        log::debug!(
            "Using port {} and container port {} for service {} of cluster {} ({})",
            port,
            container_port,
            owner.service_name,
            owner.cluster_prefix,
            match (alb_attached, spec.alb_protocol) {
                (true, Some(protocol)) => format!("ALB {}", protocol),
                _ => "no ALB".to_string(),
            }
        );

        let naming = ctx.naming();
        let suffix = format!(
            "{}{}",
            spec.alb_protocol.map(|p| p.as_str()).unwrap_or_default(),
            port
        );
        Ok(Self {
            protocol: spec.alb_protocol,
            port,
            container_port,
            certificate_arns,
            authorizer: spec.authorizer.clone(),
            alb_attached,
            target_group: naming.name_with(owner.service_prefix, Role::TargetGroup, port),
            rule_base: naming.name_with(owner.service_prefix, Role::ListenerRule, &suffix),
            output_key: naming.name_with(owner.service_prefix, Role::Service, &suffix),
        })
    }

    pub fn protocol(&self) -> Option<AlbProtocol> {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn container_port(&self) -> u16 {
        self.container_port
    }

    pub fn certificate_arns(&self) -> &[String] {
        &self.certificate_arns
    }

    pub fn is_alb_attached(&self) -> bool {
        self.alb_attached
    }

    /// Logical id of the target group serving this listener
    pub fn target_group(&self) -> &str {
        &self.target_group
    }

    /// Logical ids of the listener rules, one per routing entry
    pub fn rule_names(&self, routing: &Routing) -> Vec<String> {
        (0..routing.rules.len())
            .map(|index| format!("{}Rule{}", self.rule_base, index))
            .collect()
    }

    fn uses_authorizer(&self) -> bool {
        self.protocol == Some(AlbProtocol::Https) && self.authorizer.is_some()
    }

    /// Emit the listener rules; nothing when the listener is not ALB-attached
    pub fn emit(&self, routing: &Routing, listener_arn: &Value, template: &mut Template) -> CompileResult<()> {
        if !self.alb_attached {
            return Ok(());
        }
        for (name, rule) in self.rule_names(routing).into_iter().zip(&routing.rules) {
            let resource = Resource::new(ResourceKind::ListenerRule)
                .with_property("Actions", self.actions())
                .with_property("Conditions", self.conditions(routing, rule))
                .with_property("ListenerArn", listener_arn.clone())
                .with_property("Priority", rule.priority);
            template.insert_resource(name, resource)?;
        }
        Ok(())
    }

    fn actions(&self) -> Value {
        let forward = Value::map([
            ("TargetGroupArn", Value::reference(&self.target_group)),
            ("Type", Value::from("forward")),
        ]);
        match (&self.authorizer, self.uses_authorizer()) {
            (Some(authorizer), true) => {
                let authenticate = Value::map([
                    (
                        "AuthenticateCognitoConfig",
                        Value::map([
                            ("UserPoolArn", Value::from(&authorizer.pool_arn)),
                            ("UserPoolClientId", Value::from(&authorizer.client_id)),
                            ("UserPoolDomain", Value::from(&authorizer.pool_domain)),
                        ]),
                    ),
                    ("Type", Value::from("authenticate-cognito")),
                    ("Order", Value::Int(1)),
                ]);
                let forward = match forward {
                    Value::Map(mut map) => {
                        map.insert("Order".to_string(), Value::Int(2));
                        Value::Map(map)
                    }
                    other => other,
                };
                Value::list([authenticate, forward])
            }
            _ => Value::list([forward]),
        }
    }

    fn conditions(&self, routing: &Routing, rule: &RouteRule) -> Value {
        let mut conditions = vec![Value::map([
            ("Field", Value::from("path-pattern")),
            ("Values", Value::list([Value::from(&rule.path)])),
        ])];
        if let Some(method) = &rule.method {
            conditions.push(Value::map([
                ("Field", Value::from("http-request-method")),
                (
                    "HttpRequestMethodConfig",
                    Value::map([("Values", Value::list([Value::from(method)]))]),
                ),
            ]));
        }
        if self.uses_authorizer() {
            conditions.push(header_condition("authorization", Value::list([Value::from("*")])));
        }
        if let Some(hostnames) = &routing.hostnames {
            conditions.push(Value::map([
                ("Field", Value::from("host-header")),
                ("HostHeaderConfig", Value::map([("Values", string_list(hostnames))])),
            ]));
        }
        if let Some(source_ips) = &routing.source_ips {
            conditions.push(Value::map([
                ("Field", Value::from("source-ip")),
                ("SourceIpConfig", Value::map([("Values", string_list(source_ips))])),
            ]));
        }
        for (name, values) in &routing.headers {
            conditions.push(header_condition(name, string_list(values)));
        }
        Value::List(conditions)
    }

    /// Emit the endpoint output `scheme://<alb dns>:port`
    pub fn emit_output(&self, dns_name: &Value, template: &mut Template) -> CompileResult<()> {
        let Some(protocol) = self.protocol.filter(|_| self.alb_attached) else {
            return Ok(());
        };
        let value = Value::join(
            "",
            vec![
                Value::from(protocol.scheme()),
                Value::from("://"),
                dns_name.clone(),
                Value::from(":"),
                Value::from(self.port),
            ],
        );
        template.insert_output(
            &self.output_key,
            Output::new("Elastic load balancer service endpoint", value, &self.output_key),
        )
    }
}

fn string_list(values: &[String]) -> Value {
    Value::list(values.iter().map(Value::from))
}

fn header_condition(name: &str, values: Value) -> Value {
    Value::map([
        ("Field", Value::from("http-header")),
        (
            "HttpHeaderConfig",
            Value::map([("HttpHeaderName", Value::from(name)), ("Values", values)]),
        ),
    ])
}

/// Stable port in `[1024, 50175)` for a listener without protocol nor port
fn ephemeral_port(cluster_prefix: &str, service_name: &str, index: usize) -> u16 {
    let digest = Sha256::digest(format!("{}/{}/{}", cluster_prefix, service_name, index).as_bytes());
    let seed = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    // seed % SPAN < 49151, so the sum stays below 50175
    EPHEMERAL_PORT_START + (seed % EPHEMERAL_PORT_SPAN) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> CompileContext {
        CompileContext::new("dev", "my-app")
    }

    fn owner(alb_disabled: bool) -> ListenerOwner<'static> {
        ListenerOwner {
            cluster_prefix: "MyappApi",
            service_prefix: "MyappApiWeb",
            service_name: "web",
            alb_disabled,
        }
    }

    fn listener_spec(value: serde_json::Value) -> ListenerSpec {
        serde_json::from_value(value).unwrap()
    }

    fn service_spec(value: serde_json::Value) -> ServiceSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn ports_default_by_protocol() {
        let http = Listener::resolve(&ctx(), &owner(false), 0, &listener_spec(json!({ "albProtocol": "HTTP" })))
            .unwrap();
        assert_eq!(http.port(), 80);
        assert_eq!(http.container_port(), 80);
        assert!(http.is_alb_attached());
        assert_eq!(http.target_group(), "MyappApiWebTargetGroupDev80");

        let custom = Listener::resolve(
            &ctx(),
            &owner(false),
            0,
            &listener_spec(json!({ "albProtocol": "HTTPS", "port": 8443, "containerPort": 3000, "certificateArns": ["arn:cert"] })),
        )
        .unwrap();
        assert_eq!(custom.port(), 8443);
        assert_eq!(custom.container_port(), 3000);
        assert_eq!(custom.certificate_arns(), &["arn:cert".to_string()]);
    }

    #[test]
    fn ephemeral_port_is_stable_and_in_range() {
        let first = Listener::resolve(&ctx(), &owner(false), 2, &ListenerSpec::default()).unwrap();
        let second = Listener::resolve(&ctx(), &owner(false), 2, &ListenerSpec::default()).unwrap();
        assert_eq!(first.port(), second.port());
        assert!((1024..50175).contains(&first.port()));
        assert!(!first.is_alb_attached());
    }

    #[test]
    fn https_without_certificates_fails() {
        let err = Listener::resolve(&ctx(), &owner(false), 0, &listener_spec(json!({ "albProtocol": "HTTPS" })))
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingCertificate {
                service: "web".to_string(),
                port: 443,
            }
        );

        let empty = listener_spec(json!({ "albProtocol": "HTTPS", "certificateArns": [] }));
        assert!(Listener::resolve(&ctx(), &owner(false), 0, &empty).is_err());
        // not attached when the load balancer is disabled
        assert!(Listener::resolve(&ctx(), &owner(true), 0, &empty).is_ok());
    }

    #[test]
    fn omitted_path_equals_catch_all() {
        let omitted = Routing::from_spec(&service_spec(json!({ "name": "web" })));
        let star = Routing::from_spec(&service_spec(json!({ "name": "web", "path": "*" })));
        assert_eq!(omitted, star);
        assert_eq!(
            omitted.rules(),
            &[RouteRule {
                path: "*".to_string(),
                method: None,
                priority: 1,
            }]
        );
    }

    #[test]
    fn any_method_is_no_filter() {
        let routing = Routing::from_spec(&service_spec(json!({
            "name": "web",
            "path": [
                { "path": "/a", "method": "ANY", "priority": 2 },
                { "path": "/b", "method": "GET", "priority": 3 },
                "/c"
            ]
        })));
        let methods: Vec<_> = routing.rules().iter().map(|r| r.method.clone()).collect();
        assert_eq!(methods, vec![None, Some("GET".to_string()), None]);
        let priorities: Vec<_> = routing.rules().iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![2, 3, 1]);
    }

    #[test]
    fn rules_carry_conditions_in_order() {
        let listener = Listener::resolve(
            &ctx(),
            &owner(false),
            0,
            &listener_spec(json!({
                "albProtocol": "HTTPS",
                "certificateArns": ["arn:cert"],
                "authorizer": { "poolArn": "arn:pool", "clientId": "client", "poolDomain": "auth" }
            })),
        )
        .unwrap();
        let routing = Routing::from_spec(&service_spec(json!({
            "name": "web",
            "path": [{ "path": "/api/*", "method": "POST", "priority": 4 }],
            "hostname": "api.example.com",
            "limitSourceIPs": ["10.0.0.0/8"],
            "limitHeaders": [{ "name": "X-Env", "value": "blue" }]
        })));

        let mut template = Template::new();
        listener
            .emit(&routing, &Value::reference("MyappApiALBListenerDev443"), &mut template)
            .unwrap();

        let rule = template.resource("MyappApiWebALBListenerRuleDevHTTPS443Rule0").unwrap();
        let fields: Vec<_> = rule
            .property("Conditions")
            .and_then(Value::as_list)
            .unwrap()
            .iter()
            .map(|c| c.get("Field").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(
            fields,
            vec!["path-pattern", "http-request-method", "http-header", "host-header", "source-ip", "http-header"]
        );

        let actions = rule.property("Actions").unwrap().to_json();
        assert_eq!(actions[0]["Type"], json!("authenticate-cognito"));
        assert_eq!(actions[0]["Order"], json!(1));
        assert_eq!(actions[1]["Type"], json!("forward"));
        assert_eq!(actions[1]["Order"], json!(2));
        assert_eq!(rule.property("Priority"), Some(&Value::Int(4)));
    }

    #[test]
    fn authorizer_ignored_on_http() {
        let listener = Listener::resolve(
            &ctx(),
            &owner(false),
            0,
            &listener_spec(json!({
                "albProtocol": "HTTP",
                "authorizer": { "poolArn": "arn:pool", "clientId": "client", "poolDomain": "auth" }
            })),
        )
        .unwrap();
        let routing = Routing::from_spec(&service_spec(json!({ "name": "web" })));
        let mut template = Template::new();
        listener
            .emit(&routing, &Value::from("arn:listener"), &mut template)
            .unwrap();
        let rule = template.resource("MyappApiWebALBListenerRuleDevHTTP80Rule0").unwrap();
        assert_eq!(
            rule.property("Actions").unwrap().to_json(),
            json!([{ "TargetGroupArn": { "Ref": "MyappApiWebTargetGroupDev80" }, "Type": "forward" }])
        );
        assert_eq!(rule.property("ListenerArn"), Some(&Value::from("arn:listener")));
    }

    #[test]
    fn container_only_listener_emits_nothing() {
        let listener = Listener::resolve(&ctx(), &owner(false), 0, &listener_spec(json!({ "port": 9000 })))
            .unwrap();
        let routing = Routing::from_spec(&service_spec(json!({ "name": "web" })));
        let mut template = Template::new();
        listener.emit(&routing, &Value::from("arn"), &mut template).unwrap();
        listener
            .emit_output(&Value::get_att("Alb", "DNSName"), &mut template)
            .unwrap();
        assert!(template.is_empty());
    }

    #[test]
    fn endpoint_output_includes_port() {
        let listener = Listener::resolve(&ctx(), &owner(false), 0, &listener_spec(json!({ "albProtocol": "HTTP" })))
            .unwrap();
        let mut template = Template::new();
        listener
            .emit_output(&Value::get_att("MyappApiALBDev", "DNSName"), &mut template)
            .unwrap();
        let output = template.output("MyappApiWebServiceDevHTTP80").unwrap();
        assert_eq!(output.export_name, "MyappApiWebServiceDevHTTP80");
        assert_eq!(
            output.value.to_json(),
            json!({ "Fn::Join": ["", ["http", "://", { "Fn::GetAtt": ["MyappApiALBDev", "DNSName"] }, ":", 80]] })
        );
    }
}
