//! Resource - Typed resource definitions, outputs and their property values

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::json;

/// Property value of a resource or output
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    /// `Ref` to a resource logical id or a pseudo parameter (e.g., "AWS::Region")
    Ref(String),
    /// Attribute of another resource (logical_id, attribute_name)
    GetAtt(String, String),
    /// `Fn::Join` (delimiter, parts)
    Join(String, Vec<Value>),
    /// `Fn::Select` (index, list expression)
    Select(usize, Box<Value>),
    /// `Fn::GetAZs` for a region expression
    GetAzs(Box<Value>),
    /// Caller-supplied provider expression, carried through untouched
    Expression(serde_json::Value),
}

impl Value {
    pub fn reference(logical_id: impl Into<String>) -> Self {
        Value::Ref(logical_id.into())
    }

    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Value::GetAtt(logical_id.into(), attribute.into())
    }

    pub fn join(delimiter: impl Into<String>, parts: Vec<Value>) -> Self {
        Value::Join(delimiter.into(), parts)
    }

    /// `Ref: AWS::Region`
    pub fn region() -> Self {
        Value::Ref("AWS::Region".to_string())
    }

    /// `Ref: AWS::NoValue` (removes the property at deploy time)
    pub fn no_value() -> Self {
        Value::Ref("AWS::NoValue".to_string())
    }

    /// Build a map value from ordered (key, value) pairs
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    /// Convert a configuration value into a property value.
    ///
    /// Scalars and arrays are literals; JSON objects are provider expressions
    /// (`{"Fn::ImportValue": ...}`, `{"Ref": ...}`) and are never inspected.
    pub fn from_input(input: &serde_json::Value) -> Self {
        match input {
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_input).collect())
            }
            other => Value::Expression(other.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key of a map value
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Logical ids referenced through `Ref` / `Fn::GetAtt`, in order of appearance.
    /// Provider expressions are opaque and contribute nothing.
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a str>) {
        match self {
            Value::Ref(target) | Value::GetAtt(target, _) => refs.push(target),
            Value::List(items) | Value::Join(_, items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.collect_references(refs);
                }
            }
            Value::Select(_, inner) | Value::GetAzs(inner) => inner.collect_references(refs),
            Value::String(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Bool(_)
            | Value::Expression(_) => {}
        }
    }

    /// Render as CloudFormation JSON
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => json!(s),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::Bool(b) => json!(b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Ref(target) => json!({ "Ref": target }),
            Value::GetAtt(target, attribute) => json!({ "Fn::GetAtt": [target, attribute] }),
            Value::Join(delimiter, parts) => {
                let parts: Vec<_> = parts.iter().map(Value::to_json).collect();
                json!({ "Fn::Join": [delimiter, parts] })
            }
            Value::Select(index, list) => json!({ "Fn::Select": [index, list.to_json()] }),
            Value::GetAzs(region) => json!({ "Fn::GetAZs": region.to_json() }),
            Value::Expression(raw) => raw.clone(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// CloudFormation resource types produced by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    EcsCluster,
    EcsService,
    EcsTaskDefinition,
    Vpc,
    InternetGateway,
    VpcGatewayAttachment,
    RouteTable,
    Route,
    Subnet,
    SubnetRouteTableAssociation,
    SecurityGroup,
    SecurityGroupIngress,
    LoadBalancer,
    LoadBalancerListener,
    ListenerRule,
    TargetGroup,
    LogGroup,
    IamRole,
    EventsRule,
    ScalableTarget,
    ScalingPolicy,
    Alarm,
}

impl ResourceKind {
    /// CloudFormation type name (e.g., "AWS::EC2::VPC")
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::EcsCluster => "AWS::ECS::Cluster",
            ResourceKind::EcsService => "AWS::ECS::Service",
            ResourceKind::EcsTaskDefinition => "AWS::ECS::TaskDefinition",
            ResourceKind::Vpc => "AWS::EC2::VPC",
            ResourceKind::InternetGateway => "AWS::EC2::InternetGateway",
            ResourceKind::VpcGatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
            ResourceKind::RouteTable => "AWS::EC2::RouteTable",
            ResourceKind::Route => "AWS::EC2::Route",
            ResourceKind::Subnet => "AWS::EC2::Subnet",
            ResourceKind::SubnetRouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
            ResourceKind::SecurityGroup => "AWS::EC2::SecurityGroup",
            ResourceKind::SecurityGroupIngress => "AWS::EC2::SecurityGroupIngress",
            ResourceKind::LoadBalancer => "AWS::ElasticLoadBalancingV2::LoadBalancer",
            ResourceKind::LoadBalancerListener => "AWS::ElasticLoadBalancingV2::Listener",
            ResourceKind::ListenerRule => "AWS::ElasticLoadBalancingV2::ListenerRule",
            ResourceKind::TargetGroup => "AWS::ElasticLoadBalancingV2::TargetGroup",
            ResourceKind::LogGroup => "AWS::Logs::LogGroup",
            ResourceKind::IamRole => "AWS::IAM::Role",
            ResourceKind::EventsRule => "AWS::Events::Rule",
            ResourceKind::ScalableTarget => "AWS::ApplicationAutoScaling::ScalableTarget",
            ResourceKind::ScalingPolicy => "AWS::ApplicationAutoScaling::ScalingPolicy",
            ResourceKind::Alarm => "AWS::CloudWatch::Alarm",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

/// A resource definition in the compiled graph
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub deletion_policy: Option<DeletionPolicy>,
    pub properties: IndexMap<String, Value>,
    /// Explicit dependencies (logical ids), on top of those implied by references
    pub depends_on: Vec<String>,
}

impl Resource {
    /// New resource with the `Delete` deletion policy
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            deletion_policy: Some(DeletionPolicy::Delete),
            properties: IndexMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_deletion_policy(mut self, policy: Option<DeletionPolicy>) -> Self {
        self.deletion_policy = policy;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the property only when a value is present
    pub fn with_optional(mut self, key: impl Into<String>, value: Option<Value>) -> Self {
        if let Some(value) = value {
            self.properties.insert(key.into(), value);
        }
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn with_dependencies(mut self, logical_ids: impl IntoIterator<Item = String>) -> Self {
        self.depends_on.extend(logical_ids);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Type", self.kind.as_str())?;
        if let Some(policy) = &self.deletion_policy {
            map.serialize_entry("DeletionPolicy", policy)?;
        }
        if !self.depends_on.is_empty() {
            map.serialize_entry("DependsOn", &self.depends_on)?;
        }
        map.serialize_entry("Properties", &self.properties)?;
        map.end()
    }
}

/// A stack output
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub description: String,
    pub value: Value,
    pub export_name: String,
}

impl Output {
    pub fn new(description: impl Into<String>, value: Value, export_name: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            value,
            export_name: export_name.into(),
        }
    }
}

impl Serialize for Output {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        json!({
            "Description": self.description,
            "Value": self.value.to_json(),
            "Export": { "Name": self.export_name },
        })
        .serialize(serializer)
    }
}
