//! Config - Cluster configuration as supplied by the host
//!
//! These types mirror the `ecs:` section of the host manifest (camelCase keys).
//! They are plain data: variant fields (launch type, network kind, routing
//! form) are resolved into sum types once, when the compiler components are
//! constructed.

use indexmap::IndexMap;
use serde::Deserialize;

/// Define a closed string enumeration deserialized from its exact wire text
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
        #[serde(try_from = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == value)
                    .ok_or_else(|| {
                        let expected: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                        format!(
                            "unknown {} '{}', expected one of: {}",
                            stringify!($name),
                            value,
                            expected.join(", ")
                        )
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Load balancer protocol of a listener
    AlbProtocol {
        Http => "HTTP",
        Https => "HTTPS",
    }
);

impl AlbProtocol {
    pub fn default_port(&self) -> u16 {
        match self {
            AlbProtocol::Http => 80,
            AlbProtocol::Https => 443,
        }
    }

    /// URL scheme ("http" / "https")
    pub fn scheme(&self) -> &'static str {
        match self {
            AlbProtocol::Http => "http",
            AlbProtocol::Https => "https",
        }
    }
}

string_enum!(
    /// Tag propagation mode of a service
    PropagateTags {
        Off => "OFF",
        Service => "SERVICE",
        TaskDefinition => "TASK_DEFINITION",
    }
);

impl Default for PropagateTags {
    fn default() -> Self {
        PropagateTags::Off
    }
}

string_enum!(
    /// Predefined target-tracking metric
    MetricType {
        AlbRequestCountPerTarget => "ALBRequestCountPerTarget",
        AppStreamAverageCapacityUtilization => "AppStreamAverageCapacityUtilization",
        ComprehendInferenceUtilization => "ComprehendInferenceUtilization",
        DynamoDbReadCapacityUtilization => "DynamoDBReadCapacityUtilization",
        DynamoDbWriteCapacityUtilization => "DynamoDBWriteCapacityUtilization",
        Ec2SpotFleetRequestAverageCpuUtilization => "EC2SpotFleetRequestAverageCPUUtilization",
        Ec2SpotFleetRequestAverageNetworkIn => "EC2SpotFleetRequestAverageNetworkIn",
        Ec2SpotFleetRequestAverageNetworkOut => "EC2SpotFleetRequestAverageNetworkOut",
        EcsServiceAverageCpuUtilization => "ECSServiceAverageCPUUtilization",
        EcsServiceAverageMemoryUtilization => "ECSServiceAverageMemoryUtilization",
        LambdaProvisionedConcurrencyUtilization => "LambdaProvisionedConcurrencyUtilization",
        RdsReaderAverageCpuUtilization => "RDSReaderAverageCPUUtilization",
        RdsReaderAverageDatabaseConnections => "RDSReaderAverageDatabaseConnections",
        SageMakerVariantInvocationsPerInstance => "SageMakerVariantInvocationsPerInstance",
    }
);

string_enum!(
    /// Alarm comparison operator
    ComparisonOperator {
        GreaterThanOrEqualToThreshold => "GreaterThanOrEqualToThreshold",
        GreaterThanThreshold => "GreaterThanThreshold",
        LessThanThreshold => "LessThanThreshold",
        LessThanOrEqualToThreshold => "LessThanOrEqualToThreshold",
        LessThanLowerOrGreaterThanUpperThreshold => "LessThanLowerOrGreaterThanUpperThreshold",
        LessThanLowerThreshold => "LessThanLowerThreshold",
        GreaterThanUpperThreshold => "GreaterThanUpperThreshold",
    }
);

impl ComparisonOperator {
    /// Operators mentioning "greater" scale on the interval above the threshold
    pub fn is_greater(&self) -> bool {
        self.as_str().to_lowercase().contains("greater")
    }

    /// Operators mentioning "less" scale on the interval below the threshold
    pub fn is_less(&self) -> bool {
        self.as_str().to_lowercase().contains("less")
    }
}

string_enum!(
    /// Metric statistic used for aggregation and alarms
    Statistic {
        Average => "Average",
        Minimum => "Minimum",
        Maximum => "Maximum",
        Sum => "Sum",
        SampleCount => "SampleCount",
    }
);

string_enum!(
    /// Step adjustment type
    AdjustmentType {
        ChangeInCapacity => "ChangeInCapacity",
        ExactCapacity => "ExactCapacity",
        PercentChangeInCapacity => "PercentChangeInCapacity",
    }
);

string_enum!(
    /// Alarm treatment of missing data points
    MissingDataTreatment {
        Breaching => "breaching",
        NotBreaching => "notBreaching",
        Ignore => "ignore",
        Missing => "missing",
    }
);

/// A single value or a list of values
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v.clone()],
            OneOrMany::Many(vs) => vs.clone(),
        }
    }
}

/// Returns the value unless it is missing, JSON null or the `"null"` sentinel
pub(crate) fn provided(value: &Option<serde_json::Value>) -> Option<&serde_json::Value> {
    match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s == "null" || s.is_empty() => None,
        Some(v) => Some(v),
    }
}

/// One cluster entry of the `ecs:` list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub tags: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub enable_container_insights: bool,
    #[serde(default)]
    pub alb_private: bool,
    #[serde(default, alias = "disableELB")]
    pub alb_disabled: bool,
    /// Listener ARN of an externally managed load balancer
    #[serde(default, alias = "elbListenerArn")]
    pub alb_listener_arn: Option<serde_json::Value>,
    /// Load balancer idle timeout in seconds
    pub timeout: Option<u32>,
    pub cluster_name: String,
    pub cluster_arns: Option<ClusterArns>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    pub execution_role_arn: Option<serde_json::Value>,
    pub vpc: Option<NetworkSpec>,
}

/// References to an existing cluster shared with other stacks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterArns {
    pub ecs_cluster_arn: Option<serde_json::Value>,
    pub ecs_ingress_sec_group_id: Option<serde_json::Value>,
}

/// Network settings: either `cidr` + `subnets` (dedicated) or the three
/// existing-network ids (shared)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    pub cidr: Option<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    pub vpc_id: Option<serde_json::Value>,
    pub security_group_ids: Option<serde_json::Value>,
    pub subnet_ids: Option<serde_json::Value>,
    pub alb_subnet_ids: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub environment: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub propagate_tags: PropagateTags,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub mount_points: Vec<MountPointSpec>,
    /// CPU units; a negative value omits the setting
    pub cpu: Option<i64>,
    /// Memory in MiB; a negative value omits the setting
    pub memory: Option<i64>,
    #[serde(rename = "softCPU")]
    pub soft_cpu: Option<i64>,
    #[serde(rename = "hardCPU")]
    pub hard_cpu: Option<i64>,
    pub soft_memory: Option<i64>,
    pub image: Option<String>,
    pub image_repository: Option<String>,
    pub image_tag: Option<String>,
    pub entry_point: Option<Vec<String>>,
    pub desired_count: Option<u32>,
    #[serde(default)]
    pub ec2_launch_type: bool,
    #[serde(default)]
    pub daemon_ec2_type: bool,
    #[serde(default)]
    pub placement_constraints: Vec<PlacementConstraintSpec>,
    #[serde(default)]
    pub placement_strategies: Vec<PlacementStrategySpec>,
    #[serde(default)]
    pub capacity_provider_strategy: Vec<CapacityProviderSpec>,
    #[serde(default, rename = "disablePublicIPAssign")]
    pub disable_public_ip_assign: bool,
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,
    pub path: Option<PathSpec>,
    /// Priority of a single-path routing rule
    pub priority: Option<u32>,
    pub hostname: Option<OneOrMany<String>>,
    #[serde(rename = "limitSourceIPs")]
    pub limit_source_ips: Option<OneOrMany<String>>,
    #[serde(default)]
    pub limit_headers: Vec<HeaderMatchSpec>,
    pub health_check_uri: Option<String>,
    pub health_check_protocol: Option<String>,
    pub health_check_interval: Option<u32>,
    pub health_check_timeout: Option<u32>,
    pub health_check_healthy_count: Option<u32>,
    pub health_check_unhealthy_count: Option<u32>,
    pub health_check_status_code: Option<String>,
    pub deregistration_delay: Option<u32>,
    pub logs_retention_in_days: Option<u32>,
    pub logs_multiline_pattern: Option<String>,
    pub task_role_arn: Option<serde_json::Value>,
    pub auto_scale: Option<AutoScaleSpec>,
    /// Schedule expression, e.g. `rate(5 minutes)`
    pub scheduler_rate: Option<String>,
    pub scheduler_concurrency: Option<u32>,
    pub scheduler_input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MountPointSpec {
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlacementConstraintSpec {
    pub expression: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlacementStrategySpec {
    pub field: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityProviderSpec {
    pub base: Option<u32>,
    pub weight: Option<u32>,
    pub capacity_provider: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeaderMatchSpec {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Value")]
    pub value: OneOrMany<String>,
}

/// Routing: a single path, or an ordered list of rules
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    Single(String),
    Rules(Vec<PathRuleSpec>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PathRuleSpec {
    Path(String),
    Rule {
        path: String,
        method: Option<String>,
        priority: Option<u32>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    /// Presence attaches the listener to the cluster load balancer
    pub alb_protocol: Option<AlbProtocol>,
    pub port: Option<u16>,
    pub container_port: Option<u16>,
    pub certificate_arns: Option<Vec<String>>,
    pub authorizer: Option<AuthorizerSpec>,
}

/// Cognito user pool gating a listener
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerSpec {
    pub pool_arn: String,
    pub client_id: String,
    pub pool_domain: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScaleSpec {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub metric: Option<MetricType>,
    pub cooldown: Option<u32>,
    pub cooldown_in: Option<u32>,
    pub cooldown_out: Option<u32>,
    pub target_value: Option<f64>,
    pub scale_in: Option<StepScalingSpec>,
    pub scale_out: Option<StepScalingSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepScalingSpec {
    pub adjustment_type: Option<AdjustmentType>,
    pub cooldown: Option<u32>,
    pub aggregation: Statistic,
    pub min_adjustment_magnitude: Option<u32>,
    pub scale_by: Option<i64>,
    pub metric_namespace: String,
    pub metric_name: String,
    pub metric_dimension: String,
    pub metric_dimension_target: serde_json::Value,
    pub metric_evaluation_period: Option<u32>,
    pub metric_period: Option<u32>,
    pub operator: ComparisonOperator,
    pub target_value: f64,
    #[serde(default)]
    pub additional_dimension: Vec<AdditionalDimensionSpec>,
    pub treat_missing_data: Option<MissingDataTreatment>,
    pub fillup_missing_data: Option<FillValue>,
    pub metric_depends_on: Option<OneOrMany<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdditionalDimensionSpec {
    pub dimension: String,
    pub target: serde_json::Value,
}

/// Fill value for missing alarm data: `true` fills with 0, a number fills with itself
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Flag(bool),
    Number(f64),
}

impl FillValue {
    /// The value to fill with, or None when filling was not requested
    pub fn fill(&self) -> Option<f64> {
        match self {
            FillValue::Flag(true) => Some(0.0),
            FillValue::Flag(false) => None,
            FillValue::Number(n) => Some(*n),
        }
    }
}
