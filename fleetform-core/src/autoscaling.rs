//! Autoscaling - Scalable target and scaling policies of a service
//!
//! Without step policies a service tracks a predefined metric. With a
//! `scaleIn` and/or `scaleOut` step policy, each one gets a step-scaling
//! policy paired with the alarm that triggers it, and no target tracking.

use crate::config::{AdjustmentType, AutoScaleSpec, MetricType, MissingDataTreatment, StepScalingSpec};
use crate::context::Tags;
use crate::error::{CompileError, CompileResult};
use crate::naming::{Naming, Role};
use crate::resource::{Resource, ResourceKind, Value};
use crate::template::Template;

const DEFAULT_COOLDOWN: u32 = 30;
const DEFAULT_STEP_COOLDOWN: u32 = 300;
const DEFAULT_METRIC_PERIOD: u32 = 120;
const SCALE_MANAGED_POLICY: &str = "arn:aws:iam::aws:policy/service-role/AmazonEC2ContainerServiceAutoscaleRole";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn label(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    fn default_step(&self) -> i64 {
        match self {
            Direction::In => -1,
            Direction::Out => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScalingPolicy {
    TargetTracking {
        metric: MetricType,
        target_value: f64,
        cooldown_in: u32,
        cooldown_out: u32,
    },
    Step {
        scale_in: Option<StepScalingSpec>,
        scale_out: Option<StepScalingSpec>,
    },
}

/// Resolved autoscaling of one service
#[derive(Debug, Clone)]
pub struct AutoScaling {
    min: u32,
    max: u32,
    policy: ScalingPolicy,
}

/// Names and references the autoscaling resources hang off
pub struct ScalingScope<'a> {
    pub naming: &'a Naming,
    pub service_prefix: &'a str,
    pub service: &'a str,
    pub cluster_ref: &'a Value,
    pub tags: &'a Tags,
}

impl AutoScaling {
    pub fn resolve(service_name: &str, spec: &AutoScaleSpec) -> CompileResult<Self> {
        let policy = if spec.scale_in.is_none() && spec.scale_out.is_none() {
            let context = format!("autoScale of service {}", service_name);
            let metric = spec
                .metric
                .ok_or_else(|| CompileError::missing_field(&context, "metric"))?;
            let target_value = spec
                .target_value
                .ok_or_else(|| CompileError::missing_field(&context, "targetValue"))?;
            let cooldown = spec.cooldown.unwrap_or(DEFAULT_COOLDOWN);
            ScalingPolicy::TargetTracking {
                metric,
                target_value,
                cooldown_in: spec.cooldown_in.unwrap_or(cooldown),
                cooldown_out: spec.cooldown_out.unwrap_or(cooldown),
            }
        } else {
            ScalingPolicy::Step {
                scale_in: spec.scale_in.clone(),
                scale_out: spec.scale_out.clone(),
            }
        };
        Ok(Self {
            min: spec.min.unwrap_or(1),
            max: spec.max.unwrap_or(1),
            policy,
        })
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Resource names named by `metricDependsOn`, which may live outside this compile
    pub fn metric_dependencies(&self) -> Vec<String> {
        match &self.policy {
            ScalingPolicy::TargetTracking { .. } => Vec::new(),
            ScalingPolicy::Step {
                scale_in,
                scale_out,
            } => [scale_in, scale_out]
                .into_iter()
                .flatten()
                .filter_map(|step| step.metric_depends_on.as_ref())
                .flat_map(|deps| deps.to_vec())
                .collect(),
        }
    }

    pub fn emit(&self, scope: &ScalingScope<'_>, template: &mut Template) -> CompileResult<()> {
        let naming = scope.naming;
        let role = naming.name(scope.service_prefix, Role::AutoScalingRole);
        let target = naming.name(scope.service_prefix, Role::AutoScalingTarget);

        template.insert_resource(
            &role,
            Resource::new(ResourceKind::IamRole)
                .with_optional("Tags", scope.tags.to_value())
                .with_property("RoleName", &role)
                .with_property("AssumeRolePolicyDocument", assume_role_policy())
                .with_property("ManagedPolicyArns", Value::list([Value::from(SCALE_MANAGED_POLICY)]))
                .with_property("Path", "/")
                .with_property("Policies", scaling_policies()),
        )?;

        template.insert_resource(
            &target,
            Resource::new(ResourceKind::ScalableTarget)
                .with_property("MinCapacity", self.min)
                .with_property("MaxCapacity", self.max)
                .with_property("ScalableDimension", "ecs:service:DesiredCount")
                .with_property("ServiceNamespace", "ecs")
                .with_property(
                    "ResourceId",
                    Value::join(
                        "/",
                        vec![
                            Value::from("service"),
                            scope.cluster_ref.clone(),
                            Value::get_att(scope.service, "Name"),
                        ],
                    ),
                )
                .with_property("RoleARN", Value::get_att(&role, "Arn")),
        )?;

        match &self.policy {
            ScalingPolicy::TargetTracking {
                metric,
                target_value,
                cooldown_in,
                cooldown_out,
            } => {
                let policy = naming.name(scope.service_prefix, Role::AutoScalingPolicy);
                template.insert_resource(
                    &policy,
                    Resource::new(ResourceKind::ScalingPolicy)
                        .with_property("PolicyName", &policy)
                        .with_property("PolicyType", "TargetTrackingScaling")
                        .with_property("ScalingTargetId", Value::reference(&target))
                        .with_property(
                            "TargetTrackingScalingPolicyConfiguration",
                            Value::map([
                                ("ScaleInCooldown", Value::from(*cooldown_in)),
                                ("ScaleOutCooldown", Value::from(*cooldown_out)),
                                ("TargetValue", Value::from(*target_value)),
                                (
                                    "PredefinedMetricSpecification",
                                    Value::map([("PredefinedMetricType", Value::from(metric.as_str()))]),
                                ),
                            ]),
                        ),
                )?;
            }
            ScalingPolicy::Step {
                scale_in,
                scale_out,
            } => {
                if let Some(step) = scale_in {
                    emit_step(scope, &target, Direction::In, step, template)?;
                }
                if let Some(step) = scale_out {
                    emit_step(scope, &target, Direction::Out, step, template)?;
                }
            }
        }
        Ok(())
    }
}

fn emit_step(
    scope: &ScalingScope<'_>,
    target: &str,
    direction: Direction,
    step: &StepScalingSpec,
    template: &mut Template,
) -> CompileResult<()> {
    let (policy_role, alarm_role) = match direction {
        Direction::In => (Role::AutoScalingPolicyIn, Role::AutoScalingAlarmIn),
        Direction::Out => (Role::AutoScalingPolicyOut, Role::AutoScalingAlarmOut),
    };
    let policy = scope.naming.name(scope.service_prefix, policy_role);
    let alarm = scope.naming.name(scope.service_prefix, alarm_role);

    let mut adjustment = vec![];
    if step.operator.is_greater() {
        adjustment.push(("MetricIntervalLowerBound", Value::Int(0)));
    }
    if step.operator.is_less() {
        adjustment.push(("MetricIntervalUpperBound", Value::Int(0)));
    }
    adjustment.push((
        "ScalingAdjustment",
        Value::Int(step.scale_by.unwrap_or(direction.default_step())),
    ));

    let mut configuration = vec![
        (
            "AdjustmentType",
            Value::from(
                step.adjustment_type
                    .unwrap_or(AdjustmentType::ChangeInCapacity)
                    .as_str(),
            ),
        ),
        ("Cooldown", Value::from(step.cooldown.unwrap_or(DEFAULT_STEP_COOLDOWN))),
        ("MetricAggregationType", Value::from(step.aggregation.as_str())),
    ];
    if let Some(magnitude) = step.min_adjustment_magnitude {
        configuration.push(("MinAdjustmentMagnitude", Value::from(magnitude)));
    }
    configuration.push(("StepAdjustments", Value::list([Value::map(adjustment)])));

    template.insert_resource(
        &policy,
        Resource::new(ResourceKind::ScalingPolicy)
            .with_property("PolicyName", &policy)
            .with_property("PolicyType", "StepScaling")
            .with_property("ScalingTargetId", Value::reference(target))
            .with_property("StepScalingPolicyConfiguration", Value::map(configuration)),
    )?;

    let dependencies = step
        .metric_depends_on
        .as_ref()
        .map(|deps| deps.to_vec())
        .unwrap_or_default();

    let mut resource = Resource::new(ResourceKind::Alarm)
        .with_dependencies(dependencies)
        .depends_on(&policy)
        .with_property("AlarmName", &alarm)
        .with_property(
            "AlarmDescription",
            format!("Auto created scale {} policy for {}", direction.label(), scope.service),
        )
        .with_property("EvaluationPeriods", step.metric_evaluation_period.unwrap_or(1))
        .with_property("ComparisonOperator", step.operator.as_str())
        .with_property("Threshold", step.target_value)
        .with_property(
            "TreatMissingData",
            step.treat_missing_data
                .unwrap_or(MissingDataTreatment::NotBreaching)
                .as_str(),
        )
        .with_property("AlarmActions", Value::list([Value::reference(&policy)]));

    let dimensions = metric_dimensions(step);
    let period = step.metric_period.unwrap_or(DEFAULT_METRIC_PERIOD);
    match step.fillup_missing_data.and_then(|fill| fill.fill()) {
        Some(fill) => {
            let raw = Value::map([
                ("Id", Value::from("m1")),
                ("ReturnData", Value::from(false)),
                (
                    "MetricStat",
                    Value::map([
                        (
                            "Metric",
                            Value::map([
                                ("Dimensions", dimensions),
                                ("MetricName", Value::from(&step.metric_name)),
                                ("Namespace", Value::from(&step.metric_namespace)),
                            ]),
                        ),
                        ("Period", Value::from(period)),
                        ("Stat", Value::from(step.aggregation.as_str())),
                    ]),
                ),
            ]);
            let filled = Value::map([
                ("Expression", Value::from(format!("FILL(m1, {})", fill))),
                ("Id", Value::from("e1")),
                (
                    "Label",
                    Value::from(format!("Fillup value (absence of data, uses {} value)", fill)),
                ),
                ("ReturnData", Value::from(true)),
            ]);
            resource = resource.with_property("Metrics", Value::list([raw, filled]));
        }
        None => {
            resource = resource
                .with_property("MetricName", &step.metric_name)
                .with_property("Dimensions", dimensions)
                .with_property("Period", period)
                .with_property("Namespace", &step.metric_namespace)
                .with_property("Statistic", step.aggregation.as_str());
        }
    }

    template.insert_resource(&alarm, resource)
}

fn metric_dimensions(step: &StepScalingSpec) -> Value {
    let primary = Value::map([
        ("Name", Value::from(&step.metric_dimension)),
        ("Value", Value::from_input(&step.metric_dimension_target)),
    ]);
    let additional = step.additional_dimension.iter().map(|extra| {
        Value::map([
            ("Name", Value::from(&extra.dimension)),
            ("Value", Value::from_input(&extra.target)),
        ])
    });
    Value::list(std::iter::once(primary).chain(additional))
}

fn assume_role_policy() -> Value {
    Value::map([(
        "Statement",
        Value::list([Value::map([
            ("Effect", Value::from("Allow")),
            ("Action", Value::from("sts:AssumeRole")),
            (
                "Principal",
                Value::map([(
                    "Service",
                    Value::list([
                        Value::from("ecs-tasks.amazonaws.com"),
                        Value::from("application-autoscaling.amazonaws.com"),
                    ]),
                )]),
            ),
        ])]),
    )])
}

fn scaling_policies() -> Value {
    let actions = [
        "application-autoscaling:*",
        "cloudwatch:DescribeAlarms",
        "cloudwatch:PutMetricAlarm",
        "ecs:DescribeServices",
        "ecs:UpdateService",
    ];
    Value::list([Value::map([
        ("PolicyName", Value::from("service-autoscaling")),
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
    ])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> AutoScaleSpec {
        serde_json::from_value(value).unwrap()
    }

    fn emit(autoscaling: &AutoScaling) -> Template {
        let naming = Naming::new("dev");
        let cluster_ref = Value::reference("MyappApiECSClusterDev");
        let tags = Tags::default();
        let scope = ScalingScope {
            naming: &naming,
            service_prefix: "MyappApiWeb",
            service: "MyappApiWebServiceDev",
            cluster_ref: &cluster_ref,
            tags: &tags,
        };
        let mut template = Template::new();
        autoscaling.emit(&scope, &mut template).unwrap();
        template
    }

    fn step(operator: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut base = json!({
            "aggregation": "Average",
            "metricNamespace": "AWS/SQS",
            "metricName": "ApproximateNumberOfMessagesVisible",
            "metricDimension": "QueueName",
            "metricDimensionTarget": "jobs",
            "operator": operator,
            "targetValue": 10
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        base
    }

    fn count(template: &Template, kind: ResourceKind) -> usize {
        template.resources().values().filter(|r| r.kind == kind).count()
    }

    #[test]
    fn target_tracking_without_step_policies() {
        let autoscaling = AutoScaling::resolve(
            "web",
            &spec(json!({ "max": 4, "metric": "ECSServiceAverageCPUUtilization", "targetValue": 70, "cooldownIn": 60 })),
        )
        .unwrap();
        let template = emit(&autoscaling);
        assert_eq!(count(&template, ResourceKind::ScalingPolicy), 1);
        assert_eq!(count(&template, ResourceKind::Alarm), 0);

        let policy = template.resource("MyappApiWebAutoScalingPolicyDev").unwrap();
        assert_eq!(
            policy.property("TargetTrackingScalingPolicyConfiguration").unwrap().to_json(),
            json!({
                "ScaleInCooldown": 60,
                "ScaleOutCooldown": 30,
                "TargetValue": 70.0,
                "PredefinedMetricSpecification": { "PredefinedMetricType": "ECSServiceAverageCPUUtilization" }
            })
        );

        let target = template.resource("MyappApiWebAutoScalingTargetDev").unwrap();
        assert_eq!(target.property("MinCapacity"), Some(&Value::Int(1)));
        assert_eq!(target.property("MaxCapacity"), Some(&Value::Int(4)));
        assert_eq!(
            target.property("ResourceId").unwrap().to_json(),
            json!({ "Fn::Join": ["/", ["service", { "Ref": "MyappApiECSClusterDev" }, { "Fn::GetAtt": ["MyappApiWebServiceDev", "Name"] }]] })
        );
    }

    #[test]
    fn target_tracking_requires_metric() {
        let err = AutoScaling::resolve("web", &spec(json!({ "targetValue": 70 }))).unwrap_err();
        assert_eq!(err, CompileError::missing_field("autoScale of service web", "metric"));
    }

    #[test]
    fn both_step_policies_replace_target_tracking() {
        let autoscaling = AutoScaling::resolve(
            "web",
            &spec(json!({
                "scaleIn": step("LessThanThreshold", json!({})),
                "scaleOut": step("GreaterThanOrEqualToThreshold", json!({ "scaleBy": 3 }))
            })),
        )
        .unwrap();
        let template = emit(&autoscaling);
        assert_eq!(count(&template, ResourceKind::ScalingPolicy), 2);
        assert_eq!(count(&template, ResourceKind::Alarm), 2);
        assert!(template.resource("MyappApiWebAutoScalingPolicyDev").is_none());

        let scale_in = template.resource("MyappApiWebAutoScalingPolicyInDev").unwrap();
        assert_eq!(
            scale_in.property("StepScalingPolicyConfiguration").unwrap().to_json(),
            json!({
                "AdjustmentType": "ChangeInCapacity",
                "Cooldown": 300,
                "MetricAggregationType": "Average",
                "StepAdjustments": [{ "MetricIntervalUpperBound": 0, "ScalingAdjustment": -1 }]
            })
        );
        let scale_out = template.resource("MyappApiWebAutoScalingPolicyOutDev").unwrap();
        assert_eq!(
            scale_out.property("StepScalingPolicyConfiguration").unwrap().to_json()["StepAdjustments"],
            json!([{ "MetricIntervalLowerBound": 0, "ScalingAdjustment": 3 }])
        );

        let alarm = template.resource("MyappApiWebAutoScalingAlarmOutDev").unwrap();
        assert_eq!(alarm.depends_on, vec!["MyappApiWebAutoScalingPolicyOutDev".to_string()]);
        assert_eq!(alarm.property("TreatMissingData"), Some(&Value::from("notBreaching")));
        assert_eq!(alarm.property("Statistic"), Some(&Value::from("Average")));
        assert!(alarm.property("Metrics").is_none());
    }

    #[test]
    fn fill_value_uses_metric_math() {
        let autoscaling = AutoScaling::resolve(
            "web",
            &spec(json!({
                "scaleOut": step("GreaterThanThreshold", json!({
                    "fillupMissingData": true,
                    "additionalDimension": [{ "dimension": "Env", "target": "dev" }],
                    "metricDependsOn": "JobsQueue"
                }))
            })),
        )
        .unwrap();
        assert_eq!(autoscaling.metric_dependencies(), vec!["JobsQueue".to_string()]);

        let template = emit(&autoscaling);
        let alarm = template.resource("MyappApiWebAutoScalingAlarmOutDev").unwrap();
        assert_eq!(
            alarm.depends_on,
            vec!["JobsQueue".to_string(), "MyappApiWebAutoScalingPolicyOutDev".to_string()]
        );
        let metrics = alarm.property("Metrics").unwrap().to_json();
        assert_eq!(metrics[0]["Id"], json!("m1"));
        assert_eq!(
            metrics[0]["MetricStat"]["Metric"]["Dimensions"],
            json!([{ "Name": "QueueName", "Value": "jobs" }, { "Name": "Env", "Value": "dev" }])
        );
        assert_eq!(metrics[1]["Expression"], json!("FILL(m1, 0)"));
        assert_eq!(metrics[1]["ReturnData"], json!(true));
        assert!(alarm.property("MetricName").is_none());
    }

    #[test]
    fn fill_false_keeps_plain_metric() {
        let autoscaling = AutoScaling::resolve(
            "web",
            &spec(json!({
                "scaleIn": step("LessThanLowerOrGreaterThanUpperThreshold", json!({ "fillupMissingData": false }))
            })),
        )
        .unwrap();
        let template = emit(&autoscaling);
        let policy = template.resource("MyappApiWebAutoScalingPolicyInDev").unwrap();
        assert_eq!(
            policy.property("StepScalingPolicyConfiguration").unwrap().to_json()["StepAdjustments"],
            json!([{ "MetricIntervalLowerBound": 0, "MetricIntervalUpperBound": 0, "ScalingAdjustment": -1 }])
        );
        let alarm = template.resource("MyappApiWebAutoScalingAlarmInDev").unwrap();
        assert!(alarm.property("Metrics").is_none());
        assert_eq!(alarm.property("Period"), Some(&Value::Int(120)));
    }
}
