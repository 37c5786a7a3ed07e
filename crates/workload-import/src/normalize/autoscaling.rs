use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{
    kind::ResourceKind,
    model::{Autoscaling, MetricRule},
};

/// Annotation carrying resource metrics of `autoscaling/v2beta1` on `autoscaling/v1` objects.
pub const LEGACY_METRICS_ANNOTATION: &str = "autoscaling.alpha.kubernetes.io/metrics";

const RESOURCE_METRICS: &str = "resource_metrics";

#[derive(Debug, Deserialize)]
struct LegacyMetric {
    resource: Option<LegacyResourceMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyResourceMetric {
    name: String,

    #[serde(default)]
    target_average_value: Value,
}

/// Derives the autoscaling settings from the first autoscaler targeting `kind`/`name`.
pub fn autoscaling_for(
    kind: ResourceKind,
    name: &str,
    autoscalers: &[HorizontalPodAutoscaler],
) -> Autoscaling {
    let kind = kind.to_string();
    let Some((autoscaler, spec)) = autoscalers.iter().find_map(|autoscaler| {
        autoscaler
            .spec
            .as_ref()
            .filter(|spec| spec.scale_target_ref.kind == kind && spec.scale_target_ref.name == name)
            .map(|spec| (autoscaler, spec))
    }) else {
        return Autoscaling::default();
    };

    let mut metrics = Vec::new();
    if let Some(utilization) = spec.target_cpu_utilization_percentage {
        metrics.push(MetricRule {
            metrics_type: RESOURCE_METRICS.to_owned(),
            metrics_name: "cpu".to_owned(),
            metric_target_type: "utilization".to_owned(),
            metric_target_value: i64::from(utilization),
        });
    }

    if let Some(annotation) = autoscaler
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(LEGACY_METRICS_ANNOTATION))
    {
        match serde_json::from_str::<Vec<LegacyMetric>>(annotation) {
            Ok(legacy) => metrics.extend(legacy.into_iter().filter_map(legacy_rule)),
            Err(error) => warn!(
                workload = name,
                annotation = LEGACY_METRICS_ANNOTATION,
                error = %error,
                "ignoring unparsable metrics annotation"
            ),
        }
    }

    Autoscaling {
        enabled: true,
        min_replicas: spec.min_replicas.unwrap_or(1),
        max_replicas: spec.max_replicas,
        metrics,
    }
}

/// Memory targets are recorded under the metric name `cpu`, as the platform has always stored
/// them.
fn legacy_rule(metric: LegacyMetric) -> Option<MetricRule> {
    let resource = metric.resource?;
    if !matches!(resource.name.as_str(), "cpu" | "memory") {
        return None;
    }

    let target = match &resource.target_average_value {
        Value::String(target) => target.clone(),
        other => other.to_string(),
    };

    Some(MetricRule {
        metrics_type: RESOURCE_METRICS.to_owned(),
        metrics_name: "cpu".to_owned(),
        metric_target_type: "average_value".to_owned(),
        metric_target_value: parse_average_value(&target),
    })
}

/// Parses an average target such as `500m` or `2G`.
///
/// `m` keeps the number, `g`/`G` multiplies it by 1024. Any other unit, or a number that does not
/// parse, yields 0.
pub fn parse_average_value(target: &str) -> i64 {
    let Some(unit) = target.chars().last() else {
        return 0;
    };
    let number = || {
        target[..target.len() - unit.len_utf8()]
            .parse::<i64>()
            .unwrap_or_default()
    };

    match unit {
        'm' => number(),
        'g' | 'G' => number().saturating_mul(1024),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn autoscalers(yaml: &str) -> Vec<HorizontalPodAutoscaler> {
        serde_yaml::Deserializer::from_str(yaml)
            .map(|document| HorizontalPodAutoscaler::deserialize(document).unwrap())
            .collect()
    }

    #[rstest]
    #[case("500m", 500)]
    #[case("2G", 2048)]
    #[case("3g", 3072)]
    #[case("100Mi", 0)]
    #[case("750", 0)]
    #[case("xm", 0)]
    #[case("", 0)]
    fn average_value_heuristic(#[case] target: &str, #[case] expected: i64) {
        assert_eq!(parse_average_value(target), expected);
    }

    #[test]
    fn first_matching_autoscaler_wins() {
        let autoscalers = autoscalers(indoc! {r#"
            apiVersion: autoscaling/v1
            kind: HorizontalPodAutoscaler
            metadata:
              name: other
            spec:
              maxReplicas: 9
              scaleTargetRef:
                kind: StatefulSet
                name: web
            ---
            apiVersion: autoscaling/v1
            kind: HorizontalPodAutoscaler
            metadata:
              name: web
              annotations:
                autoscaling.alpha.kubernetes.io/metrics: '[{"type":"Resource","resource":{"name":"memory","targetAverageValue":"1G"}},{"type":"Resource","resource":{"name":"cpu","targetAverageValue":"200m"}}]'
            spec:
              minReplicas: 2
              maxReplicas: 5
              targetCPUUtilizationPercentage: 80
              scaleTargetRef:
                kind: Deployment
                name: web
            ---
            apiVersion: autoscaling/v1
            kind: HorizontalPodAutoscaler
            metadata:
              name: web-duplicate
            spec:
              maxReplicas: 7
              scaleTargetRef:
                kind: Deployment
                name: web
        "#});

        let autoscaling = autoscaling_for(ResourceKind::Deployment, "web", &autoscalers);

        assert!(autoscaling.enabled);
        assert_eq!((autoscaling.min_replicas, autoscaling.max_replicas), (2, 5));
        assert_eq!(
            autoscaling
                .metrics
                .iter()
                .map(|rule| (
                    rule.metrics_name.as_str(),
                    rule.metric_target_type.as_str(),
                    rule.metric_target_value
                ))
                .collect::<Vec<_>>(),
            [
                ("cpu", "utilization", 80),
                ("cpu", "average_value", 1024),
                ("cpu", "average_value", 200),
            ]
        );
    }

    #[test]
    fn defaults_and_broken_annotation() {
        let autoscalers = autoscalers(indoc! {"
            apiVersion: autoscaling/v1
            kind: HorizontalPodAutoscaler
            metadata:
              name: web
              annotations:
                autoscaling.alpha.kubernetes.io/metrics: not json
            spec:
              maxReplicas: 4
              scaleTargetRef:
                kind: Deployment
                name: web
        "});

        let autoscaling = autoscaling_for(ResourceKind::Deployment, "web", &autoscalers);
        assert_eq!(autoscaling.min_replicas, 1);
        assert!(autoscaling.metrics.is_empty());

        assert_eq!(
            autoscaling_for(ResourceKind::Deployment, "api", &autoscalers),
            Autoscaling::default()
        );
    }
}
