//! Child rows of components and applications.
//!
//! The builders are pure, [`write_component_children`] and [`write_manifests`] persist them. Every
//! write is best-effort: a failure is logged and the import carries on.
use tracing::warn;

use super::new_id;
use crate::{
    inventory::{
        AppK8sResource, Application, AutoscalerMetric, AutoscalerRule, ChildRecordRepository,
        Component, EnvVar, K8sAttribute, Port, Probe, Volume,
    },
    model::{
        Attribute, Autoscaling, ConfigManagement, ConvertResource, EnvManagement, HealthProbe,
        K8sResource, PortManagement,
    },
};

const ENV_SCOPE: &str = "inner";
const CONFIG_FILE_VOLUME: &str = "config-file";
const CONFIG_ACCESS_MODE: &str = "RWX";
const EXCLUSIVE_POLICY: &str = "exclusive";
const XPA_TYPE: &str = "hpa";

/// Ids of the optional rows that were written for a component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChildIds {
    pub autoscaler_rule_id: Option<String>,
    pub probe_id: Option<String>,
}

pub fn env_vars(component: &Component, envs: &[EnvManagement]) -> Vec<EnvVar> {
    envs.iter()
        .map(|env| EnvVar {
            tenant_id: component.tenant_id.clone(),
            component_id: component.component_id.clone(),
            name: env.key.clone(),
            value: env.value.clone(),
            explain: env.explain.clone(),
            scope: ENV_SCOPE.to_owned(),
            is_change: true,
        })
        .collect()
}

pub fn volumes(component: &Component, configs: &[ConfigManagement]) -> Vec<Volume> {
    configs
        .iter()
        .map(|config| Volume {
            component_id: component.component_id.clone(),
            volume_name: config.name.clone(),
            volume_path: config.path.clone(),
            volume_type: CONFIG_FILE_VOLUME.to_owned(),
            file_content: config.value.clone(),
            access_mode: CONFIG_ACCESS_MODE.to_owned(),
            share_policy: EXCLUSIVE_POLICY.to_owned(),
            backup_policy: EXCLUSIVE_POLICY.to_owned(),
            reclaim_policy: EXCLUSIVE_POLICY.to_owned(),
            mode: config.mode,
        })
        .collect()
}

/// Port aliases are the upper-cased component alias (`-` replaced by `_`) followed by the port.
pub fn ports(component: &Component, ports: &[PortManagement]) -> Vec<Port> {
    let alias = component.alias.replace('-', "_").to_uppercase();
    ports
        .iter()
        .map(|port| Port {
            tenant_id: component.tenant_id.clone(),
            component_id: component.component_id.clone(),
            container_port: port.port,
            mapping_port: port.port,
            protocol: port.protocol,
            port_alias: format!("{alias}{}", port.port),
            k8s_service_name: format!("{}-{}", component.alias, port.port),
            is_inner_service: port.inner,
            is_outer_service: port.outer,
        })
        .collect()
}

/// Returns nothing if autoscaling is disabled.
pub fn autoscaler(
    component: &Component,
    autoscaling: &Autoscaling,
    rule_id: String,
) -> Option<(AutoscalerRule, Vec<AutoscalerMetric>)> {
    if !autoscaling.enabled {
        return None;
    }

    let metrics = autoscaling
        .metrics
        .iter()
        .map(|metric| AutoscalerMetric {
            rule_id: rule_id.clone(),
            metrics_type: metric.metrics_type.clone(),
            metrics_name: metric.metrics_name.clone(),
            metric_target_type: metric.metric_target_type.clone(),
            metric_target_value: metric.metric_target_value,
        })
        .collect();
    let rule = AutoscalerRule {
        rule_id,
        component_id: component.component_id.clone(),
        enabled: true,
        xpa_type: XPA_TYPE.to_owned(),
        min_replicas: autoscaling.min_replicas,
        max_replicas: autoscaling.max_replicas,
    };

    Some((rule, metrics))
}

pub fn probe(component: &Component, health_probe: &HealthProbe, probe_id: String) -> Probe {
    Probe {
        probe_id,
        component_id: component.component_id.clone(),
        mode: health_probe.mode,
        scheme: health_probe.scheme.clone(),
        port: health_probe.port,
        path: health_probe.path.clone(),
        cmd: health_probe.command.clone(),
        http_header: health_probe.http_header.clone(),
        initial_delay_second: health_probe.initial_delay_second,
        period_second: health_probe.period_second,
        timeout_second: health_probe.timeout_second,
        failure_threshold: health_probe.failure_threshold,
        success_threshold: health_probe.success_threshold,
        is_used: true,
    }
}

pub fn k8s_attributes(component: &Component, attributes: &[Attribute]) -> Vec<K8sAttribute> {
    attributes
        .iter()
        .map(|attribute| K8sAttribute {
            tenant_id: component.tenant_id.clone(),
            component_id: component.component_id.clone(),
            name: attribute.name,
            save_type: attribute.save_type,
            attribute_value: attribute.value.clone(),
        })
        .collect()
}

pub fn k8s_resources(application: &Application, manifests: &[K8sResource]) -> Vec<AppK8sResource> {
    manifests
        .iter()
        .map(|manifest| AppK8sResource {
            app_id: application.app_id.clone(),
            name: manifest.name.clone(),
            kind: manifest.kind,
            content: manifest.content.clone(),
        })
        .collect()
}

/// Writes env vars, config files, ports, the autoscaler, the probe and attributes of a component.
pub async fn write_component_children<T: ChildRecordRepository>(
    transaction: &mut T,
    component: &Component,
    resource: &ConvertResource,
) -> ChildIds {
    let component_alias = component.alias.as_str();
    let mut ids = ChildIds::default();

    let env_vars = env_vars(component, &resource.envs);
    if !env_vars.is_empty()
        && let Err(error) = transaction.upsert_env_vars(&env_vars).await
    {
        warn!(component = component_alias, error = %error, "failed to write env vars");
    }

    let volumes = volumes(component, &resource.configs);
    if !volumes.is_empty()
        && let Err(error) = transaction.upsert_volumes(&volumes).await
    {
        warn!(component = component_alias, error = %error, "failed to write config files");
    }

    let ports = ports(component, &resource.ports);
    if !ports.is_empty()
        && let Err(error) = transaction.upsert_ports(&ports).await
    {
        warn!(component = component_alias, error = %error, "failed to write ports");
    }

    if let Some((rule, metrics)) = autoscaler(component, &resource.autoscaling, new_id()) {
        match transaction.create_autoscaler_rule(&rule).await {
            Ok(()) => {
                if !metrics.is_empty()
                    && let Err(error) = transaction.create_autoscaler_metrics(&metrics).await
                {
                    warn!(component = component_alias, error = %error, "failed to write autoscaler metrics");
                }
                ids.autoscaler_rule_id = Some(rule.rule_id);
            }
            Err(error) => {
                warn!(component = component_alias, error = %error, "failed to write autoscaler rule");
            }
        }
    }

    if let Some(health_probe) = &resource.health_probe {
        let probe = probe(component, health_probe, new_id());
        match transaction.upsert_probe(&probe).await {
            Ok(()) => ids.probe_id = Some(probe.probe_id),
            Err(error) => {
                warn!(component = component_alias, error = %error, "failed to write probe");
            }
        }
    }

    let attributes = k8s_attributes(component, &resource.attributes);
    if !attributes.is_empty()
        && let Err(error) = transaction.upsert_k8s_attributes(&attributes).await
    {
        warn!(component = component_alias, error = %error, "failed to write attributes");
    }

    ids
}

/// Stores the manifests of an application.
pub async fn write_manifests<T: ChildRecordRepository>(
    transaction: &mut T,
    application: &Application,
    manifests: &[K8sResource],
) {
    let resources = k8s_resources(application, manifests);
    if !resources.is_empty()
        && let Err(error) = transaction.upsert_k8s_resources(&resources).await
    {
        warn!(application = %application.name, error = %error, "failed to write manifests");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        kind::ResourceKind,
        model::{MetricRule, PortProtocol, ProbeMode},
    };

    fn component() -> Component {
        Component {
            component_id: "0f3a9c1e4b7d42a8b2c6d9e1f05a7b3c".to_owned(),
            tenant_id: "t1".to_owned(),
            app_id: "a1".to_owned(),
            alias: "gr5a7b3c".to_owned(),
            k8s_component_name: "web".to_owned(),
            namespace: "shop".to_owned(),
            kind: ResourceKind::Deployment,
            extend_method: "stateless_multiple".to_owned(),
            replicas: 1,
            container_cpu: 0,
            container_memory: 0,
            image: "nginx".to_owned(),
            cmd: String::new(),
            deploy_version: "20260101120000".to_owned(),
        }
    }

    #[test]
    fn port_rows() {
        let ports = ports(
            &component(),
            &[PortManagement {
                port: 8080,
                protocol: PortProtocol::Tcp,
                inner: true,
                outer: false,
            }],
        );

        assert_eq!(ports[0].port_alias, "GR5A7B3C8080");
        assert_eq!(ports[0].k8s_service_name, "gr5a7b3c-8080");
        assert_eq!(ports[0].mapping_port, 8080);
        assert!(ports[0].is_inner_service);
    }

    #[test]
    fn disabled_autoscaling_has_no_rule() {
        assert!(autoscaler(&component(), &Autoscaling::default(), "r1".to_owned()).is_none());

        let (rule, metrics) = autoscaler(
            &component(),
            &Autoscaling {
                enabled: true,
                min_replicas: 1,
                max_replicas: 3,
                metrics: vec![MetricRule {
                    metrics_type: "resource_metrics".to_owned(),
                    metrics_name: "cpu".to_owned(),
                    metric_target_type: "utilization".to_owned(),
                    metric_target_value: 70,
                }],
            },
            "r1".to_owned(),
        )
        .unwrap();
        assert_eq!(rule.xpa_type, "hpa");
        assert_eq!(metrics[0].rule_id, "r1");
    }

    #[test]
    fn env_and_volume_defaults() {
        let env_vars = env_vars(
            &component(),
            &[EnvManagement {
                key: "MODE".to_owned(),
                value: "production".to_owned(),
                explain: String::new(),
            }],
        );
        assert_eq!(env_vars[0].scope, "inner");
        assert!(env_vars[0].is_change);

        let volumes = volumes(
            &component(),
            &[ConfigManagement {
                name: "app.conf".to_owned(),
                path: "/etc/app/app.conf".to_owned(),
                value: "debug=true".to_owned(),
                mode: 0o644,
            }],
        );
        assert_eq!(volumes[0].volume_type, "config-file");
        assert_eq!(volumes[0].access_mode, "RWX");
        assert_eq!(volumes[0].reclaim_policy, "exclusive");
    }

    #[test]
    fn probe_row() {
        let probe = probe(
            &component(),
            &HealthProbe {
                mode: ProbeMode::Liveness,
                scheme: "tcp".to_owned(),
                port: 8080,
                path: String::new(),
                command: String::new(),
                http_header: String::new(),
                initial_delay_second: 5,
                period_second: 10,
                timeout_second: 1,
                failure_threshold: 3,
                success_threshold: 1,
            },
            "p1".to_owned(),
        );

        assert_eq!(probe.probe_id, "p1");
        assert!(probe.is_used);
        assert_eq!((probe.port, probe.period_second), (8080, 10));
    }
}
