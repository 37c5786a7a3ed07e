use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodSpec};
use serde::Serialize;
use snafu::ResultExt;

use super::{Result, SerializeAttributeSnafu};
use crate::{
    model::{Attribute, AttributeName, SaveType},
    yaml,
};

/// Carries pod template fields over verbatim, each only when set.
pub fn attributes(
    labels: Option<&BTreeMap<String, String>>,
    pod_spec: &PodSpec,
    container: &Container,
) -> Result<Vec<Attribute>> {
    let mut attributes = Vec::new();

    if let Some(volumes) = &pod_spec.volumes {
        attributes.push(serialized(AttributeName::Volumes, SaveType::Yaml, volumes)?);
    }
    if let Some(volume_mounts) = &container.volume_mounts {
        attributes.push(serialized(
            AttributeName::VolumeMounts,
            SaveType::Yaml,
            volume_mounts,
        )?);
    }
    if let Some(service_account_name) = pod_spec
        .service_account_name
        .as_ref()
        .filter(|name| !name.is_empty())
    {
        attributes.push(Attribute {
            name: AttributeName::ServiceAccountName,
            save_type: SaveType::String,
            value: service_account_name.clone(),
        });
    }
    if let Some(labels) = labels {
        attributes.push(serialized(AttributeName::Labels, SaveType::Json, labels)?);
    }
    if let Some(node_selector) = &pod_spec.node_selector {
        attributes.push(serialized(
            AttributeName::NodeSelector,
            SaveType::Json,
            node_selector,
        )?);
    }
    if let Some(tolerations) = &pod_spec.tolerations {
        attributes.push(serialized(
            AttributeName::Tolerations,
            SaveType::Yaml,
            tolerations,
        )?);
    }
    if let Some(affinity) = &pod_spec.affinity {
        attributes.push(serialized(AttributeName::Affinity, SaveType::Yaml, affinity)?);
    }
    if let Some(privileged) = container
        .security_context
        .as_ref()
        .and_then(|security_context| security_context.privileged)
    {
        attributes.push(Attribute {
            name: AttributeName::Privileged,
            save_type: SaveType::String,
            value: privileged.to_string(),
        });
    }

    Ok(attributes)
}

fn serialized<T: Serialize + ?Sized>(
    name: AttributeName,
    save_type: SaveType,
    value: &T,
) -> Result<Attribute> {
    let value = match save_type {
        SaveType::Json => yaml::to_json_string(value),
        SaveType::Yaml | SaveType::String => yaml::to_yaml_string(value),
    }
    .context(SerializeAttributeSnafu { attribute: name })?;

    Ok(Attribute {
        name,
        save_type,
        value,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn captures_present_fields_in_order() {
        let pod_spec: PodSpec = serde_yaml::from_str(indoc! {"
            serviceAccountName: web
            nodeSelector:
              disktype: ssd
            tolerations:
              - key: dedicated
                operator: Exists
            containers:
              - name: web
                securityContext:
                  privileged: false
                volumeMounts:
                  - name: data
                    mountPath: /data
            volumes:
              - name: data
                emptyDir: {}
        "})
        .unwrap();
        let labels = BTreeMap::from([("app".to_owned(), "web".to_owned())]);

        let attributes = attributes(Some(&labels), &pod_spec, &pod_spec.containers[0]).unwrap();

        assert_eq!(
            attributes
                .iter()
                .map(|attribute| (attribute.name, attribute.save_type))
                .collect::<Vec<_>>(),
            [
                (AttributeName::Volumes, SaveType::Yaml),
                (AttributeName::VolumeMounts, SaveType::Yaml),
                (AttributeName::ServiceAccountName, SaveType::String),
                (AttributeName::Labels, SaveType::Json),
                (AttributeName::NodeSelector, SaveType::Json),
                (AttributeName::Tolerations, SaveType::Yaml),
                (AttributeName::Privileged, SaveType::String),
            ]
        );
        assert_eq!(attributes[1].value, "- mountPath: /data\n  name: data\n");
        assert_eq!(attributes[3].value, r#"{"app":"web"}"#);
        assert_eq!(attributes[6].value, "false");
    }

    #[test]
    fn empty_pod_spec_has_no_attributes() {
        let pod_spec = PodSpec::default();
        let container = Container::default();

        assert!(attributes(None, &pod_spec, &container).unwrap().is_empty());
    }
}
