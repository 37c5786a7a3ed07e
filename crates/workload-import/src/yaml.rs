//! Utility functions for rendering data as JSON or YAML strings.
use serde::Serialize;
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize JSON"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("failed to serialize YAML"))]
    SerializeYaml { source: serde_yaml::Error },
}

/// Serializes `value` as compact JSON.
pub fn to_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context(SerializeJsonSnafu)
}

/// Serializes `value` as YAML.
///
/// The value is converted to JSON first, so the output only ever contains what the JSON
/// representation contains. `None` fields skipped by the Kubernetes types stay absent.
pub fn to_yaml_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context(SerializeJsonSnafu)?;
    serde_yaml::to_string(&value).context(SerializeYamlSnafu)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use indoc::indoc;
    use k8s_openapi::api::core::v1::Toleration;

    use super::*;

    #[test]
    fn tolerations_as_yaml() {
        let tolerations = vec![Toleration {
            key: Some("dedicated".to_owned()),
            operator: Some("Equal".to_owned()),
            value: Some("gpu".to_owned()),
            effect: Some("NoSchedule".to_owned()),
            ..Toleration::default()
        }];

        assert_eq!(
            to_yaml_string(&tolerations).unwrap(),
            indoc! {"
                - effect: NoSchedule
                  key: dedicated
                  operator: Equal
                  value: gpu
            "}
        );
    }

    #[test]
    fn labels_as_json() {
        let labels = BTreeMap::from([("app", "web"), ("tier", "frontend")]);

        assert_eq!(
            to_json_string(&labels).unwrap(),
            r#"{"app":"web","tier":"frontend"}"#
        );
    }
}
