use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, KeyToPath, Volume, VolumeMount};
use tracing::{debug, warn};

use crate::model::ConfigManagement;

/// File mode used when neither the item nor the volume sets one (`0644`).
pub const DEFAULT_FILE_MODE: i32 = 0o644;

/// Resolves the files that ConfigMap volumes project into the container.
///
/// | items | subPath | files                                                    |
/// |-------|---------|----------------------------------------------------------|
/// | yes   | yes     | the item whose path is the subPath, at the mount path    |
/// | yes   | no      | every item, at the mount path joined with the item path  |
/// | no    | yes     | the key named by the subPath, at the mount path          |
/// | no    | no      | every key of the ConfigMap, at the mount path joined with the key |
///
/// ConfigMap volumes that no mount references are logged and skipped.
pub fn config_mounts(
    workload: &str,
    volumes: &[Volume],
    volume_mounts: &[VolumeMount],
    config_maps: &BTreeMap<String, ConfigMap>,
) -> Vec<ConfigManagement> {
    let mut configs = Vec::new();

    for volume in volumes {
        let Some(source) = &volume.config_map else {
            continue;
        };

        let mut mounts = volume_mounts
            .iter()
            .filter(|mount| mount.name == volume.name)
            .peekable();
        if mounts.peek().is_none() {
            warn!(
                workload,
                config_map = %source.name,
                "ConfigMap volume is not mounted, skipping"
            );
            continue;
        }

        let empty = BTreeMap::new();
        let data = match config_maps.get(&source.name) {
            Some(config_map) => config_map.data.as_ref().unwrap_or(&empty),
            None => {
                debug!(workload, config_map = %source.name, "mounted ConfigMap does not exist");
                &empty
            }
        };
        let value = |key: &str| data.get(key).cloned().unwrap_or_default();
        let default_mode = source.default_mode.unwrap_or(DEFAULT_FILE_MODE);
        let item_mode = |item: &KeyToPath| item.mode.unwrap_or(default_mode);
        let items = source.items.as_deref().filter(|items| !items.is_empty());

        for mount in mounts {
            let sub_path = mount.sub_path.as_deref().filter(|sub_path| !sub_path.is_empty());
            match (items, sub_path) {
                (Some(items), Some(sub_path)) => {
                    match items.iter().find(|item| item.path == sub_path) {
                        Some(item) => configs.push(ConfigManagement {
                            name: item.key.clone(),
                            path: mount.mount_path.clone(),
                            value: value(&item.key),
                            mode: item_mode(item),
                        }),
                        None => warn!(
                            workload,
                            config_map = %source.name,
                            sub_path,
                            "no item matches the subPath, skipping mount"
                        ),
                    }
                }
                (Some(items), None) => {
                    configs.extend(items.iter().map(|item| ConfigManagement {
                        name: item.key.clone(),
                        path: join_path(&mount.mount_path, &item.path),
                        value: value(&item.key),
                        mode: item_mode(item),
                    }));
                }
                (None, Some(sub_path)) => configs.push(ConfigManagement {
                    name: sub_path.to_owned(),
                    path: mount.mount_path.clone(),
                    value: value(sub_path),
                    mode: default_mode,
                }),
                (None, None) => {
                    configs.extend(data.iter().map(|(key, value)| ConfigManagement {
                        name: key.clone(),
                        path: join_path(&mount.mount_path, key),
                        value: value.clone(),
                        mode: default_mode,
                    }));
                }
            }
        }
    }

    configs
}

fn join_path(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}
