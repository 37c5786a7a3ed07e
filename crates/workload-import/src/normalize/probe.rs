use k8s_openapi::{
    api::core::v1::{Container, Probe},
    apimachinery::pkg::util::intstr::IntOrString,
};
use tracing::{debug, warn};

use crate::model::{HealthProbe, ProbeMode};

/// Captures the liveness probe of `container`, falling back to its readiness probe.
///
/// HTTP probes record scheme, port, path and headers, exec probes the joined command (scheme
/// `cmd`) and TCP socket probes the port (scheme `tcp`). gRPC probes are not captured.
pub fn health_probe(container: &Container) -> Option<HealthProbe> {
    let (probe, mode) = match (&container.liveness_probe, &container.readiness_probe) {
        (Some(probe), _) => (probe, ProbeMode::Liveness),
        (None, Some(probe)) => (probe, ProbeMode::Readiness),
        (None, None) => return None,
    };

    let mut health_probe = HealthProbe {
        mode,
        scheme: String::new(),
        port: 0,
        path: String::new(),
        command: String::new(),
        http_header: String::new(),
        initial_delay_second: probe.initial_delay_seconds.unwrap_or_default(),
        period_second: probe.period_seconds.unwrap_or_default(),
        timeout_second: probe.timeout_seconds.unwrap_or_default(),
        failure_threshold: probe.failure_threshold.unwrap_or_default(),
        success_threshold: probe.success_threshold.unwrap_or_default(),
    };

    match probe {
        Probe {
            http_get: Some(http_get),
            ..
        } => {
            health_probe.scheme = http_get
                .scheme
                .as_deref()
                .unwrap_or("HTTP")
                .to_lowercase();
            health_probe.port = resolve_port(container, &http_get.port);
            health_probe.path = http_get.path.clone().unwrap_or_default();
            health_probe.http_header = http_get
                .http_headers
                .iter()
                .flatten()
                .map(|header| format!("{}={}", header.name, header.value))
                .collect::<Vec<_>>()
                .join(",");
        }
        Probe {
            exec: Some(exec), ..
        } => {
            health_probe.scheme = "cmd".to_owned();
            health_probe.command = exec
                .command
                .iter()
                .flatten()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
        }
        Probe {
            tcp_socket: Some(tcp_socket),
            ..
        } => {
            health_probe.scheme = "tcp".to_owned();
            health_probe.port = resolve_port(container, &tcp_socket.port);
        }
        _ => {
            debug!(container = %container.name, %mode, "probe has no supported handler");
            return None;
        }
    }

    Some(health_probe)
}

/// Resolves named ports against the container's port list.
fn resolve_port(container: &Container, port: &IntOrString) -> i32 {
    match port {
        IntOrString::Int(port) => *port,
        IntOrString::String(name) => container
            .ports
            .iter()
            .flatten()
            .find(|port| port.name.as_ref() == Some(name))
            .map(|port| port.container_port)
            .unwrap_or_else(|| {
                warn!(container = %container.name, port = %name, "unknown named probe port");
                0
            }),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn container(yaml: &str) -> Container {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn liveness_is_preferred() {
        let probe = health_probe(&container(indoc! {"
            name: web
            ports:
              - name: http
                containerPort: 8080
            livenessProbe:
              httpGet:
                scheme: HTTPS
                port: http
                path: /healthz
                httpHeaders:
                  - name: Host
                    value: shop.example.com
                  - name: X-Probe
                    value: 'true'
              initialDelaySeconds: 10
              periodSeconds: 15
              timeoutSeconds: 2
              failureThreshold: 4
              successThreshold: 1
            readinessProbe:
              tcpSocket:
                port: 8080
        "}))
        .unwrap();

        assert_eq!(
            probe,
            HealthProbe {
                mode: ProbeMode::Liveness,
                scheme: "https".to_owned(),
                port: 8080,
                path: "/healthz".to_owned(),
                command: String::new(),
                http_header: "Host=shop.example.com,X-Probe=true".to_owned(),
                initial_delay_second: 10,
                period_second: 15,
                timeout_second: 2,
                failure_threshold: 4,
                success_threshold: 1,
            }
        );
    }

    #[test]
    fn readiness_exec_probe() {
        let probe = health_probe(&container(indoc! {"
            name: worker
            readinessProbe:
              exec:
                command: [cat, /tmp/ready]
              periodSeconds: 5
        "}))
        .unwrap();

        assert_eq!(probe.mode, ProbeMode::Readiness);
        assert_eq!(probe.scheme, "cmd");
        assert_eq!(probe.command, "cat /tmp/ready");
        assert_eq!(probe.port, 0);
        assert_eq!(probe.period_second, 5);
    }

    #[test]
    fn no_probe() {
        assert!(health_probe(&container("name: web")).is_none());
        assert!(
            health_probe(&container(indoc! {"
                name: web
                livenessProbe:
                  grpc:
                    port: 9090
            "}))
            .is_none()
        );
    }
}
