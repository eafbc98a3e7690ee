//! Port mapping extraction from engine inspect documents.

use crate::state::PortBinding;
use serde_json::Value;

/// Parse TCP port bindings from a container inspect document.
///
/// Prefers `NetworkSettings.Ports` (reflects runtime state) and falls back to
/// `HostConfig.PortBindings`, which is all a stopped container still reports.
#[must_use]
pub fn parse_port_bindings(inspect: &Value) -> Vec<PortBinding> {
    let runtime = inspect
        .pointer("/NetworkSettings/Ports")
        .map(parse_port_map)
        .unwrap_or_default();
    if !runtime.is_empty() {
        return runtime;
    }

    inspect
        .pointer("/HostConfig/PortBindings")
        .map(parse_port_map)
        .unwrap_or_default()
}

fn parse_port_map(ports: &Value) -> Vec<PortBinding> {
    let Some(ports) = ports.as_object() else {
        return vec![];
    };

    let mut bindings = Vec::new();

    for (container_port_proto, host_bindings) in ports {
        // "80/tcp"; a bare "80" means tcp.
        let (port_str, proto) = container_port_proto
            .split_once('/')
            .unwrap_or((container_port_proto.as_str(), "tcp"));
        if proto != "tcp" {
            continue;
        }
        let Ok(container_port) = port_str.parse::<u16>() else {
            continue;
        };

        let Some(bindings_arr) = host_bindings.as_array() else {
            continue;
        };

        for binding in bindings_arr {
            let host_port: u16 = binding
                .get("HostPort")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            if host_port > 0 {
                bindings.push(PortBinding {
                    host_port,
                    container_port,
                });
            }
        }
    }

    bindings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_bindings_from_network_settings() {
        let json = serde_json::json!({
            "NetworkSettings": {
                "Ports": {
                    "80/tcp": [{"HostIp": "127.0.0.1", "HostPort": "8080"}],
                    "443/tcp": [{"HostIp": "", "HostPort": "8443"}]
                }
            }
        });
        let bindings = parse_port_bindings(&json);
        assert_eq!(bindings.len(), 2);

        let b80 = bindings.iter().find(|b| b.container_port == 80).unwrap();
        assert_eq!(b80.host_port, 8080);

        let b443 = bindings.iter().find(|b| b.container_port == 443).unwrap();
        assert_eq!(b443.host_port, 8443);
    }

    #[test]
    fn parse_port_bindings_falls_back_to_host_config() {
        let json = serde_json::json!({
            "NetworkSettings": {"Ports": {}},
            "HostConfig": {
                "PortBindings": {
                    "80/tcp": [{"HostIp": "127.0.0.1", "HostPort": "49160"}]
                }
            }
        });
        let bindings = parse_port_bindings(&json);
        assert_eq!(
            bindings,
            vec![PortBinding {
                host_port: 49160,
                container_port: 80
            }]
        );
    }

    #[test]
    fn parse_port_bindings_null_host_bindings() {
        let json = serde_json::json!({
            "NetworkSettings": {
                "Ports": {
                    "80/tcp": null
                }
            }
        });
        assert!(parse_port_bindings(&json).is_empty());
    }

    #[test]
    fn parse_port_bindings_skips_udp() {
        let json = serde_json::json!({
            "NetworkSettings": {
                "Ports": {
                    "53/udp": [{"HostIp": "", "HostPort": "5353"}]
                }
            }
        });
        assert!(parse_port_bindings(&json).is_empty());
    }
}
