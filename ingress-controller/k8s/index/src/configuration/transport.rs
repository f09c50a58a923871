//! Resolves listener ownership among TransportServers.

use super::{by_age, created, Configuration, ListenerHost, Rebuild};
use nginx_ingress_controller_core::{
    Kind, Problem, Resource, TransportServerConfiguration,
};
use nginx_ingress_controller_k8s_api::configuration::{
    TransportServer, TLS_PASSTHROUGH_LISTENER_NAME, TLS_PASSTHROUGH_LISTENER_PROTOCOL,
};
use std::sync::Arc;

impl Configuration {
    /// The oldest TransportServer wins each listener, or each host of the
    /// TLS passthrough listener.
    pub(super) fn rebuild_transport_servers(&self, rebuild: &mut Rebuild) {
        let mut servers = self.transport_servers.iter().collect::<Vec<_>>();
        servers.sort_by(|(a_id, a), (b_id, b)| {
            by_age((created(&***a), *a_id), (created(&***b), *b_id))
        });

        for (id, ts) in servers {
            match self.claim_listener(ts, rebuild) {
                Ok((key, config)) => {
                    rebuild
                        .listener_hosts
                        .insert(key, Resource::TransportServer(config));
                }
                Err(message) => {
                    rebuild.problems.insert(
                        (Kind::TransportServer, id.clone()),
                        Problem::rejected(Kind::TransportServer, id.clone(), message),
                    );
                }
            }
        }
    }

    fn claim_listener(
        &self,
        ts: &Arc<TransportServer>,
        rebuild: &Rebuild,
    ) -> Result<(ListenerHost, TransportServerConfiguration), String> {
        let listener = &ts.spec.listener;

        if listener.protocol == TLS_PASSTHROUGH_LISTENER_PROTOCOL {
            if !self.cluster.tls_passthrough_enabled {
                return Err("TLS Passthrough is not enabled".to_string());
            }
            let key = ListenerHost {
                listener: TLS_PASSTHROUGH_LISTENER_NAME.to_string(),
                host: ts.spec.host.clone(),
            };
            if rebuild.listener_hosts.contains_key(&key) {
                return Err(format!("Host {} is taken by another resource", ts.spec.host));
            }
            let config = TransportServerConfiguration {
                transport_server: ts.clone(),
                listener_port: self.cluster.tls_passthrough_port,
                ipv4: String::new(),
                ipv6: String::new(),
                warnings: Vec::new(),
            };
            return Ok((key, config));
        }

        let gc_listener = self
            .listeners
            .get(&listener.name)
            .ok_or_else(|| format!("Listener {} doesn't exist", listener.name))?;
        if gc_listener.protocol != listener.protocol {
            return Err(format!(
                "Listener {} with protocol {} doesn't exist",
                listener.name, listener.protocol
            ));
        }
        let key = ListenerHost {
            listener: listener.name.clone(),
            host: String::new(),
        };
        if rebuild.listener_hosts.contains_key(&key) {
            return Err(format!(
                "Listener {} is taken by another resource",
                listener.name
            ));
        }
        let port = u16::try_from(gc_listener.port)
            .map_err(|_| format!("Listener {} has an invalid port", listener.name))?;
        let config = TransportServerConfiguration {
            transport_server: ts.clone(),
            listener_port: port,
            ipv4: gc_listener.ipv4.clone(),
            ipv6: gc_listener.ipv6.clone(),
            warnings: Vec::new(),
        };
        Ok((key, config))
    }
}

