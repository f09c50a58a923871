//! Custom resources in the `k8s.nginx.org` group.

pub mod global_configuration;
pub mod policy;
pub mod transport_server;
pub mod virtual_server;
pub mod virtual_server_route;

pub use self::{
    global_configuration::{GlobalConfiguration, GlobalConfigurationSpec, Listener},
    policy::{Policy, PolicySpec, PolicyStatus},
    transport_server::{TransportServer, TransportServerSpec, TransportServerStatus},
    virtual_server::{
        Action, ExternalEndpoint, Match, PolicyReference, Route, Split, Upstream, VirtualServer,
        VirtualServerSpec, VirtualServerStatus,
    },
    virtual_server_route::{VirtualServerRoute, VirtualServerRouteSpec, VirtualServerRouteStatus},
};

pub const GROUP: &str = "k8s.nginx.org";

pub const STATE_VALID: &str = "Valid";
pub const STATE_WARNING: &str = "Warning";
pub const STATE_INVALID: &str = "Invalid";

pub const TLS_PASSTHROUGH_LISTENER_NAME: &str = "tls-passthrough";
pub const TLS_PASSTHROUGH_LISTENER_PROTOCOL: &str = "TLS_PASSTHROUGH";
pub const HTTP_PROTOCOL: &str = "HTTP";
pub const TCP_PROTOCOL: &str = "TCP";
pub const UDP_PROTOCOL: &str = "UDP";
