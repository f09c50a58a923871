use super::*;
use crate::{
    cluster_info::mk_cluster_info,
    test_util::{
        mk_gc, mk_ingress, mk_listener, mk_master, mk_minion, mk_ts, mk_vs, mk_vsr, with_route,
    },
};
use nginx_ingress_controller_core::Reason;
use pretty_assertions::assert_eq;

fn mk_config() -> Configuration {
    Configuration::new(Arc::new(mk_cluster_info()))
}

fn id(ns: &str, name: &str) -> ResourceId {
    ResourceId::new(ns, name)
}

fn summary(changes: &[ResourceChange]) -> Vec<(Operation, Kind, String)> {
    changes
        .iter()
        .map(|c| (c.op, c.resource.kind(), c.resource.id().to_string()))
        .collect()
}

fn problem<'p>(problems: &'p [Problem], kind: Kind, id: &ResourceId) -> Option<&'p Problem> {
    problems.iter().find(|p| p.kind == kind && p.id == *id)
}

#[test]
fn virtual_server_wins_host_over_older_ingress() {
    let mut config = mk_config();

    let (changes, problems) =
        config.add_or_update_virtual_server(Arc::new(mk_vs("default", "vs-a", 100, "foo.com")));
    assert_eq!(
        summary(&changes),
        vec![(Operation::AddOrUpdate, Kind::VirtualServer, "default/vs-a".to_string())]
    );
    assert!(problems.is_empty());

    let (changes, problems) =
        config.add_or_update_ingress(Arc::new(mk_ingress("default", "ing-a", 50, &["foo.com"])));
    assert!(changes.is_empty(), "{:?}", summary(&changes));
    let rejected = problem(&problems, Kind::Ingress, &id("default", "ing-a"))
        .expect("ingress must be rejected");
    assert_eq!(rejected.reason, Reason::Rejected);
    assert!(rejected.message.contains("default/vs-a"), "{}", rejected.message);

    assert_eq!(
        config.host_owner("foo.com").map(|r| r.id()),
        Some(id("default", "vs-a"))
    );
}

#[test]
fn older_ingress_wins_host() {
    let mut config = mk_config();
    config.add_or_update_ingress(Arc::new(mk_ingress("default", "newer", 20, &["foo.com"])));
    let (changes, problems) =
        config.add_or_update_ingress(Arc::new(mk_ingress("default", "older", 10, &["foo.com"])));

    assert_eq!(
        summary(&changes),
        vec![
            (Operation::Delete, Kind::Ingress, "default/newer".to_string()),
            (Operation::AddOrUpdate, Kind::Ingress, "default/older".to_string()),
        ]
    );
    let rejected = problem(&problems, Kind::Ingress, &id("default", "newer"))
        .expect("newer ingress must be rejected");
    assert_eq!(
        rejected.message,
        "All hosts are taken by other resources: default/older"
    );
}

#[test]
fn ingress_keeps_free_hosts() {
    let mut config = mk_config();
    config.add_or_update_virtual_server(Arc::new(mk_vs("default", "vs", 10, "a.com")));
    let (changes, problems) = config.add_or_update_ingress(Arc::new(mk_ingress(
        "default",
        "ing",
        5,
        &["a.com", "b.com"],
    )));
    assert!(problems.is_empty());

    let Resource::Ingress(accepted) = &changes[0].resource else {
        panic!("expected an ingress");
    };
    assert_eq!(
        accepted.valid_hosts,
        maplit::btreemap! {
            "a.com".to_string() => false,
            "b.com".to_string() => true,
        }
    );
    assert_eq!(accepted.warnings, vec!["host a.com is taken by default/vs".to_string()]);
}

#[test]
fn outcome_is_independent_of_arrival_order() {
    let vs = Arc::new(mk_vs("default", "vs", 30, "foo.com"));
    let a = Arc::new(mk_ingress("default", "a", 10, &["foo.com", "bar.com"]));
    let b = Arc::new(mk_ingress("default", "b", 20, &["bar.com", "baz.com"]));

    let mut first = mk_config();
    first.add_or_update_virtual_server(vs.clone());
    first.add_or_update_ingress(a.clone());
    first.add_or_update_ingress(b.clone());

    let mut second = mk_config();
    second.add_or_update_ingress(b);
    second.add_or_update_ingress(a);
    second.add_or_update_virtual_server(vs);

    assert_eq!(first.get_resources(), second.get_resources());
    for (host, owner) in &[("foo.com", "vs"), ("bar.com", "a"), ("baz.com", "b")] {
        assert_eq!(
            first.host_owner(host).map(|r| r.id()),
            Some(id("default", owner)),
            "{}",
            host
        );
    }
}

#[test]
fn repeated_updates_report_nothing() {
    let mut config = mk_config();
    let ing = Arc::new(mk_ingress("default", "ing", 10, &["foo.com"]));
    let (changes, _) = config.add_or_update_ingress(ing.clone());
    assert_eq!(changes.len(), 1);

    let (changes, problems) = config.add_or_update_ingress(ing);
    assert!(changes.is_empty());
    assert!(problems.is_empty());

    // A still-rejected resource is reported on every update so that its
    // status is written again.
    let loser = Arc::new(mk_ingress("default", "loser", 20, &["foo.com"]));
    let (_, problems) = config.add_or_update_ingress(loser.clone());
    assert_eq!(problems.len(), 1);
    let (changes, problems) = config.add_or_update_ingress(loser);
    assert!(changes.is_empty());
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].id, id("default", "loser"));

    // Unrelated updates do not repeat it.
    let other = Arc::new(mk_ingress("default", "other", 30, &["bar.com"]));
    let (_, problems) = config.add_or_update_ingress(other);
    assert!(problems.is_empty());
}

#[test]
fn resources_of_other_classes_are_ignored() {
    let mut config = mk_config();
    let mut ing = mk_ingress("default", "ing", 10, &["foo.com"]);
    if let Some(spec) = ing.spec.as_mut() {
        spec.ingress_class_name = Some("other".to_string());
    }
    let (changes, problems) = config.add_or_update_ingress(Arc::new(ing));
    assert!(changes.is_empty());
    assert!(problems.is_empty());

    let mut vs = mk_vs("default", "vs", 10, "foo.com");
    vs.spec.ingress_class = "other".to_string();
    let (changes, problems) = config.add_or_update_virtual_server(Arc::new(vs));
    assert!(changes.is_empty());
    assert!(problems.is_empty());
}

#[test]
fn class_change_removes_accepted_resource() {
    let mut config = mk_config();
    let mut vs = mk_vs("default", "vs", 10, "foo.com");
    config.add_or_update_virtual_server(Arc::new(vs.clone()));

    vs.spec.ingress_class = "other".to_string();
    let (changes, _) = config.add_or_update_virtual_server(Arc::new(vs));
    assert_eq!(
        summary(&changes),
        vec![(Operation::Delete, Kind::VirtualServer, "default/vs".to_string())]
    );
}

#[test]
fn invalid_update_deletes_with_error() {
    let mut config = mk_config();
    let mut vs = mk_vs("default", "vs", 10, "foo.com");
    config.add_or_update_virtual_server(Arc::new(vs.clone()));

    vs.spec.routes[0].action = None;
    let (changes, problems) = config.add_or_update_virtual_server(Arc::new(vs.clone()));
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].op, Operation::Delete);
    let error = changes[0].error.as_deref().expect("deletion carries the error");
    assert!(error.contains("spec.routes[0]"), "{}", error);
    assert!(problems.is_empty());

    // Repeating the invalid update reports the rejection again.
    let (changes, problems) = config.add_or_update_virtual_server(Arc::new(vs));
    assert!(changes.is_empty());
    let rejected = problem(&problems, Kind::VirtualServer, &id("default", "vs"))
        .expect("rejection is repeated");
    assert!(rejected.message.contains("spec.routes[0]"), "{}", rejected.message);

    let (changes, problems) = config.delete_virtual_server(&id("default", "vs"));
    assert!(changes.is_empty());
    assert!(problems.is_empty());
}

#[test]
fn invalid_resource_is_rejected() {
    let mut config = mk_config();
    let mut vs = mk_vs("default", "vs", 10, "foo.com");
    vs.spec.upstreams.clear();
    let (changes, problems) = config.add_or_update_virtual_server(Arc::new(vs));
    assert!(changes.is_empty());
    let rejected = problem(&problems, Kind::VirtualServer, &id("default", "vs"))
        .expect("invalid virtual server must be rejected");
    assert_eq!(rejected.reason, Reason::Rejected);
    assert!(rejected.is_error);
    assert!(
        rejected.message.contains("must specify an existing upstream"),
        "{}",
        rejected.message
    );
}

#[test]
fn master_merges_minions() {
    let mut config = mk_config();
    config.add_or_update_ingress(Arc::new(mk_master("default", "cafe-m", 10, "cafe.com")));
    config.add_or_update_ingress(Arc::new(mk_minion(
        "default",
        "coffee",
        20,
        "cafe.com",
        &["/coffee"],
    )));
    let (changes, problems) = config.add_or_update_ingress(Arc::new(mk_minion(
        "default",
        "tea",
        30,
        "cafe.com",
        &["/tea"],
    )));
    assert!(problems.is_empty());
    assert_eq!(changes.len(), 1);
    let Resource::Ingress(master) = &changes[0].resource else {
        panic!("expected an ingress");
    };
    assert!(master.is_master);
    assert_eq!(
        master
            .minions
            .iter()
            .map(|m| ResourceId::of(&*m.ingress))
            .collect::<Vec<_>>(),
        vec![id("default", "coffee"), id("default", "tea")]
    );

    let (changes, problems) = config.add_or_update_ingress(Arc::new(mk_minion(
        "default",
        "tea2",
        40,
        "cafe.com",
        &["/tea"],
    )));
    assert!(changes.is_empty());
    let rejected = problem(&problems, Kind::Ingress, &id("default", "tea2"))
        .expect("duplicate minion must be rejected");
    assert_eq!(rejected.reason, Reason::Rejected);
    assert_eq!(rejected.message, "path /tea duplicated");
}

#[test]
fn minion_with_partially_taken_paths() {
    let mut config = mk_config();
    config.add_or_update_ingress(Arc::new(mk_master("default", "cafe-m", 10, "cafe.com")));
    config.add_or_update_ingress(Arc::new(mk_minion("default", "tea", 20, "cafe.com", &["/tea"])));
    let (changes, problems) = config.add_or_update_ingress(Arc::new(mk_minion(
        "default",
        "mixed",
        30,
        "cafe.com",
        &["/tea", "/juice"],
    )));
    assert!(problems.is_empty());
    let Resource::Ingress(master) = &changes[0].resource else {
        panic!("expected an ingress");
    };
    assert_eq!(
        master.child_warnings.get(&id("default", "mixed")),
        Some(&vec!["path /tea is taken by another resource".to_string()])
    );
    assert_eq!(
        master.minions[1].valid_paths,
        maplit::btreemap! {
            "/juice".to_string() => true,
            "/tea".to_string() => false,
        }
    );
}

#[test]
fn minion_without_master() {
    let mut config = mk_config();
    let (changes, problems) = config.add_or_update_ingress(Arc::new(mk_minion(
        "default",
        "coffee",
        20,
        "cafe.com",
        &["/coffee"],
    )));
    assert!(changes.is_empty());
    let orphan = problem(&problems, Kind::Ingress, &id("default", "coffee"))
        .expect("orphan minion must be reported");
    assert_eq!(orphan.reason, Reason::NoIngressMasterFound);

    let (changes, problems) =
        config.add_or_update_ingress(Arc::new(mk_master("default", "cafe-m", 10, "cafe.com")));
    assert!(problems.is_empty());
    let Resource::Ingress(master) = &changes[0].resource else {
        panic!("expected an ingress");
    };
    assert_eq!(master.minions.len(), 1);

    let (changes, problems) = config.delete_ingress(&id("default", "cafe-m"));
    assert_eq!(
        summary(&changes),
        vec![(Operation::Delete, Kind::Ingress, "default/cafe-m".to_string())]
    );
    assert_eq!(
        problem(&problems, Kind::Ingress, &id("default", "coffee")).map(|p| p.reason),
        Some(Reason::NoIngressMasterFound)
    );
}

#[test]
fn virtual_server_routes_attach() {
    let mut config = mk_config();
    let vs = with_route(mk_vs("default", "cafe", 10, "cafe.com"), "/coffee", "coffee");

    let (_, problems) =
        config.add_or_update_virtual_server_route(Arc::new(mk_vsr("default", "coffee", "cafe.com", "/coffee")));
    assert_eq!(
        problem(&problems, Kind::VirtualServerRoute, &id("default", "coffee")).map(|p| p.reason),
        Some(Reason::NoVirtualServersFound)
    );

    let (changes, problems) = config.add_or_update_virtual_server(Arc::new(vs));
    assert!(problems.is_empty());
    let Resource::VirtualServer(accepted) = &changes[0].resource else {
        panic!("expected a virtual server");
    };
    assert_eq!(accepted.virtual_server_routes.len(), 1);
    assert!(accepted.warnings.is_empty());
    assert_eq!(
        config
            .virtual_server_for_route(&id("default", "coffee"))
            .map(|c| ResourceId::of(&*c.virtual_server)),
        Some(id("default", "cafe"))
    );
}

#[test]
fn virtual_server_route_problems() {
    let mut config = mk_config();
    let vs = with_route(mk_vs("default", "cafe", 10, "cafe.com"), "/coffee", "coffee");
    let (changes, _) = config.add_or_update_virtual_server(Arc::new(vs));
    let Resource::VirtualServer(accepted) = &changes[0].resource else {
        panic!("expected a virtual server");
    };
    assert_eq!(
        accepted.warnings,
        vec!["VirtualServerRoute default/coffee doesn't exist or invalid".to_string()]
    );

    // A route for the host that the virtual server does not reference.
    let (_, problems) =
        config.add_or_update_virtual_server_route(Arc::new(mk_vsr("default", "tea", "cafe.com", "/tea")));
    let ignored = problem(&problems, Kind::VirtualServerRoute, &id("default", "tea"))
        .expect("unreferenced route must be reported");
    assert_eq!(ignored.reason, Reason::Ignored);
    assert_eq!(ignored.message, "VirtualServer default/cafe ignores VirtualServerRoute");

    // A referenced route with paths outside of the delegated prefix.
    let (changes, _) = config.add_or_update_virtual_server_route(Arc::new(mk_vsr(
        "default", "coffee", "cafe.com", "/tea",
    )));
    let Resource::VirtualServer(accepted) = &changes[0].resource else {
        panic!("expected a virtual server");
    };
    assert!(accepted.virtual_server_routes.is_empty());
    assert!(
        accepted.warnings[0].starts_with("VirtualServerRoute default/coffee is invalid"),
        "{:?}",
        accepted.warnings
    );
}

#[test]
fn virtual_server_listeners() {
    let mut config = mk_config();
    let mut https = mk_listener("https-8443", 8443, "HTTP");
    https.ssl = true;
    config.add_or_update_global_configuration(Arc::new(mk_gc(vec![
        mk_listener("http-8080", 8080, "HTTP"),
        https,
    ])));

    let mut vs = mk_vs("default", "vs", 10, "foo.com");
    vs.spec.listener = Some(
        nginx_ingress_controller_k8s_api::configuration::virtual_server::VirtualServerListener {
            http: "http-8080".to_string(),
            https: "https-8443".to_string(),
        },
    );
    vs.spec.tls = Some(nginx_ingress_controller_k8s_api::configuration::virtual_server::Tls {
        secret: "foo-tls".to_string(),
        ..Default::default()
    });
    let (changes, _) = config.add_or_update_virtual_server(Arc::new(vs.clone()));
    let Resource::VirtualServer(accepted) = &changes[0].resource else {
        panic!("expected a virtual server");
    };
    assert_eq!((accepted.http_port, accepted.https_port), (8080, 8443));
    assert!(accepted.warnings.is_empty());

    let (changes, _) = config.delete_global_configuration();
    let Resource::VirtualServer(accepted) = &changes[0].resource else {
        panic!("expected a virtual server");
    };
    assert_eq!((accepted.http_port, accepted.https_port), (80, 443));
    assert_eq!(accepted.warnings.len(), 2);
}

#[test]
fn transport_servers_claim_listeners() {
    let mut config = mk_config();
    let (changes, problems) =
        config.add_or_update_transport_server(Arc::new(mk_ts("default", "dns", 10, "dns-udp", "UDP", "")));
    assert!(changes.is_empty());
    assert_eq!(
        problem(&problems, Kind::TransportServer, &id("default", "dns")).map(|p| p.message.as_str()),
        Some("Listener dns-udp doesn't exist")
    );

    let (changes, _, error) = config.add_or_update_global_configuration(Arc::new(mk_gc(vec![
        mk_listener("dns-udp", 5353, "UDP"),
    ])));
    assert_eq!(error, None);
    assert_eq!(
        summary(&changes),
        vec![(Operation::AddOrUpdate, Kind::TransportServer, "default/dns".to_string())]
    );
    let Resource::TransportServer(accepted) = &changes[0].resource else {
        panic!("expected a transport server");
    };
    assert_eq!(accepted.listener_port, 5353);

    let (changes, problems) =
        config.add_or_update_transport_server(Arc::new(mk_ts("default", "dns2", 20, "dns-udp", "UDP", "")));
    assert!(changes.is_empty());
    assert_eq!(
        problem(&problems, Kind::TransportServer, &id("default", "dns2")).map(|p| p.message.as_str()),
        Some("Listener dns-udp is taken by another resource")
    );

    let (_, problems) =
        config.add_or_update_transport_server(Arc::new(mk_ts("default", "dns3", 30, "dns-udp", "TCP", "")));
    assert_eq!(
        problem(&problems, Kind::TransportServer, &id("default", "dns3")).map(|p| p.message.as_str()),
        Some("Listener dns-udp with protocol TCP doesn't exist")
    );

    // Removing the holder hands the listener to the next oldest server.
    let (changes, _) = config.delete_transport_server(&id("default", "dns"));
    assert_eq!(
        summary(&changes),
        vec![
            (Operation::Delete, Kind::TransportServer, "default/dns".to_string()),
            (Operation::AddOrUpdate, Kind::TransportServer, "default/dns2".to_string()),
        ]
    );
}

#[test]
fn tls_passthrough_hosts() {
    let mut config = mk_config();
    let (changes, _) = config.add_or_update_transport_server(Arc::new(mk_ts(
        "default",
        "secure",
        10,
        "tls-passthrough",
        "TLS_PASSTHROUGH",
        "app.example.com",
    )));
    let Resource::TransportServer(accepted) = &changes[0].resource else {
        panic!("expected a transport server");
    };
    assert_eq!(accepted.listener_port, 443);

    let (changes, problems) = config.add_or_update_transport_server(Arc::new(mk_ts(
        "default",
        "secure2",
        20,
        "tls-passthrough",
        "TLS_PASSTHROUGH",
        "app.example.com",
    )));
    assert!(changes.is_empty());
    assert_eq!(
        problem(&problems, Kind::TransportServer, &id("default", "secure2")).map(|p| p.message.as_str()),
        Some("Host app.example.com is taken by another resource")
    );

    let (changes, _) = config.add_or_update_transport_server(Arc::new(mk_ts(
        "default",
        "other",
        30,
        "tls-passthrough",
        "TLS_PASSTHROUGH",
        "other.example.com",
    )));
    assert_eq!(changes.len(), 1);

    let mut cluster = mk_cluster_info();
    cluster.tls_passthrough_enabled = false;
    let mut config = Configuration::new(Arc::new(cluster));
    let (_, problems) = config.add_or_update_transport_server(Arc::new(mk_ts(
        "default",
        "secure",
        10,
        "tls-passthrough",
        "TLS_PASSTHROUGH",
        "app.example.com",
    )));
    assert_eq!(
        problems.first().map(|p| p.message.as_str()),
        Some("TLS Passthrough is not enabled")
    );
}

#[test]
fn invalid_listeners_are_dropped() {
    let mut config = mk_config();
    let (_, _, error) = config.add_or_update_global_configuration(Arc::new(mk_gc(vec![
        mk_listener("tcp-a", 5353, "TCP"),
        mk_listener("udp-a", 5353, "UDP"),
        mk_listener("http-a", 5353, "HTTP"),
    ])));
    assert!(error.is_some());
    assert_eq!(
        config.listeners().keys().cloned().collect::<Vec<_>>(),
        vec!["tcp-a".to_string(), "udp-a".to_string()]
    );
    assert!(config.global_configuration().is_some());
}

#[test]
fn lookups() {
    let mut config = mk_config();
    let mut ing = mk_ingress("default", "ing", 10, &["ing.com"]);
    ing.metadata.annotations = Some(maplit::btreemap! {
        "nginx.org/basic-auth-secret".to_string() => "htpasswd".to_string(),
    });
    if let Some(spec) = ing.spec.as_mut() {
        spec.tls = Some(vec![nginx_ingress_controller_k8s_api::IngressTLS {
            hosts: Some(vec!["ing.com".to_string()]),
            secret_name: Some("ing-tls".to_string()),
        }]);
    }
    config.add_or_update_ingress(Arc::new(ing));

    let mut vs = with_route(mk_vs("default", "vs", 10, "vs.com"), "/coffee", "coffee");
    vs.spec.policies = vec![nginx_ingress_controller_k8s_api::configuration::PolicyReference {
        name: "rate".to_string(),
        namespace: String::new(),
    }];
    config.add_or_update_virtual_server(Arc::new(vs));
    let mut vsr = mk_vsr("apps", "coffee", "vs.com", "/coffee");
    vsr.spec.subroutes[0].policies = vec![nginx_ingress_controller_k8s_api::configuration::PolicyReference {
        name: "jwt".to_string(),
        namespace: String::new(),
    }];
    let mut vs = config
        .virtual_server(&id("default", "vs"))
        .map(|vs| (**vs).clone())
        .expect("virtual server is pending");
    vs.spec.routes[1].route = "apps/coffee".to_string();
    config.add_or_update_virtual_server_route(Arc::new(vsr));
    config.add_or_update_virtual_server(Arc::new(vs));
    config.add_or_update_global_configuration(Arc::new(mk_gc(vec![mk_listener("dns", 5353, "UDP")])));
    config.add_or_update_transport_server(Arc::new(mk_ts("default", "dns", 10, "dns", "UDP", "")));

    let ids = |resources: Vec<Resource>| resources.iter().map(|r| r.id().to_string()).collect::<Vec<_>>();

    for (namespace, service, expected) in &[
        ("default", "web-svc", vec!["default/ing", "default/vs"]),
        ("apps", "coffee-svc", vec!["default/vs"]),
        ("default", "coffee-svc", vec![]),
        ("default", "app-svc", vec!["default/dns"]),
    ] {
        assert_eq!(
            ids(config.find_resources_for_service(namespace, service)),
            *expected,
            "{}/{}",
            namespace,
            service
        );
    }

    for (namespace, secret, expected) in &[
        ("default", "ing-tls", vec!["default/ing"]),
        ("default", "htpasswd", vec!["default/ing"]),
        ("apps", "ing-tls", vec![]),
    ] {
        assert_eq!(
            ids(config.find_resources_for_secret(namespace, secret)),
            *expected,
            "{}/{}",
            namespace,
            secret
        );
    }

    assert_eq!(
        ids(config.find_resources_for_policies(&[id("default", "rate")])),
        vec!["default/vs"]
    );
    assert_eq!(
        ids(config.find_resources_for_policies(&[id("apps", "jwt")])),
        vec!["default/vs"]
    );
    assert!(config
        .find_resources_for_policies(&[id("default", "jwt")])
        .is_empty());

    assert_eq!(
        config
            .get_resources_with_filter(ResourceFilter {
                transport_servers: true,
                ..Default::default()
            })
            .len(),
        1
    );
    assert_eq!(config.get_resources().len(), 3);
    assert!(config.accepted_virtual_server(&id("default", "vs")).is_some());
    assert!(config.virtual_server_route(&id("apps", "coffee")).is_some());
}
