use super::*;
use crate::test_util::time;
use pretty_assertions::assert_eq;

fn mk_policy(name: &str, required_tags: &[&str]) -> APPolicy {
    let reqs = required_tags
        .iter()
        .map(|tag| serde_json::json!({ "tag": tag }))
        .collect::<Vec<_>>();
    serde_json::from_value(serde_json::json!({
        "apiVersion": "appprotect.f5.com/v1beta1",
        "kind": "APPolicy",
        "metadata": { "name": name, "namespace": "default" },
        "spec": { "policy": { "name": name, "signature-requirements": reqs } },
    }))
    .expect("valid APPolicy")
}

fn mk_log_conf(name: &str, spec: Value) -> APLogConf {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "appprotect.f5.com/v1beta1",
        "kind": "APLogConf",
        "metadata": { "name": name, "namespace": "default" },
        "spec": spec,
    }))
    .expect("valid APLogConf")
}

fn mk_user_sig(name: &str, created: u32, tag: &str) -> APUserSig {
    let mut sig: APUserSig = serde_json::from_value(serde_json::json!({
        "apiVersion": "appprotect.f5.com/v1beta1",
        "kind": "APUserSig",
        "metadata": { "name": name, "namespace": "default" },
        "spec": { "tag": tag, "signatures": [{ "name": "sig", "rule": "content:\"x\";" }] },
    }))
    .expect("valid APUserSig");
    sig.metadata.creation_timestamp = Some(time(created));
    sig
}

fn id(name: &str) -> ResourceId {
    ResourceId::new("default", name)
}

fn names<T: ResourceExt>(objs: &[Arc<T>]) -> Vec<String> {
    objs.iter().map(|o| o.name_any()).collect()
}

#[test]
fn log_destinations() {
    for (dest, ok) in &[
        ("stderr", true),
        ("/var/log/app_protect/security.log", true),
        ("syslog:server=127.0.0.1:514", true),
        ("syslog:server=localhost:514", true),
        ("syslog:server=::1:514", true),
        ("syslog:server=127.0.0.1:0", false),
        ("syslog:server=127.0.0.1:65536", false),
        ("syslog:server=example.com:514", false),
        ("syslog:server=127.0.0.1", false),
        ("stdout", false),
        ("/", false),
        ("/var/log/with space", false),
    ] {
        assert_eq!(validate_log_destination(dest).is_ok(), *ok, "{}", dest);
    }
}

#[test]
fn policies_and_log_confs() {
    let mut ap = AppProtectConfiguration::default();

    let (changes, problems) = ap.add_or_update_policy(Arc::new(mk_policy("waf", &[])));
    assert!(problems.is_empty());
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].op, Operation::AddOrUpdate);
    assert!(ap.policy(&id("waf")).is_ok());
    assert!(matches!(
        ap.get_app_resource(Kind::AppProtectPolicy, &id("waf")),
        Ok(AppProtectResource::Policy(_))
    ));
    assert_eq!(
        ap.get_app_resource(Kind::Ingress, &id("waf")),
        Err(AppResourceError::UnknownKind(Kind::Ingress))
    );

    let (changes, problems) = ap.add_or_update_log_conf(Arc::new(mk_log_conf(
        "log",
        serde_json::json!({ "content": { "format": "default" } }),
    )));
    assert!(changes.is_empty(), "never valid, nothing to delete");
    assert_eq!(problems.len(), 1);
    assert!(
        problems[0].message.contains("Required field spec.filter not found"),
        "{}",
        problems[0].message
    );
    let err = ap.log_conf(&id("log")).expect_err("log conf is invalid");
    assert!(err.to_string().starts_with("APLogConf default/log is invalid"), "{}", err);

    let (changes, problems) = ap.add_or_update_log_conf(Arc::new(mk_log_conf(
        "log",
        serde_json::json!({ "content": { "format": "default" }, "filter": { "request_type": "all" } }),
    )));
    assert!(problems.is_empty());
    assert_eq!(changes[0].op, Operation::AddOrUpdate);

    let (changes, _) = ap.delete_log_conf(&id("log"));
    assert_eq!(changes[0].op, Operation::Delete);
    assert_eq!(
        ap.log_conf(&id("log")),
        Err(AppResourceError::NotFound {
            kind: Kind::AppProtectLogConf,
            id: id("log")
        })
    );
    assert_eq!(ap.delete_policy(&id("missing")), (Vec::new(), Vec::new()));
}

#[test]
fn user_sig_tags_are_unique() {
    let mut ap = AppProtectConfiguration::default();

    let (change, problems) = ap.add_or_update_user_sig(Arc::new(mk_user_sig("newer", 20, "fruits")));
    assert!(problems.is_empty());
    assert_eq!(names(&change.user_sigs), vec!["newer"]);

    let (change, problems) = ap.add_or_update_user_sig(Arc::new(mk_user_sig("older", 10, "fruits")));
    assert_eq!(names(&change.user_sigs), vec!["older"], "the oldest holds the tag");
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].id, id("newer"));
    assert!(problems[0].message.starts_with("Duplicate tag set"), "{}", problems[0].message);

    let (change, problems) = ap.delete_user_sig(&id("older"));
    assert!(problems.is_empty());
    assert_eq!(names(&change.user_sigs), vec!["newer"]);
}

#[test]
fn signature_requirements_follow_user_sigs() {
    let mut ap = AppProtectConfiguration::default();

    let (changes, problems) = ap.add_or_update_policy(Arc::new(mk_policy("waf", &["fruits"])));
    assert!(changes.is_empty());
    assert_eq!(problems.len(), 1);
    assert!(problems[0].message.contains("unsatisfied signature requirements"));

    let (change, problems) = ap.add_or_update_user_sig(Arc::new(mk_user_sig("sig", 10, "fruits")));
    assert!(problems.is_empty());
    assert_eq!(names(&change.policy_adds_or_updates), vec!["waf"]);
    assert!(change.policy_deletions.is_empty());
    assert!(ap.policy(&id("waf")).is_ok());

    let (change, problems) = ap.delete_user_sig(&id("sig"));
    assert_eq!(names(&change.policy_deletions), vec!["waf"]);
    assert!(change.user_sigs.is_empty());
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, Kind::AppProtectPolicy);
    assert!(ap.policy(&id("waf")).is_err());
}

#[test]
fn signature_revision_bounds() {
    let req = SignatureRequirement {
        tag: "fruits".to_string(),
        min_revision: Some("2020-01-01T00:00:00Z".to_string()),
        max_revision: None,
    };
    assert!(req.is_satisfied_by(Some("2021-06-01T00:00:00Z")));
    assert!(!req.is_satisfied_by(Some("2019-06-01T00:00:00Z")));
    assert!(!req.is_satisfied_by(None));
    assert!(SignatureRequirement::default().is_satisfied_by(None));
}
