use crate::types::{Data, Status, KV};

#[test]
fn sorted_pairs_puts_alertname_first() {
    let kv = KV::from_iter([
        ("severity", "critical"),
        ("alertname", "DiskFull"),
        ("instance", "db-1"),
        ("app", "postgres"),
    ]);

    let names = kv.sorted_pairs().names();
    assert_eq!(names, vec!["alertname", "app", "instance", "severity"]);
}

#[test]
fn sorted_pairs_without_alertname_is_lexicographic() {
    let kv = KV::from_iter([("b", "2"), ("a", "1"), ("c", "3")]);
    assert_eq!(kv.sorted_pairs().names(), vec!["a", "b", "c"]);
    assert_eq!(kv.sorted_pairs().values(), vec!["1", "2", "3"]);
}

#[test]
fn remove_with_no_keys_is_identity() {
    let kv = KV::from_iter([("alertname", "X"), ("job", "node")]);
    let none: [&str; 0] = [];
    assert_eq!(kv.remove(&none), kv);
}

#[test]
fn remove_drops_only_listed_keys() {
    let kv = KV::from_iter([("alertname", "X"), ("job", "node"), ("env", "prod")]);
    let removed = kv.remove(&["job", "missing"]);
    assert_eq!(removed.names(), vec!["alertname", "env"]);
    // The original set is untouched.
    assert_eq!(kv.len(), 3);
}

#[test]
fn webhook_payload_decodes_with_missing_optional_fields() {
    let raw = r#"{
        "receiver": "ops",
        "status": "firing",
        "alerts": [{
            "status": "firing",
            "labels": {"alertname": "HighCPU"},
            "generatorURL": "http://x/graph?g0.expr=cpu%20%3E%2090"
        }]
    }"#;
    let data: Data = serde_json::from_str(raw).unwrap();

    assert_eq!(data.receiver, "ops");
    assert_eq!(data.status, Status::Firing);
    assert_eq!(data.alerts.len(), 1);
    let alert = &data.alerts.0[0];
    assert_eq!(alert.labels.get("alertname"), Some("HighCPU"));
    assert_eq!(alert.generator_url, "http://x/graph?g0.expr=cpu%20%3E%2090");
    assert!(alert.images.is_empty());
    assert!(data.common_labels.is_empty());
}

#[test]
fn alertmanager_payload_round_trips_field_names() {
    let raw = r#"{
        "version": "4",
        "groupKey": "{}:{alertname=\"HighCPU\"}",
        "receiver": "ops",
        "status": "resolved",
        "alerts": [{
            "status": "resolved",
            "labels": {"alertname": "HighCPU", "instance": "web-1"},
            "annotations": {"summary": "cpu high"},
            "startsAt": "2024-03-01T10:00:00Z",
            "endsAt": "2024-03-01T10:30:00Z",
            "generatorURL": "http://prom/graph?g0.expr=up",
            "fingerprint": "abc123"
        }],
        "groupLabels": {"alertname": "HighCPU"},
        "commonLabels": {"alertname": "HighCPU"},
        "commonAnnotations": {"summary": "cpu high"},
        "externalURL": "http://alertmanager:9093"
    }"#;
    let data: Data = serde_json::from_str(raw).unwrap();
    assert_eq!(data.external_url, "http://alertmanager:9093");
    assert_eq!(data.alerts.resolved().len(), 1);
    assert!(data.alerts.firing().is_empty());

    let value = serde_json::to_value(&data).unwrap();
    assert_eq!(value["externalURL"], "http://alertmanager:9093");
    assert_eq!(value["alerts"][0]["generatorURL"], "http://prom/graph?g0.expr=up");
    assert_eq!(value["alerts"][0]["startsAt"], "2024-03-01T10:00:00Z");
    assert_eq!(value["commonAnnotations"]["summary"], "cpu high");
}

#[test]
fn firing_and_resolved_partition_alerts() {
    let raw = r#"{"alerts": [
        {"status": "firing", "labels": {"alertname": "A"}},
        {"status": "resolved", "labels": {"alertname": "B"}},
        {"status": "firing", "labels": {"alertname": "C"}}
    ]}"#;
    let data: Data = serde_json::from_str(raw).unwrap();
    let firing: Vec<_> = data
        .alerts
        .firing()
        .iter()
        .map(|a| a.labels.get("alertname").unwrap_or_default().to_string())
        .collect();
    assert_eq!(firing, vec!["A", "C"]);
    assert_eq!(data.alerts.resolved().len(), 1);
}
