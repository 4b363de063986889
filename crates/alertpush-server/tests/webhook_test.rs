mod common;

use alertpush_common::types::Data;
use alertpush_server::logging::MAX_REQUEST_BODY;
use alertpush_template::Template;
use axum::http::StatusCode;
use common::{
    build_test_context, build_test_context_with_enricher, dingtalk_config, fake_enricher, request_json, send_raw,
    FIRING_PAYLOAD,
};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn dingtalk_stub(expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/robot/send"))
        .and(query_param("access_token", "dt-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})))
        .expect(expected_calls)
        .mount(&server)
        .await;
    server
}

async fn posted_bodies(server: &MockServer, path_suffix: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path().ends_with(path_suffix))
        .map(|r| serde_json::from_slice(&r.body).expect("notifier should post JSON"))
        .collect()
}

#[tokio::test]
async fn firing_alert_is_enriched_and_delivered_to_dingtalk() {
    let server = dingtalk_stub(1).await;
    let (enricher, metrics, store) = fake_enricher(false);
    let ctx = build_test_context_with_enricher(&dingtalk_config(&server.uri()), enricher).unwrap();

    let (status, body, _) = send_raw(&ctx.app, "POST", "/ops/send", FIRING_PAYLOAD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let posts = posted_bodies(&server, "/robot/send").await;
    assert_eq!(posts.len(), 1);
    let msg = &posts[0];
    assert_eq!(msg["msgtype"], "markdown");

    let data: Data = serde_json::from_str(FIRING_PAYLOAD).unwrap();
    let expected_title = Template::from_globs::<&str>(&[])
        .unwrap()
        .execute_text("{{> dingtalk_default_title}}", &data)
        .unwrap();
    assert_eq!(msg["markdown"]["title"], expected_title.as_str());
    assert!(expected_title.starts_with("[FIRING:1]"));

    let text = msg["markdown"]["text"].as_str().unwrap();
    assert!(text.contains("**HighCPU**"));
    assert!(text.contains("![cpu > 90.00](http://charts.example/pictures/"));

    assert_eq!(metrics.queries.load(Ordering::SeqCst), 1);
    assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_receiver_returns_404_and_notifies_nobody() {
    let server = dingtalk_stub(0).await;
    let ctx = build_test_context(&dingtalk_config(&server.uri())).unwrap();

    let (status, body) = request_json(&ctx.app, "POST", "/nobody/send", Some(FIRING_PAYLOAD)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["err_code"], 1004);
    assert!(body["err_msg"].as_str().unwrap().contains("nobody"));
    assert!(posted_bodies(&server, "/robot/send").await.is_empty());
}

#[tokio::test]
async fn malformed_payload_is_a_bad_request() {
    let server = dingtalk_stub(0).await;
    let ctx = build_test_context(&dingtalk_config(&server.uri())).unwrap();

    let (status, body) = request_json(&ctx.app, "POST", "/ops/send", Some("{\"alerts\": 5")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["err_code"], 1001);
}

#[tokio::test]
async fn one_failing_channel_does_not_stop_the_other() {
    let server = dingtalk_stub(1).await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/gettoken"))
        .and(query_param("corpid", "wx-corp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "access_token": "tok"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/message/send"))
        .and(query_param("access_token", "tok"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let ctx = build_test_context(&format!(
        r#"
[global]
dingtalk_api_url = "{uri}/robot/send"
dingtalk_api_token = "dt-token"
wechat_api_url = "{uri}/cgi-bin/"
wechat_api_secret = "wx-secret"
wechat_api_corp_id = "wx-corp"

[[receivers]]
name = "ops"
[receivers.dingtalk_config]
[receivers.wechat_config]
"#
    ))
    .unwrap();

    let (status, body) = request_json(&ctx.app, "POST", "/ops/send", Some(FIRING_PAYLOAD)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["err_code"], 1502);
    assert_eq!(body["err_msg"], "ops/wechat: unexpected status code 500");

    let failures = body["data"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["channel"], "wechat");
    assert_eq!(failures[0]["retryable"], true);

    assert_eq!(posted_bodies(&server, "/robot/send").await.len(), 1);
    let wechat = posted_bodies(&server, "/message/send").await;
    assert_eq!(wechat.len(), 1);
    assert_eq!(wechat[0]["touser"], "@all");
    assert_eq!(wechat[0]["msgtype"], "text");
}

#[tokio::test]
async fn chart_failure_still_delivers_without_image() {
    let server = dingtalk_stub(1).await;
    let (enricher, metrics, store) = fake_enricher(true);
    let ctx = build_test_context_with_enricher(&dingtalk_config(&server.uri()), enricher).unwrap();

    let (status, body, _) = send_raw(&ctx.app, "POST", "/ops/send", FIRING_PAYLOAD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let posts = posted_bodies(&server, "/robot/send").await;
    assert!(!posts[0]["markdown"]["text"].as_str().unwrap().contains("!["));
    assert_eq!(metrics.queries.load(Ordering::SeqCst), 1);
    assert_eq!(store.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chart_failure_aborts_when_configured() {
    let server = dingtalk_stub(0).await;
    let (enricher, _, _) = fake_enricher(true);
    let config = dingtalk_config(&server.uri()).replace(
        "dingtalk_api_token = \"dt-token\"",
        "dingtalk_api_token = \"dt-token\"\nabort_on_enrich_error = true",
    );
    let ctx = build_test_context_with_enricher(&config, enricher).unwrap();

    let (status, body) = request_json(&ctx.app, "POST", "/ops/send", Some(FIRING_PAYLOAD)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["err_msg"].as_str().unwrap().contains("metrics backend unavailable"));
}

#[tokio::test]
async fn envelope_carries_the_response_trace_id() {
    let server = dingtalk_stub(0).await;
    let ctx = build_test_context(&dingtalk_config(&server.uri())).unwrap();

    let (_, body, header) = send_raw(&ctx.app, "POST", "/nobody/send", FIRING_PAYLOAD).await;
    let body: Value = serde_json::from_str(&body).unwrap();
    let header = header.expect("X-Trace-Id should be set");
    assert_eq!(header.len(), 16);
    assert_eq!(body["trace_id"], header.as_str());
}

fn payload_with_description(len: usize) -> String {
    let mut data: Value = serde_json::from_str(FIRING_PAYLOAD).unwrap();
    data["alerts"][0]["annotations"] = json!({"description": "x".repeat(len)});
    data.to_string()
}

#[tokio::test]
async fn payload_above_axum_default_limit_is_accepted() {
    let server = dingtalk_stub(1).await;
    let ctx = build_test_context(&dingtalk_config(&server.uri())).unwrap();

    let payload = payload_with_description(3 * 1024 * 1024);
    let (status, body, _) = send_raw(&ctx.app, "POST", "/ops/send", &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn oversized_payload_gets_413_envelope() {
    let server = dingtalk_stub(0).await;
    let ctx = build_test_context(&dingtalk_config(&server.uri())).unwrap();

    let payload = payload_with_description(MAX_REQUEST_BODY + 1);
    let (status, body, header) = send_raw(&ctx.app, "POST", "/ops/send", &payload).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["err_code"], 1413);
    assert!(body["err_msg"].as_str().unwrap().contains("failed to read request body"));
    assert_eq!(body["trace_id"], header.expect("X-Trace-Id should be set").as_str());
    assert!(posted_bodies(&server, "/robot/send").await.is_empty());
}
