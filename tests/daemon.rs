mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use agent_relay::domains::address::Id;
use agent_relay::domains::envelope::Envelope;
use agent_relay::providers::memory::InMemoryBroker;

use common::{call, parse_json, router, FlakyBroker};

async fn register_client(app: &axum::Router) -> (String, String) {
    let (status, body) = call(app, "POST", "/clients", None).await;
    assert_eq!(status, StatusCode::OK);
    let value = parse_json(&body);
    let id = value["id"].as_str().unwrap().to_string();
    let url = value["url"].as_str().unwrap().to_string();
    assert_eq!(url, format!("/clients/{id}"));
    (id, url)
}

async fn register_agent(app: &axum::Router) -> String {
    let (status, body) = call(app, "POST", "/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    parse_json(&body)["url"].as_str().unwrap().to_string()
}

fn envelope_body(from: &str, to: &str, payload: &[u8]) -> Option<String> {
    Some(serde_json::to_string(&Envelope::new(from, to, payload)).unwrap())
}

#[tokio::test]
async fn health_and_auth() {
    let app = router(Arc::new(InMemoryBroker::new()));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for (method, uri) in [("POST", "/agents"), ("POST", "/clients"), ("GET", "/agents/requests")] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/clients")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agent_poll_without_requests_is_empty() {
    let app = router(Arc::new(InMemoryBroker::new()));
    let url = register_agent(&app).await;
    assert_eq!(url, "/agents/requests");

    let (status, body) = call(&app, "GET", &url, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let (status, _) = call(&app, "GET", "/agents/other", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_reaches_agent_and_reply_reaches_client() {
    let broker = Arc::new(InMemoryBroker::new());
    let app = router(broker.clone());
    let agent_url = register_agent(&app).await;
    let (client_id, client_url) = register_client(&app).await;
    assert!(broker.has_topic(&format!("t{client_id}")).await);
    assert!(broker.has_subscription(&format!("s{client_id}")).await);

    let (status, _) = call(&app, "POST", &client_url, envelope_body("", "", b"sign this")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = call(&app, "GET", &agent_url, None).await;
    assert_eq!(status, StatusCode::OK);
    let request: Envelope = serde_json::from_slice(&body).unwrap();
    assert_eq!(request.from, client_id);
    assert_eq!(request.to, "");
    assert_eq!(request.payload().unwrap(), b"sign this");

    let (status, _) = call(&app, "GET", &client_url, None).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    let responder = Id::generate().unwrap().to_string();
    let (status, _) = call(
        &app,
        "POST",
        &format!("/agents/{client_id}"),
        envelope_body(&responder, &client_id, b"signed"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", &client_url, None).await;
    assert_eq!(status, StatusCode::OK);
    let reply: Envelope = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.from, responder);
    assert_eq!(reply.to, client_id);
    assert_eq!(reply.payload().unwrap(), b"signed");
}

#[tokio::test]
async fn request_returns_reply_within_the_poll_window() {
    let broker = Arc::new(InMemoryBroker::new());
    let app = router(broker);
    let agent_url = register_agent(&app).await;
    let (client_id, client_url) = register_client(&app).await;

    let agent = {
        let app = app.clone();
        tokio::spawn(async move {
            loop {
                let (status, body) = call(&app, "GET", &agent_url, None).await;
                if status == StatusCode::OK {
                    let request: Envelope = serde_json::from_slice(&body).unwrap();
                    let reply = envelope_body("", "", &request.payload().unwrap());
                    let (status, _) =
                        call(&app, "POST", &format!("/agents/{}", request.from), reply).await;
                    assert_eq!(status, StatusCode::OK);
                    return;
                }
            }
        })
    };

    let mut replies = Vec::new();
    let (status, body) = call(&app, "POST", &client_url, envelope_body(&client_id, "", b"echo")).await;
    if status == StatusCode::OK {
        replies.push(body);
    } else {
        assert_eq!(status, StatusCode::ACCEPTED);
        loop {
            let (status, body) = call(&app, "GET", &client_url, None).await;
            if status == StatusCode::OK {
                replies.push(body);
                break;
            }
            assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        }
    }
    agent.await.unwrap();

    let reply: Envelope = serde_json::from_slice(&replies[0]).unwrap();
    assert_eq!(reply.from, "");
    assert_eq!(reply.payload().unwrap(), b"echo");
}

#[tokio::test]
async fn malformed_input_is_a_bad_request() {
    let app = router(Arc::new(InMemoryBroker::new()));
    register_agent(&app).await;
    let (client_id, client_url) = register_client(&app).await;

    let cases = [
        ("POST", "/clients/xyz".to_string(), envelope_body("", "", b"x")),
        ("GET", "/clients/ab".to_string(), None),
        ("POST", client_url.clone(), Some(json!({"data": "!!!"}).to_string())),
        ("POST", client_url.clone(), envelope_body("", "abc", b"x")),
        ("POST", client_url.clone(), Some("{not json".to_string())),
        ("POST", "/agents/nothex".to_string(), envelope_body("", "", b"x")),
        (
            "POST",
            format!("/agents/{client_id}"),
            envelope_body("", "deadbeef", b"x"),
        ),
        (
            "POST",
            format!("/agents/{client_id}"),
            Some(json!({"data": "%%"}).to_string()),
        ),
    ];
    for (method, uri, body) in cases {
        let (status, text) = call(&app, method, &uri, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri}");
        assert!(!text.is_empty());
    }
}

#[tokio::test]
async fn deregister_removes_client_queues() {
    let broker = Arc::new(InMemoryBroker::new());
    let app = router(broker.clone());
    let (client_id, client_url) = register_client(&app).await;

    let (status, _) = call(&app, "DELETE", &client_url, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!broker.has_topic(&format!("t{client_id}")).await);
    assert!(!broker.has_subscription(&format!("s{client_id}")).await);

    let (status, _) = call(&app, "DELETE", &client_url, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deregister_reports_every_failure() {
    let broker = Arc::new(FlakyBroker {
        fail_deletes: true,
        ..FlakyBroker::default()
    });
    let app = router(broker.clone());
    let (_, client_url) = register_client(&app).await;

    let (status, body) = call(&app, "DELETE", &client_url, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("subscription store offline"), "{text}");
    assert!(text.contains("topic store offline"), "{text}");
    assert_eq!(broker.subscription_deletes.load(Ordering::SeqCst), 1);
    assert_eq!(broker.topic_deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broker_failures_are_server_errors() {
    let broker = Arc::new(FlakyBroker {
        fail_publish: true,
        ..FlakyBroker::default()
    });
    let app = router(broker);
    let (client_id, client_url) = register_client(&app).await;

    let (status, body) = call(&app, "POST", &client_url, envelope_body("", "", b"x")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8(body).unwrap().contains("broker unavailable"));

    let (status, _) = call(
        &app,
        "POST",
        &format!("/agents/{client_id}"),
        envelope_body("", "", b"x"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn shutdown_releases_long_polls() {
    let broker = Arc::new(InMemoryBroker::new());
    let state = agent_relay::daemon::AppState::new(
        broker,
        agent_relay::config::RelaySettings::default(),
        common::TOKEN,
    );
    let shutdown = state.shutdown.clone();
    let app = agent_relay::daemon::build_router(state);
    let agent_url = register_agent(&app).await;

    let poll = {
        let app = app.clone();
        tokio::spawn(async move { call(&app, "GET", &agent_url, None).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown.cancel();

    let (status, _) = tokio::time::timeout(std::time::Duration::from_secs(5), poll)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn concurrent_registrations_get_distinct_queues() {
    let broker = Arc::new(InMemoryBroker::new());
    let app = router(broker.clone());

    let (first, second) = tokio::join!(register_client(&app), register_client(&app));
    assert_ne!(first.0, second.0);
    for (id, _) in [&first, &second] {
        assert!(broker.has_topic(&format!("t{id}")).await);
        assert!(broker.has_subscription(&format!("s{id}")).await);
    }
    assert_ne!(format!("t{}", first.0), format!("t{}", second.0));
    assert_ne!(format!("s{}", first.0), format!("s{}", second.0));
}

#[tokio::test]
async fn requests_from_unknown_clients_are_not_published() {
    let broker = Arc::new(InMemoryBroker::new());
    let app = router(broker.clone());
    register_agent(&app).await;

    let (status, body) = call(
        &app,
        "POST",
        "/clients/deadbeefdeadbeef",
        envelope_body("", "", b"x"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8(body).unwrap().contains("unknown client"));
    assert_eq!(broker.pending("requests").await, Some(0));

    let (client_id, client_url) = register_client(&app).await;
    call(&app, "DELETE", &client_url, None).await;
    let (status, _) = call(&app, "POST", &client_url, envelope_body("", "", b"x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{client_id}");
    assert_eq!(broker.pending("requests").await, Some(0));
}
