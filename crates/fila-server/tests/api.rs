mod common;

use common::{TestServer, create_session, join};

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_session_returns_credentials() {
    let server = TestServer::start().await;
    let driver = server.driver();

    let resp = driver
        .post_json(
            "/api/queue/create",
            None,
            &serde_json::json!({
                "eventName": "  Friday tasting  ",
                "maxGuests": 10,
                "location": "Back patio",
                "openTime": "18:00",
                "closeTime": "22:30",
            }),
        )
        .await;
    assert_eq!(resp.status(), 200);

    // The host credential also lands in a cookie.
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(set_cookie.starts_with("queue_host_auth="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));

    let body: serde_json::Value = resp.json().await.unwrap();
    let code = body["code"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert_eq!(body["eventName"], "Friday tasting");
    assert_eq!(body["maxGuests"], 10);
    assert_eq!(body["location"], "Back patio");
    assert_eq!(body["openTime"], "18:00");
    assert_eq!(body["closeTime"], "22:30");
    assert_eq!(body["joinUrl"], format!("/queue/{code}"));
    assert!(body["hostAuthToken"].as_str().unwrap().contains('.'));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_validation_errors() {
    let server = TestServer::start().await;
    let driver = server.driver();

    for body in [
        serde_json::json!({"eventName": "", "maxGuests": 10}),
        serde_json::json!({"eventName": "ok", "maxGuests": 0}),
        serde_json::json!({"eventName": "ok", "maxGuests": 101}),
        serde_json::json!({"eventName": "ok", "maxGuests": 5, "openTime": "25:00"}),
        serde_json::json!({"eventName": "ok", "maxGuests": 5, "openTime": "20:00", "closeTime": "19:00"}),
    ] {
        let resp = driver.post_json("/api/queue/create", None, &body).await;
        assert_eq!(resp.status(), 400, "Body should be rejected: {body}");
        let err: serde_json::Value = resp.json().await.unwrap();
        assert!(err["error"].as_str().is_some_and(|s| !s.is_empty()));
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn join_and_guest_snapshot() {
    let server = TestServer::start().await;
    let driver = server.driver();
    let (code, _token) = create_session(&driver, 10).await;

    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/join"),
            None,
            &serde_json::json!({"name": "alice", "size": 2}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["position"], 1);
    assert_eq!(body["queueLength"], 1);
    assert_eq!(body["estimatedWaitMs"], 0);
    let party_id = body["partyId"].as_str().unwrap();

    let resp = driver
        .get(&format!("/api/queue/{code}/snapshot?partyId={party_id}"))
        .await;
    assert_eq!(resp.status(), 200);
    let view: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(view["type"], "position");
    assert_eq!(view["position"], 1);
    assert_eq!(view["aheadCount"], 0);

    // Unknown code and unknown party are 404s.
    let resp = driver
        .post_json(
            "/api/queue/ZZZZZZ/join",
            None,
            &serde_json::json!({"name": "bob"}),
        )
        .await;
    assert_eq!(resp.status(), 404);
    let resp = driver
        .get(&format!(
            "/api/queue/{code}/snapshot?partyId=AAAAAAAAAAAAAAAAAAAAAAAAAA"
        ))
        .await;
    assert_eq!(resp.status(), 404);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn snapshot_etag_revalidation() {
    let server = TestServer::start().await;
    let driver = server.driver();
    let (code, _token) = create_session(&driver, 10).await;

    let resp = driver.get(&format!("/api/queue/{code}/snapshot")).await;
    assert_eq!(resp.status(), 200);
    let etag = resp
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("ETag present")
        .to_string();

    // No intervening mutation: identical tag, 304 on revalidation.
    let resp = driver.get(&format!("/api/queue/{code}/snapshot")).await;
    assert_eq!(
        resp.headers().get("etag").and_then(|v| v.to_str().ok()),
        Some(etag.as_str())
    );
    let resp = driver
        .get_with_etag(&format!("/api/queue/{code}/snapshot"), &etag)
        .await;
    assert_eq!(resp.status(), 304);

    // Any mutation changes the tag.
    join(&driver, &code, "alice", 1).await;
    let resp = driver
        .get_with_etag(&format!("/api/queue/{code}/snapshot"), &etag)
        .await;
    assert_eq!(resp.status(), 200);
    assert_ne!(
        resp.headers().get("etag").and_then(|v| v.to_str().ok()),
        Some(etag.as_str())
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn host_ops_require_credentials() {
    let server = TestServer::start().await;
    let driver = server.driver();
    let (code, token) = create_session(&driver, 10).await;

    let resp = driver
        .post_json(&format!("/api/queue/{code}/advance"), None, &serde_json::json!({}))
        .await;
    assert_eq!(resp.status(), 401);

    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/advance"),
            Some("garbage-token"),
            &serde_json::json!({}),
        )
        .await;
    assert_eq!(resp.status(), 403);

    // A valid token for a different session is rejected too.
    let (_other_code, other_token) = create_session(&driver, 10).await;
    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/advance"),
            Some(&other_token),
            &serde_json::json!({}),
        )
        .await;
    assert_eq!(resp.status(), 403);

    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/advance"),
            Some(&token),
            &serde_json::json!({}),
        )
        .await;
    assert_eq!(resp.status(), 200);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn full_host_flow() {
    let server = TestServer::start().await;
    let driver = server.driver();
    let (code, token) = create_session(&driver, 10).await;

    let alice = join(&driver, &code, "alice", 2).await;
    let bob = join(&driver, &code, "bob", 1).await;
    let carol = join(&driver, &code, "carol", 1).await;

    // Call Alice.
    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/advance"),
            Some(&token),
            &serde_json::json!({}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["nowServing"]["id"].as_str(), Some(alice.as_str()));
    assert_eq!(body["nowServing"]["status"], "called");

    // Serve Alice, call Carol out of order.
    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/advance"),
            Some(&token),
            &serde_json::json!({"servedParty": alice, "nextParty": carol}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["nowServing"]["id"].as_str(), Some(carol.as_str()));

    // Kick Bob.
    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/kick"),
            Some(&token),
            &serde_json::json!({"partyId": bob}),
        )
        .await;
    assert_eq!(resp.status(), 200);

    let resp = driver.get(&format!("/api/queue/{code}/snapshot")).await;
    let view: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(view["type"], "queue_update");
    assert_eq!(view["queue"].as_array().unwrap().len(), 0);
    assert_eq!(view["nowServing"]["id"].as_str(), Some(carol.as_str()));
    assert!(view["callDeadline"].is_number());

    // Close twice; both succeed.
    for _ in 0..2 {
        let resp = driver
            .post_json(
                &format!("/api/queue/{code}/close"),
                Some(&token),
                &serde_json::json!({}),
            )
            .await;
        assert_eq!(resp.status(), 200);
    }

    // Joins after close conflict.
    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/join"),
            None,
            &serde_json::json!({"name": "dave"}),
        )
        .await;
    assert_eq!(resp.status(), 409);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn join_capacity_conflict() {
    let server = TestServer::start().await;
    let driver = server.driver();
    let (code, _token) = create_session(&driver, 2).await;

    join(&driver, &code, "alice", 2).await;

    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/join"),
            None,
            &serde_json::json!({"name": "bob", "size": 1}),
        )
        .await;
    assert_eq!(resp.status(), 409);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "Queue is at capacity");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn guest_leave_and_nearby() {
    let server = TestServer::start().await;
    let driver = server.driver();
    let (code, _token) = create_session(&driver, 10).await;
    let alice = join(&driver, &code, "alice", 1).await;

    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/declare-nearby"),
            None,
            &serde_json::json!({"partyId": alice}),
        )
        .await;
    assert_eq!(resp.status(), 200);

    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/leave"),
            None,
            &serde_json::json!({"partyId": alice}),
        )
        .await;
    assert_eq!(resp.status(), 200);

    // Gone now.
    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/leave"),
            None,
            &serde_json::json!({"partyId": alice}),
        )
        .await;
    assert_eq!(resp.status(), 404);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn healthz() {
    let server = TestServer::start().await;
    let driver = server.driver();

    let resp = driver.get("/healthz").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
