mod common;

use push_gateway::session::ClientHandle;
use serde_json::json;

// ============================================================================
// valid_socket_authentication
// ============================================================================

#[tokio::test]
async fn valid_socket_authentication() {
    let backend = common::spawn_backend(vec![(
        "lol_test_auth_token",
        json!({ "uid": 666, "channels": [] }),
    )])
    .await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("sid-1");
    state.sessions.connect(client.clone()).await;
    state
        .sessions
        .authenticate("sid-1", common::auth_request("lol_test_auth_token", Some(1)))
        .await;

    assert!(state.sessions.is_authenticated("sid-1").await);

    let sent = client.sent();
    let ack = sent
        .iter()
        .find(|m| m.get("ackId").is_some())
        .expect("ack delivered");
    assert_eq!(ack["result"], "success");

    let callback = sent
        .iter()
        .find(|m| m["callback"] == "clientAuthenticated")
        .expect("clientAuthenticated callback");
    assert_eq!(callback["data"]["uid"], 666);

    let (_, body) = common::get_with_key(app, "/nodejs/health/check").await;
    assert_eq!(body["sockets"], 1);
    assert_eq!(body["authIdentities"], 1);
    assert_eq!(body["onlineUsers"], 1);
}

// ============================================================================
// invalid_socket_authentication
// ============================================================================

#[tokio::test]
async fn invalid_socket_authentication() {
    // The stub knows no tokens, so it answers nodejsValidAuthToken: false.
    let backend = common::spawn_backend(vec![]).await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("sid-1");
    state.sessions.connect(client.clone()).await;
    state
        .sessions
        .authenticate("sid-1", common::auth_request("lol_test_auth_token", Some(1)))
        .await;

    assert!(client.is_closed());
    assert!(!state.sessions.is_authenticated("sid-1").await);
    // The ack callback is never invoked on a failed authentication.
    assert!(client.sent().is_empty());

    let (_, body) = common::get_with_key(app, "/nodejs/health/check").await;
    assert_eq!(body["sockets"], 0);
}

// ============================================================================
// presence_notifications
// ============================================================================

#[tokio::test]
async fn presence_online_and_offline_reach_observers() {
    let backend = common::spawn_backend(vec![
        ("tok_observer", json!({ "uid": 9, "channels": [] })),
        (
            "tok_user",
            json!({ "uid": 7, "channels": [], "presenceUids": [9] }),
        ),
    ])
    .await;
    let state = common::test_state(Some(backend.url.clone()));

    let observer = common::RecordingClient::new("obs");
    state.sessions.connect(observer.clone()).await;
    state
        .sessions
        .authenticate("obs", common::auth_request("tok_observer", None))
        .await;

    let user = common::RecordingClient::new("usr");
    state.sessions.connect(user.clone()).await;
    state
        .sessions
        .authenticate("usr", common::auth_request("tok_user", None))
        .await;

    let online = observer
        .sent()
        .into_iter()
        .find(|m| m.get("presenceNotification").is_some())
        .expect("online notification");
    assert_eq!(online["presenceNotification"]["uid"], 7);
    assert_eq!(online["presenceNotification"]["event"], "online");

    state.sessions.disconnect("usr").await;
    common::outlive_grace().await;

    let events: Vec<_> = observer
        .sent()
        .into_iter()
        .filter(|m| m.get("presenceNotification").is_some())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["presenceNotification"]["event"], "offline");
    assert!(!state.sessions.is_online(7).await);

    // The backend heard about both transitions.
    assert_eq!(backend.messages_of_type("userOnline").len(), 2);
    let offline = backend.messages_of_type("userOffline");
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0]["uid"], 7);
}

#[tokio::test]
async fn reconnect_inside_grace_window_suppresses_offline() {
    let backend = common::spawn_backend(vec![(
        "tok_user",
        json!({ "uid": 7, "channels": [], "presenceUids": [9] }),
    )])
    .await;
    let state = common::test_state(Some(backend.url.clone()));

    let first = common::RecordingClient::new("s1");
    state.sessions.connect(first).await;
    state
        .sessions
        .authenticate("s1", common::auth_request("tok_user", None))
        .await;
    assert!(state.sessions.is_online(7).await);

    state.sessions.disconnect("s1").await;
    // Inside the grace window the user is still online and the timer armed.
    assert!(state.sessions.is_online(7).await);
    assert!(state.sessions.presence_timer_armed(7).await);

    // Browser refresh: a new socket re-authenticates with the cached token.
    let second = common::RecordingClient::new("s2");
    state.sessions.connect(second).await;
    state
        .sessions
        .authenticate("s2", common::auth_request("tok_user", None))
        .await;
    assert!(!state.sessions.presence_timer_armed(7).await);

    common::outlive_grace().await;
    assert!(state.sessions.is_online(7).await);
    assert!(backend.messages_of_type("userOffline").is_empty());
    // Only the first connect marked the user online.
    assert_eq!(backend.messages_of_type("userOnline").len(), 1);
}

#[tokio::test]
async fn presence_list_can_be_replaced_while_online() {
    let backend = common::spawn_backend(vec![(
        "tok_user",
        json!({ "uid": 7, "channels": [] }),
    )])
    .await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("s1");
    state.sessions.connect(client).await;
    state
        .sessions
        .authenticate("s1", common::auth_request("tok_user", None))
        .await;

    let (_, body) = common::get_with_key(app, "/nodejs/user/presence-list/7/8,9").await;
    assert_eq!(body["status"], "success");
}

// ============================================================================
// channel_membership_admin_flows
// ============================================================================

#[tokio::test]
async fn add_user_to_channel_then_publish() {
    let backend = common::spawn_backend(vec![(
        "tok_user",
        json!({ "uid": 666, "channels": [] }),
    )])
    .await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("s1");
    state.sessions.connect(client.clone()).await;
    state
        .sessions
        .authenticate("s1", common::auth_request("tok_user", None))
        .await;

    let (_, body) =
        common::post_with_key(app.clone(), "/nodejs/user/channel/add/news/666").await;
    assert_eq!(body["status"], "success");

    let (_, body) = common::post_json_with_key(
        app.clone(),
        "/nodejs/publish",
        json!({ "channel": "news", "body": "breaking" }),
    )
    .await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["sent"], 1);
    assert!(client.sent().iter().any(|m| m["body"] == "breaking"));

    // Idempotence: a second add leaves a single membership.
    let (_, body) =
        common::post_with_key(app.clone(), "/nodejs/user/channel/add/news/666").await;
    assert_eq!(body["status"], "success");
    let (_, body) = common::post_json_with_key(
        app.clone(),
        "/nodejs/publish",
        json!({ "channel": "news", "body": "again" }),
    )
    .await;
    assert_eq!(body["sent"], 1);

    let (_, body) =
        common::post_with_key(app.clone(), "/nodejs/user/channel/remove/news/666").await;
    assert_eq!(body["status"], "success");

    let (_, body) = common::post_json_with_key(
        app,
        "/nodejs/publish",
        json!({ "channel": "news", "body": "silence" }),
    )
    .await;
    assert_eq!(body["sent"], 0);
}

#[tokio::test]
async fn auth_token_channel_membership() {
    let backend = common::spawn_backend(vec![("tok_anon", json!({ "uid": 0, "channels": [] }))]).await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("s1");
    state.sessions.connect(client.clone()).await;
    state
        .sessions
        .authenticate("s1", common::auth_request("tok_anon", None))
        .await;

    let (_, body) = common::post_with_key(
        app.clone(),
        "/nodejs/authtoken/channel/add/lobby/tok_anon",
    )
    .await;
    assert_eq!(body["status"], "success");

    let (_, body) = common::post_json_with_key(
        app.clone(),
        "/nodejs/publish",
        json!({ "channel": "lobby", "body": "hello" }),
    )
    .await;
    assert_eq!(body["sent"], 1);

    let (_, body) = common::post_with_key(
        app.clone(),
        "/nodejs/authtoken/channel/remove/lobby/tok_anon",
    )
    .await;
    assert_eq!(body["status"], "success");

    let (_, body) = common::post_json_with_key(
        app,
        "/nodejs/publish",
        json!({ "channel": "lobby", "body": "gone" }),
    )
    .await;
    assert_eq!(body["sent"], 0);
}

#[tokio::test]
async fn backend_granted_channels_are_joined_on_connect() {
    let backend = common::spawn_backend(vec![(
        "tok_user",
        json!({ "uid": 666, "channels": ["news", "alerts"] }),
    )])
    .await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("s1");
    state.sessions.connect(client.clone()).await;
    state
        .sessions
        .authenticate("s1", common::auth_request("tok_user", None))
        .await;

    for channel in ["news", "alerts"] {
        let (_, body) = common::post_json_with_key(
            app.clone(),
            "/nodejs/publish",
            json!({ "channel": channel, "body": "ping" }),
        )
        .await;
        assert_eq!(body["sent"], 1, "channel {channel} should deliver");
    }
}

// ============================================================================
// kick_and_logout
// ============================================================================

#[tokio::test]
async fn kick_user_closes_sockets_and_purges_identity() {
    let backend = common::spawn_backend(vec![(
        "tok_user",
        json!({ "uid": 666, "channels": ["news"] }),
    )])
    .await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("s1");
    state.sessions.connect(client.clone()).await;
    state
        .sessions
        .authenticate("s1", common::auth_request("tok_user", None))
        .await;

    let (_, body) = common::post_with_key(app.clone(), "/nodejs/user/kick/666").await;
    assert_eq!(body["status"], "success");
    assert!(client.is_closed());

    let (_, body) = common::get_with_key(app.clone(), "/nodejs/health/check").await;
    assert_eq!(body["sockets"], 0);
    assert_eq!(body["authIdentities"], 0);

    // The channel the backend granted no longer delivers to anyone.
    let (_, body) = common::post_json_with_key(
        app,
        "/nodejs/publish",
        json!({ "channel": "news", "body": "x" }),
    )
    .await;
    assert_eq!(body["sent"], 0);
}

#[tokio::test]
async fn logout_user_disconnects_by_token() {
    let backend = common::spawn_backend(vec![(
        "tok_user",
        json!({ "uid": 666, "channels": [] }),
    )])
    .await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let client = common::RecordingClient::new("s1");
    state.sessions.connect(client.clone()).await;
    state
        .sessions
        .authenticate("s1", common::auth_request("tok_user", None))
        .await;

    let (_, body) = common::post_with_key(app.clone(), "/nodejs/user/logout/tok_user").await;
    assert_eq!(body["status"], "success");
    assert!(client.is_closed());

    let (_, body) = common::get_with_key(app, "/nodejs/health/check").await;
    assert_eq!(body["sockets"], 0);
    assert_eq!(body["authIdentities"], 0);
}

// ============================================================================
// broadcast
// ============================================================================

#[tokio::test]
async fn broadcast_reaches_every_authenticated_socket() {
    let backend = common::spawn_backend(vec![
        ("tok_a", json!({ "uid": 1, "channels": [] })),
        ("tok_b", json!({ "uid": 2, "channels": [] })),
    ])
    .await;
    let state = common::test_state(Some(backend.url.clone()));
    let app = common::create_test_app(state.clone());

    let a = common::RecordingClient::new("s1");
    let b = common::RecordingClient::new("s2");
    for (client, token) in [(a.clone(), "tok_a"), (b.clone(), "tok_b")] {
        let id = client.id().to_owned();
        state.sessions.connect(client).await;
        state
            .sessions
            .authenticate(&id, common::auth_request(token, None))
            .await;
    }

    // A socket still in pre-auth is not reached by broadcasts.
    let pending = common::RecordingClient::new("s3");
    state.sessions.connect(pending.clone()).await;

    let (_, body) = common::post_json_with_key(
        app,
        "/nodejs/publish",
        json!({ "broadcast": true, "body": "all hands" }),
    )
    .await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["sent"], 2);
    assert!(a.sent().iter().any(|m| m["body"] == "all hands"));
    assert!(b.sent().iter().any(|m| m["body"] == "all hands"));
    assert!(pending.sent().is_empty());
}
