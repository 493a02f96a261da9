use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::api::test_support::{send, signup, test_app, test_state};

#[tokio::test]
async fn test_signup_returns_token_and_profile() {
    let (state, _) = test_state();
    let app = test_app(&state);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({"username": "alice", "email": "alice@example.com", "password": "secret1"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user"]["username"], "alice");
    assert!(body["data"]["user"].get("password_hash").is_none());
    assert!(body["data"]["token"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_signup_conflict_and_validation() {
    let (state, _) = test_state();
    let app = test_app(&state);
    signup(&app, "bob").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({"username": "bob", "email": "other@example.com", "password": "secret1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({"username": "carl", "email": "carl@example.com", "password": "123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({"username": "carl"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_login_with_username_or_email() {
    let (state, _) = test_state();
    let app = test_app(&state);
    signup(&app, "dana").await;

    for login in ["dana", "dana@example.com"] {
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": login, "password": "secret1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["username"], "dana");
    }

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": "dana", "password": "wrong-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_me_requires_valid_token() {
    let (state, _) = test_state();
    let app = test_app(&state);
    let token = signup(&app, "erin").await;

    let (status, body) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "erin@example.com");

    let (status, _) = send(&app, Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::GET, "/api/auth/me", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signed with another secret
    let forged = crate::api::auth::JwtKeys::new("other-secret")
        .issue(uuid::Uuid::new_v4(), "mallory")
        .unwrap();
    let (status, _) = send(&app, Method::GET, "/api/auth/me", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_for_unknown_user_is_rejected() {
    let (state, _) = test_state();
    let app = test_app(&state);
    let token = state.jwt().issue(uuid::Uuid::new_v4(), "ghost").unwrap();

    let (status, _) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password() {
    let (state, _) = test_state();
    let app = test_app(&state);
    let token = signup(&app, "fred").await;

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/auth/password",
        Some(&token),
        Some(json!({"current_password": "wrong1", "new_password": "secret2"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/auth/password",
        Some(&token),
        Some(json!({"current_password": "secret1", "new_password": "secret2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": "fred", "password": "secret2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
