/// Integration tests: the auth service against an in-process REST server.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chatline_client::{AuthError, AuthService};
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn login(Json(body): Json<Value>) -> impl IntoResponse {
    match (body["username"].as_str(), body["password"].as_str()) {
        (Some("alice"), Some("correct horse")) => (
            StatusCode::OK,
            Json(json!({"access_token": "jwt-alice", "user": {"id": 12, "username": "alice"}})),
        )
            .into_response(),
        (Some("tokenless"), _) => (StatusCode::OK, Json(json!({"user": {"id": 3}}))).into_response(),
        (Some("nameless"), _) => {
            (StatusCode::OK, Json(json!({"access_token": "jwt-anon"}))).into_response()
        }
        (Some("teapot"), _) => StatusCode::IM_A_TEAPOT.into_response(),
        (Some(_), Some(_)) => StatusCode::UNAUTHORIZED.into_response(),
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn register(Json(body): Json<Value>) -> impl IntoResponse {
    match body["username"].as_str() {
        Some("alice") => StatusCode::CONFLICT.into_response(),
        Some("empty") => StatusCode::OK.into_response(),
        Some(name) => (
            StatusCode::CREATED,
            Json(json!({"access_token": format!("jwt-{}", name), "user": {"id": 99, "username": name}})),
        )
            .into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn auth_server() -> AuthService {
    let router = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register));
    AuthService::new(&serve(router).await).unwrap()
}

#[tokio::test]
async fn login_returns_account() {
    let auth = auth_server().await;
    let account = auth.login("alice", "correct horse").await.unwrap();
    assert_eq!(account.token, "jwt-alice");
    assert_eq!(account.user_id, 12);
    assert_eq!(account.username, "alice");
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let auth = auth_server().await;
    let err = auth.login("alice", "wrong").await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
    assert_eq!(err.to_string(), "invalid credentials");
}

#[tokio::test]
async fn other_statuses_are_server_errors() {
    let auth = auth_server().await;
    let err = auth.login("teapot", "x").await.unwrap_err();
    assert_eq!(err.to_string(), "server error: 418");
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let auth = auth_server().await;
    assert!(matches!(
        auth.login("tokenless", "x").await,
        Err(AuthError::MissingToken)
    ));
}

#[tokio::test]
async fn missing_user_falls_back_to_submitted_name() {
    let auth = auth_server().await;
    let account = auth.login("  nameless ", "x").await.unwrap();
    assert_eq!(account.username, "nameless");
    assert_eq!(account.user_id, 0);
}

#[tokio::test]
async fn register_conflict_and_success() {
    let auth = auth_server().await;

    let err = auth.register("alice", "pw").await.unwrap_err();
    assert_eq!(err.to_string(), "username already exists");

    let account = auth.register("bob", "pw").await.unwrap();
    assert_eq!(account.token, "jwt-bob");
    assert_eq!(account.user_id, 99);
}

#[tokio::test]
async fn empty_body_is_an_error() {
    let auth = auth_server().await;
    assert!(matches!(
        auth.register("empty", "pw").await,
        Err(AuthError::EmptyBody)
    ));
}
