use reviewdb::{
    AppConfig, AppState, InMemoryRepository, MockMailer, create_router,
    mailer::MailerState,
    models::{NewUser, Role},
    repository::{Repository, RepositoryState},
};
use std::sync::Arc;
use tokio::net::TcpListener;

struct TestApp {
    address: String,
    repo: Arc<InMemoryRepository>,
    mailer: Arc<MockMailer>,
    config: AppConfig,
}

async fn spawn_app(mailer: MockMailer) -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let mailer = Arc::new(mailer);
    let config = AppConfig::default();

    let state = AppState {
        repo: repo.clone() as RepositoryState,
        mailer: mailer.clone() as MailerState,
        config: config.clone(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        repo,
        mailer,
        config,
    }
}

/// The code is the last word of the first line of the mail body.
fn code_from(mail_body: &str) -> String {
    mail_body
        .lines()
        .next()
        .and_then(|line| line.rsplit(' ').next())
        .expect("mail body should carry a code")
        .to_string()
}

#[tokio::test]
async fn requesting_a_code_creates_the_account_and_mails_the_code() {
    let app = spawn_app(MockMailer::new()).await;
    let client = reqwest::Client::new();

    // Mixed-case input is canonicalized before anything else happens.
    let response = client
        .post(format!("{}/auth/email", app.address))
        .json(&serde_json::json!({ "email": "Reader@Example.COM" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["email"], "reader@example.com");

    let user = app
        .repo
        .get_user_by_email("reader@example.com")
        .await
        .unwrap()
        .expect("account should have been created");
    assert_eq!(user.username, "reader");
    assert_eq!(user.role, Role::User);

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "reader@example.com");
    assert_eq!(
        user.confirmation_code.as_deref(),
        Some(code_from(&sent[0].body).as_str())
    );
}

#[tokio::test]
async fn colliding_usernames_get_a_suffix() {
    let app = spawn_app(MockMailer::new()).await;
    app.repo
        .create_user(NewUser {
            username: "reader".to_string(),
            email: "reader@elsewhere.org".to_string(),
            role: Role::User,
            ..Default::default()
        })
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/auth/email", app.address))
        .json(&serde_json::json!({ "email": "reader@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let user = app
        .repo
        .get_user_by_email("reader@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.username, "reader2");
}

#[tokio::test]
async fn reissuing_invalidates_the_previous_code() {
    let app = spawn_app(MockMailer::new()).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        client
            .post(format!("{}/auth/email", app.address))
            .json(&serde_json::json!({ "email": "reader@example.com" }))
            .send()
            .await
            .unwrap();
    }

    // Repeated requests reuse the one account rather than minting
    // reader2, reader22, ...
    assert_eq!(app.repo.list_users(None).await.unwrap().len(), 1);

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 2);
    let old_code = code_from(&sent[0].body);
    let new_code = code_from(&sent[1].body);
    assert_ne!(old_code, new_code);

    // The overwritten code no longer exchanges.
    let stale: serde_json::Value = client
        .post(format!("{}/auth/token", app.address))
        .json(&serde_json::json!({
            "email": "reader@example.com",
            "confirmation_code": old_code,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stale.get("error").is_some());
    assert!(stale.get("token").is_none());

    let fresh: serde_json::Value = client
        .post(format!("{}/auth/token", app.address))
        .json(&serde_json::json!({
            "email": "reader@example.com",
            "confirmation_code": new_code,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(fresh.get("token").is_some());
}

#[tokio::test]
async fn wrong_code_answers_200_with_an_explicit_error() {
    let app = spawn_app(MockMailer::new()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/auth/email", app.address))
        .json(&serde_json::json!({ "email": "reader@example.com" }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/auth/token", app.address))
        .json(&serde_json::json!({
            "email": "reader@example.com",
            "confirmation_code": "definitely-wrong",
        }))
        .send()
        .await
        .unwrap();
    // Invalid credentials are a *result*, not a transport failure.
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body.get("error").is_some());
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn malformed_email_is_a_400() {
    let app = spawn_app(MockMailer::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/email", app.address))
        .json(&serde_json::json!({ "email": "not-an-address" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn mail_transport_failure_does_not_lose_the_code() {
    let app = spawn_app(MockMailer::failing()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/email", app.address))
        .json(&serde_json::json!({ "email": "reader@example.com" }))
        .send()
        .await
        .unwrap();
    // Persist-then-send: the flow reports success and the code survives.
    assert_eq!(response.status(), 200);

    let user = app
        .repo
        .get_user_by_email("reader@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.confirmation_code.is_some());
}

#[tokio::test]
async fn exchanged_token_grants_access_and_the_code_survives() {
    let app = spawn_app(MockMailer::new()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/auth/email", app.address))
        .json(&serde_json::json!({ "email": "reader@example.com" }))
        .send()
        .await
        .unwrap();
    let code = code_from(&app.mailer.sent()[0].body);

    let exchange = |code: String| {
        let client = client.clone();
        let address = app.address.clone();
        async move {
            let body: serde_json::Value = client
                .post(format!("{address}/auth/token"))
                .json(&serde_json::json!({
                    "email": "reader@example.com",
                    "confirmation_code": code,
                }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            body["token"].as_str().expect("token expected").to_string()
        }
    };

    let token = exchange(code.clone()).await;

    let me = client
        .get(format!("{}/me", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), 200);
    let profile: serde_json::Value = me.json().await.unwrap();
    assert_eq!(profile["username"], "reader");
    // The hidden credential never leaks through a response.
    assert!(profile.get("confirmation_code").is_none());

    // The code is not consumed by a successful exchange; only reissuing
    // replaces it.
    exchange(code).await;
}

#[tokio::test]
async fn garbage_bearer_tokens_are_rejected() {
    let app = spawn_app(MockMailer::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/me", app.address))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let missing = client
        .get(format!("{}/me", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    // A structurally valid token signed with the right key but pointing at
    // a deleted user is also rejected.
    let ghost = reviewdb::auth::issue_token(uuid::Uuid::new_v4(), &app.config.jwt_secret).unwrap();
    let response = client
        .get(format!("{}/me", app.address))
        .bearer_auth(ghost)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}
