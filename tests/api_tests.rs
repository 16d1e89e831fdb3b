use reviewdb::{
    AppConfig, AppState, InMemoryRepository, MockMailer, create_router,
    auth::issue_token,
    mailer::MailerState,
    models::{NewUser, Role},
    repository::{Repository, RepositoryState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

struct TestApp {
    address: String,
    repo: Arc<InMemoryRepository>,
    config: AppConfig,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let config = AppConfig::default();

    let state = AppState {
        repo: repo.clone() as RepositoryState,
        mailer: Arc::new(MockMailer::new()) as MailerState,
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
        config,
    }
}

/// Seeds an account with the given role and mints a bearer token for it.
async fn seed_actor(app: &TestApp, username: &str, role: Role) -> (Uuid, String) {
    let user = app
        .repo
        .create_user(NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            role,
            ..Default::default()
        })
        .await
        .expect("seed actor");
    let token = issue_token(user.id, &app.config.jwt_secret).expect("mint token");
    (user.id, token)
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn anonymous_reads_pass_anonymous_writes_dont() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let listing = client
        .get(format!("{}/categories", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(listing.status(), 200);

    // No credentials at all: rejected by the extractor before any
    // permission predicate runs.
    let write = client
        .post(format!("{}/categories", app.address))
        .json(&serde_json::json!({ "name": "Books", "slug": "books" }))
        .send()
        .await
        .unwrap();
    assert_eq!(write.status(), 401);
}

#[tokio::test]
async fn plain_users_cannot_write_the_catalog() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = seed_actor(&app, "jane", Role::User).await;

    let response = client
        .post(format!("{}/categories", app.address))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "name": "Books", "slug": "books" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Moderators are not admins either.
    let (_, mod_token) = seed_actor(&app, "mod", Role::Moderator).await;
    let response = client
        .post(format!("{}/genres", app.address))
        .bearer_auth(&mod_token)
        .json(&serde_json::json!({ "name": "Drama", "slug": "drama" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn admin_catalog_lifecycle() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, admin) = seed_actor(&app, "boss", Role::Admin).await;

    // Category
    let response = client
        .post(format!("{}/categories", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Books", "slug": "books" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // Duplicate slug is a conflict, not a second row.
    let duplicate = client
        .post(format!("{}/categories", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Paper Books", "slug": "books" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 409);

    // Genre
    let response = client
        .post(format!("{}/genres", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Sci-Fi", "slug": "sci-fi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // Title, referencing both by slug.
    let response = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({
            "name": "Dune",
            "year": 1965,
            "category": "books",
            "genre": ["sci-fi"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let title: serde_json::Value = response.json().await.unwrap();
    assert_eq!(title["category"]["slug"], "books");
    assert_eq!(title["genre"][0]["slug"], "sci-fi");
    assert!(title["rating"].is_null());

    // Slug lookups work, unknown slugs are 404.
    let found = client
        .get(format!("{}/categories/books", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(found.status(), 200);
    let missing = client
        .get(format!("{}/categories/films", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn title_writes_validate_their_references_and_year() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, admin) = seed_actor(&app, "boss", Role::Admin).await;

    // Unknown category slug: the write fails, nothing is created silently.
    let response = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Dune", "category": "films" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // An empty genre list is malformed, distinct from an absent one.
    let response = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Dune", "genre": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Future years are rejected.
    let response = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Dune", "year": 3000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn review_lifecycle_with_aggregate_rating() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, admin) = seed_actor(&app, "boss", Role::Admin).await;
    let (_, jane) = seed_actor(&app, "jane", Role::User).await;
    let (_, john) = seed_actor(&app, "john", Role::User).await;

    let title: serde_json::Value = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Dune", "year": 1965 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let title_id = title["id"].as_str().unwrap().to_string();

    // First review.
    let response = client
        .post(format!("{}/titles/{}/reviews", app.address, title_id))
        .bearer_auth(&jane)
        .json(&serde_json::json!({ "text": "classic", "score": 8 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let review: serde_json::Value = response.json().await.unwrap();
    assert_eq!(review["author"], "jane");
    let review_id = review["id"].as_str().unwrap().to_string();

    // Same author, same title: conflict.
    let duplicate = client
        .post(format!("{}/titles/{}/reviews", app.address, title_id))
        .bearer_auth(&jane)
        .json(&serde_json::json!({ "text": "changed my mind", "score": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 409);

    // Second author; the rating becomes the mean.
    client
        .post(format!("{}/titles/{}/reviews", app.address, title_id))
        .bearer_auth(&john)
        .json(&serde_json::json!({ "text": "fine", "score": 6 }))
        .send()
        .await
        .unwrap();
    let rated: serde_json::Value = client
        .get(format!("{}/titles/{}", app.address, title_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rated["rating"].as_f64(), Some(7.0));

    // A stranger cannot edit jane's review, jane can.
    let forbidden = client
        .patch(format!(
            "{}/titles/{}/reviews/{}",
            app.address, title_id, review_id
        ))
        .bearer_auth(&john)
        .json(&serde_json::json!({ "score": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let own_edit = client
        .patch(format!(
            "{}/titles/{}/reviews/{}",
            app.address, title_id, review_id
        ))
        .bearer_auth(&jane)
        .json(&serde_json::json!({ "score": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(own_edit.status(), 200);
    let edited: serde_json::Value = own_edit.json().await.unwrap();
    assert_eq!(edited["score"], 10);
    // Untouched fields survive a partial update.
    assert_eq!(edited["text"], "classic");

    // Moderators can remove foreign reviews.
    let (_, moderator) = seed_actor(&app, "mod", Role::Moderator).await;
    let removed = client
        .delete(format!(
            "{}/titles/{}/reviews/{}",
            app.address, title_id, review_id
        ))
        .bearer_auth(&moderator)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);
}

#[tokio::test]
async fn omitted_review_score_defaults_to_ten() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, admin) = seed_actor(&app, "boss", Role::Admin).await;
    let (_, jane) = seed_actor(&app, "jane", Role::User).await;

    let title: serde_json::Value = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Dune" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let title_id = title["id"].as_str().unwrap().to_string();

    // No score in the payload at all.
    let response = client
        .post(format!("{}/titles/{}/reviews", app.address, title_id))
        .bearer_auth(&jane)
        .json(&serde_json::json!({ "text": "flawless" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let review: serde_json::Value = response.json().await.unwrap();
    assert_eq!(review["score"], 10);

    // The defaulted score feeds the aggregate like any other.
    let rated: serde_json::Value = client
        .get(format!("{}/titles/{}", app.address, title_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rated["rating"].as_f64(), Some(10.0));
}

#[tokio::test]
async fn comment_lifecycle_under_a_review() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, admin) = seed_actor(&app, "boss", Role::Admin).await;
    let (_, jane) = seed_actor(&app, "jane", Role::User).await;
    let (_, john) = seed_actor(&app, "john", Role::User).await;

    let title: serde_json::Value = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Dune" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let title_id = title["id"].as_str().unwrap().to_string();

    let review: serde_json::Value = client
        .post(format!("{}/titles/{}/reviews", app.address, title_id))
        .bearer_auth(&jane)
        .json(&serde_json::json!({ "text": "classic", "score": 8 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let review_id = review["id"].as_str().unwrap().to_string();
    let comments_url = format!(
        "{}/titles/{}/reviews/{}/comments",
        app.address, title_id, review_id
    );

    let response = client
        .post(&comments_url)
        .bearer_auth(&john)
        .json(&serde_json::json!({ "text": "agreed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let comment: serde_json::Value = response.json().await.unwrap();
    let comment_id = comment["id"].as_i64().unwrap();
    assert_eq!(comment["author"], "john");

    // Comments are publicly readable.
    let listing = client.get(&comments_url).send().await.unwrap();
    assert_eq!(listing.status(), 200);
    let listed: Vec<serde_json::Value> = listing.json().await.unwrap();
    assert_eq!(listed.len(), 1);

    // jane is the review's author, not the comment's: she may not delete it.
    let forbidden = client
        .delete(format!("{comments_url}/{comment_id}"))
        .bearer_auth(&jane)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let removed = client
        .delete(format!("{comments_url}/{comment_id}"))
        .bearer_auth(&john)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);

    // A comment under a review that was never on this title is unreachable.
    let wrong_parent = client
        .get(format!(
            "{}/titles/{}/reviews/{}/comments",
            app.address,
            Uuid::new_v4(),
            review_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_parent.status(), 404);
}

#[tokio::test]
async fn deleting_a_title_takes_the_review_tree_with_it() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, admin) = seed_actor(&app, "boss", Role::Admin).await;
    let (_, jane) = seed_actor(&app, "jane", Role::User).await;

    let title: serde_json::Value = client
        .post(format!("{}/titles", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "name": "Dune" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let title_id = title["id"].as_str().unwrap().to_string();

    client
        .post(format!("{}/titles/{}/reviews", app.address, title_id))
        .bearer_auth(&jane)
        .json(&serde_json::json!({ "text": "classic", "score": 8 }))
        .send()
        .await
        .unwrap();

    let removed = client
        .delete(format!("{}/titles/{}", app.address, title_id))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);

    let gone = client
        .get(format!("{}/titles/{}/reviews", app.address, title_id))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn user_administration_is_admin_only() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, admin) = seed_actor(&app, "boss", Role::Admin).await;
    let (_, jane) = seed_actor(&app, "jane", Role::User).await;

    // Plain users cannot even list.
    let forbidden = client
        .get(format!("{}/users", app.address))
        .bearer_auth(&jane)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    // Admins create with an explicit role; profile fields land in the same
    // insert and are already present on the creation response.
    let created = client
        .post(format!("{}/users", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({
            "username": "newmod",
            "email": "newmod@example.com",
            "role": "moderator",
            "first_name": "Ned",
            "bio": "keeps the peace",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let user: serde_json::Value = created.json().await.unwrap();
    assert_eq!(user["role"], "moderator");
    assert_eq!(user["first_name"], "Ned");
    assert_eq!(user["bio"], "keeps the peace");

    // Role changes go through the admin patch path.
    let promoted = client
        .patch(format!("{}/users/jane", app.address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "role": "moderator" }))
        .send()
        .await
        .unwrap();
    assert_eq!(promoted.status(), 200);
    let user: serde_json::Value = promoted.json().await.unwrap();
    assert_eq!(user["role"], "moderator");

    let removed = client
        .delete(format!("{}/users/newmod", app.address))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);
    let missing = client
        .get(format!("{}/users/newmod", app.address))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn self_service_profile_updates_cannot_escalate() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, jane) = seed_actor(&app, "jane", Role::User).await;

    // A role field in the payload is simply not part of the write view;
    // the update succeeds and the role stays put.
    let response = client
        .patch(format!("{}/me", app.address))
        .bearer_auth(&jane)
        .json(&serde_json::json!({ "bio": "reads a lot", "role": "admin" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let profile: serde_json::Value = response.json().await.unwrap();
    assert_eq!(profile["bio"], "reads a lot");
    assert_eq!(profile["role"], "user");
}
