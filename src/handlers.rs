use crate::{
    AppState,
    auth::{self, AuthUser},
    error::ApiError,
    models::{
        Category, CommentRead, CreateCommentRequest, CreateReviewRequest, CreateTitleRequest,
        CreateUserRequest, Genre, GetTokenRequest, NewUser, ReviewRead, SendEmailRequest,
        SlugPayload, TitleRead, TokenResponse, UpdateCommentRequest, UpdateMeRequest,
        UpdateReviewRequest, UpdateTitleRequest, UpdateUserRequest, User,
    },
    permissions,
    repository::{NewTitle, TitlePatch, TitleQuery},
    validation,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

// --- Auth flow constants (wording kept stable for clients) ---

const CONFIRMATION_CODE_LENGTH: usize = 16;
const EMAIL_SUBJECT: &str = "ReviewDB - Confirmation Code";
const EMAIL_TEXT: &str =
    "Your secret code for getting the token: {code}\nDon't send it on to anyone!";
const GET_TOKEN_INVALID: &str =
    "O-ops! The user with such data was not found, check the entered data!";

// --- Filter Structs ---

/// Query parameters accepted by the category/genre/user listing endpoints:
/// a single partial-match search term.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct SearchFilter {
    pub search: Option<String>,
}

/// Query parameters for the public titles listing: equality on category
/// slug, genre slug and year; substring match on name.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct TitleFilter {
    pub category: Option<String>,
    pub genre: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
}

// --- Passwordless auth flow ---

/// send_confirmation_code
///
/// [Public Route] First half of the passwordless handshake. Creates-or-
/// refreshes the account behind the given email and mails it a fresh
/// 16-character confirmation code.
///
/// The response is the same whether or not the address was already known —
/// this endpoint must not be usable as an account-enumeration oracle. The
/// code is persisted before the mail leaves; a transport failure is logged
/// and never rolls the code back or fails the request.
#[utoipa::path(
    post,
    path = "/auth/email",
    request_body = SendEmailRequest,
    responses((status = 200, description = "Code issued", body = SendEmailRequest))
)]
pub async fn send_confirmation_code(
    State(state): State<AppState>,
    Json(payload): Json<SendEmailRequest>,
) -> Result<Json<Value>, ApiError> {
    validation::validate_email(&payload.email)?;
    let email = payload.email.to_lowercase();

    let code: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONFIRMATION_CODE_LENGTH)
        .map(char::from)
        .collect();

    match state.repo.get_user_by_email(&email).await? {
        // Known address: overwrite the single active code, keep the username.
        Some(user) => state.repo.set_confirmation_code(user.id, &code).await?,
        None => {
            // Derive the username from the email local part, suffixing '2'
            // until it is free.
            let mut username = email.split('@').next().unwrap_or_default().to_string();
            while state.repo.get_user_by_username(&username).await?.is_some() {
                username.push('2');
            }
            let created = state
                .repo
                .create_user(NewUser {
                    username,
                    email: email.clone(),
                    role: Default::default(),
                    confirmation_code: Some(code.clone()),
                    ..Default::default()
                })
                .await;
            match created {
                Ok(_) => {}
                // Lost a race against a concurrent request for the same
                // address: the row exists now, so fall back to overwriting.
                Err(ApiError::Conflict(_)) => {
                    if let Some(user) = state.repo.get_user_by_email(&email).await? {
                        state.repo.set_confirmation_code(user.id, &code).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    if let Err(e) = state
        .mailer
        .send(&email, EMAIL_SUBJECT, &EMAIL_TEXT.replace("{code}", &code))
        .await
    {
        // The code is already persisted; delivery failure must not abort
        // the flow. Not retried automatically.
        tracing::warn!("confirmation mail to {} failed: {}", email, e);
    }

    Ok(Json(json!({ "email": email })))
}

/// get_token
///
/// [Public Route] Second half of the handshake: exchanges a valid
/// (email, code) pair for a signed bearer token.
///
/// An unknown pair answers 200 with an explicit error body — an
/// invalid-credentials *result*, distinct from the 400s raised for
/// malformed requests. The code is deliberately not invalidated after a
/// successful exchange; reissuing a code is the only revocation.
#[utoipa::path(
    post,
    path = "/auth/token",
    request_body = GetTokenRequest,
    responses((status = 200, description = "Token or explicit invalid result", body = TokenResponse))
)]
pub async fn get_token(
    State(state): State<AppState>,
    Json(payload): Json<GetTokenRequest>,
) -> Result<Json<Value>, ApiError> {
    validation::validate_email(&payload.email)?;
    if payload.confirmation_code.is_empty() {
        return Err(ApiError::validation(
            "confirmation_code",
            "confirmation code must not be empty",
        ));
    }
    let email = payload.email.to_lowercase();

    match state
        .repo
        .find_user_by_code(&email, &payload.confirmation_code)
        .await?
    {
        Some(user) => {
            let token = auth::issue_token(user.id, &state.config.jwt_secret)?;
            Ok(Json(json!(TokenResponse { token })))
        }
        None => Ok(Json(json!({ "error": GET_TOKEN_INVALID }))),
    }
}

// --- Profile ---

/// get_me
///
/// [Authenticated Route] The acting user's own profile.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = User))
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;
    Ok(Json(user))
}

/// update_me
///
/// [Authenticated Route] Self-service profile update. The payload type has
/// no role field at all, so this path can never escalate.
#[utoipa::path(
    patch,
    path = "/me",
    request_body = UpdateMeRequest,
    responses((status = 200, description = "Updated", body = User))
)]
pub async fn update_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<User>, ApiError> {
    if let Some(username) = &payload.username {
        validation::validate_username(username)?;
    }
    if let Some(email) = &payload.email {
        validation::validate_email(email)?;
    }
    let user = state.repo.update_me(id, payload).await?;
    Ok(Json(user))
}

// --- User administration ---

/// list_users
///
/// [Admin Route] Lists users, optionally filtered by username substring.
#[utoipa::path(
    get,
    path = "/users",
    params(SearchFilter),
    responses((status = 200, description = "Users", body = [User]))
)]
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<Vec<User>>, ApiError> {
    if !permissions::is_admin(&user) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(state.repo.list_users(filter.search).await?))
}

/// create_user
///
/// [Admin Route] Creates a user directly, optionally with a role — the only
/// creation path that accepts one.
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses((status = 201, description = "Created", body = User))
)]
pub async fn create_user(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    if !permissions::is_admin(&user) {
        return Err(ApiError::Forbidden);
    }
    validation::validate_username(&payload.username)?;
    validation::validate_email(&payload.email)?;

    let created = state
        .repo
        .create_user(NewUser {
            username: payload.username,
            email: payload.email.to_lowercase(),
            role: payload.role.unwrap_or_default(),
            first_name: payload.first_name,
            last_name: payload.last_name,
            bio: payload.bio,
            confirmation_code: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// get_user_detail
///
/// [Admin Route] Single user by username.
#[utoipa::path(
    get,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses((status = 200, description = "User", body = User))
)]
pub async fn get_user_detail(
    user: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<User>, ApiError> {
    if !permissions::is_admin(&user) {
        return Err(ApiError::Forbidden);
    }
    let found = state
        .repo
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;
    Ok(Json(found))
}

/// update_user
///
/// [Admin Route] Partial user update. This is the role-escalation path and
/// it is admin-gated; uniqueness violations surface as 409.
#[utoipa::path(
    patch,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    request_body = UpdateUserRequest,
    responses((status = 200, description = "Updated", body = User))
)]
pub async fn update_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    if !permissions::is_admin(&user) {
        return Err(ApiError::Forbidden);
    }
    if let Some(new_username) = &payload.username {
        validation::validate_username(new_username)?;
    }
    if let Some(email) = &payload.email {
        validation::validate_email(email)?;
    }
    Ok(Json(state.repo.update_user(&username, payload).await?))
}

/// delete_user
///
/// [Admin Route] Deletes a user; their reviews and comments cascade away.
#[utoipa::path(
    delete,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not Found"))
)]
pub async fn delete_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !permissions::is_admin(&user) {
        return Err(ApiError::Forbidden);
    }
    state.repo.delete_user(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Categories & genres ---

/// list_categories
///
/// [Public Route] All categories, name-ordered, optional partial name search.
#[utoipa::path(
    get,
    path = "/categories",
    params(SearchFilter),
    responses((status = 200, description = "Categories", body = [Category]))
)]
pub async fn list_categories(
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.repo.list_categories(filter.search).await?))
}

/// create_category
///
/// [Admin Route] Catalog taxonomy is admin-writable, world-readable.
#[utoipa::path(
    post,
    path = "/categories",
    request_body = SlugPayload,
    responses((status = 201, description = "Created", body = Category), (status = 409, description = "Duplicate"))
)]
pub async fn create_category(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SlugPayload>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    if !permissions::is_admin_or_read_only(Some(&user), &Method::POST) {
        return Err(ApiError::Forbidden);
    }
    validation::validate_name(&payload.name)?;
    validation::validate_slug(&payload.slug)?;
    let category = state
        .repo
        .create_category(&payload.name, &payload.slug)
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// get_category
///
/// [Public Route] Category lookup by slug.
#[utoipa::path(
    get,
    path = "/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses((status = 200, description = "Category", body = Category))
)]
pub async fn get_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Category>, ApiError> {
    let category = state
        .repo
        .get_category_by_slug(&slug)
        .await?
        .ok_or_else(|| ApiError::not_found("category"))?;
    Ok(Json(category))
}

/// delete_category
///
/// [Admin Route] Deleting a category is non-cascading: its titles survive
/// with a nulled category reference.
#[utoipa::path(
    delete,
    path = "/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not Found"))
)]
pub async fn delete_category(
    user: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !permissions::is_admin_or_read_only(Some(&user), &Method::DELETE) {
        return Err(ApiError::Forbidden);
    }
    state.repo.delete_category(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// list_genres
///
/// [Public Route]
#[utoipa::path(
    get,
    path = "/genres",
    params(SearchFilter),
    responses((status = 200, description = "Genres", body = [Genre]))
)]
pub async fn list_genres(
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<Vec<Genre>>, ApiError> {
    Ok(Json(state.repo.list_genres(filter.search).await?))
}

/// create_genre
///
/// [Admin Route]
#[utoipa::path(
    post,
    path = "/genres",
    request_body = SlugPayload,
    responses((status = 201, description = "Created", body = Genre), (status = 409, description = "Duplicate"))
)]
pub async fn create_genre(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SlugPayload>,
) -> Result<(StatusCode, Json<Genre>), ApiError> {
    if !permissions::is_admin_or_read_only(Some(&user), &Method::POST) {
        return Err(ApiError::Forbidden);
    }
    validation::validate_name(&payload.name)?;
    validation::validate_slug(&payload.slug)?;
    let genre = state.repo.create_genre(&payload.name, &payload.slug).await?;
    Ok((StatusCode::CREATED, Json(genre)))
}

/// get_genre
///
/// [Public Route]
#[utoipa::path(
    get,
    path = "/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    responses((status = 200, description = "Genre", body = Genre))
)]
pub async fn get_genre(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Genre>, ApiError> {
    let genre = state
        .repo
        .get_genre_by_slug(&slug)
        .await?
        .ok_or_else(|| ApiError::not_found("genre"))?;
    Ok(Json(genre))
}

/// delete_genre
///
/// [Admin Route]
#[utoipa::path(
    delete,
    path = "/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not Found"))
)]
pub async fn delete_genre(
    user: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !permissions::is_admin_or_read_only(Some(&user), &Method::DELETE) {
        return Err(ApiError::Forbidden);
    }
    state.repo.delete_genre(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Titles ---

/// Resolves write-view slugs to ids, failing with Not-Found on unknown
/// references. A supplied genre list must be non-empty.
async fn resolve_title_refs(
    state: &AppState,
    category: &Option<String>,
    genre: &Option<Vec<String>>,
) -> Result<(Option<Uuid>, Option<Vec<Uuid>>), ApiError> {
    let category_id = match category {
        Some(slug) => Some(
            state
                .repo
                .get_category_by_slug(slug)
                .await?
                .ok_or_else(|| ApiError::not_found("category"))?
                .id,
        ),
        None => None,
    };
    let genre_ids = match genre {
        Some(slugs) => {
            if slugs.is_empty() {
                return Err(ApiError::validation("genre", "genre list must not be empty"));
            }
            let mut ids = Vec::with_capacity(slugs.len());
            for slug in slugs {
                ids.push(
                    state
                        .repo
                        .get_genre_by_slug(slug)
                        .await?
                        .ok_or_else(|| ApiError::not_found("genre"))?
                        .id,
                );
            }
            Some(ids)
        }
        None => None,
    };
    Ok((category_id, genre_ids))
}

/// list_titles
///
/// [Public Route] Lists titles with the derived rating, filterable by
/// category slug, genre slug, name substring and exact year.
#[utoipa::path(
    get,
    path = "/titles",
    params(TitleFilter),
    responses((status = 200, description = "Titles", body = [TitleRead]))
)]
pub async fn list_titles(
    State(state): State<AppState>,
    Query(filter): Query<TitleFilter>,
) -> Result<Json<Vec<TitleRead>>, ApiError> {
    let titles = state
        .repo
        .list_titles(TitleQuery {
            category_slug: filter.category,
            genre_slug: filter.genre,
            name: filter.name,
            year: filter.year,
        })
        .await?;
    Ok(Json(titles))
}

/// create_title
///
/// [Admin Route] Creates a title; category/genres arrive as slugs and must
/// already exist. The year may not lie in the future.
#[utoipa::path(
    post,
    path = "/titles",
    request_body = CreateTitleRequest,
    responses((status = 201, description = "Created", body = TitleRead))
)]
pub async fn create_title(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateTitleRequest>,
) -> Result<(StatusCode, Json<TitleRead>), ApiError> {
    if !permissions::is_admin_or_read_only(Some(&user), &Method::POST) {
        return Err(ApiError::Forbidden);
    }
    validation::validate_name(&payload.name)?;
    if let Some(year) = payload.year {
        validation::validate_year(year)?;
    }
    let (category_id, genre_ids) =
        resolve_title_refs(&state, &payload.category, &payload.genre).await?;

    let title = state
        .repo
        .create_title(NewTitle {
            name: payload.name,
            year: payload.year,
            description: payload.description,
            category_id,
            genre_ids: genre_ids.unwrap_or_default(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(title)))
}

/// get_title_detail
///
/// [Public Route] Single title with category, genres and rating.
#[utoipa::path(
    get,
    path = "/titles/{id}",
    params(("id" = Uuid, Path, description = "Title ID")),
    responses((status = 200, description = "Title", body = TitleRead))
)]
pub async fn get_title_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TitleRead>, ApiError> {
    let title = state
        .repo
        .get_title(id)
        .await?
        .ok_or_else(|| ApiError::not_found("title"))?;
    Ok(Json(title))
}

/// update_title
///
/// [Admin Route] Partial title update; a supplied genre list replaces the
/// whole membership.
#[utoipa::path(
    patch,
    path = "/titles/{id}",
    params(("id" = Uuid, Path, description = "Title ID")),
    request_body = UpdateTitleRequest,
    responses((status = 200, description = "Updated", body = TitleRead))
)]
pub async fn update_title(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTitleRequest>,
) -> Result<Json<TitleRead>, ApiError> {
    if !permissions::is_admin_or_read_only(Some(&user), &Method::PATCH) {
        return Err(ApiError::Forbidden);
    }
    if let Some(name) = &payload.name {
        validation::validate_name(name)?;
    }
    if let Some(year) = payload.year {
        validation::validate_year(year)?;
    }
    let (category_id, genre_ids) =
        resolve_title_refs(&state, &payload.category, &payload.genre).await?;

    let title = state
        .repo
        .update_title(
            id,
            TitlePatch {
                name: payload.name,
                year: payload.year,
                description: payload.description,
                category_id,
                genre_ids,
            },
        )
        .await?;
    Ok(Json(title))
}

/// delete_title
///
/// [Admin Route] Deletes a title; its reviews and their comments cascade.
#[utoipa::path(
    delete,
    path = "/titles/{id}",
    params(("id" = Uuid, Path, description = "Title ID")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not Found"))
)]
pub async fn delete_title(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !permissions::is_admin_or_read_only(Some(&user), &Method::DELETE) {
        return Err(ApiError::Forbidden);
    }
    state.repo.delete_title(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Reviews ---

/// Parent-existence gate shared by the nested review handlers.
async fn require_title(state: &AppState, title_id: Uuid) -> Result<(), ApiError> {
    state
        .repo
        .get_title(title_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("title"))
}

/// list_reviews
///
/// [Public Route] Reviews of a title, newest first.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews",
    params(("title_id" = Uuid, Path, description = "Title ID")),
    responses((status = 200, description = "Reviews", body = [ReviewRead]))
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(title_id): Path<Uuid>,
) -> Result<Json<Vec<ReviewRead>>, ApiError> {
    require_title(&state, title_id).await?;
    Ok(Json(state.repo.list_reviews(title_id).await?))
}

/// create_review
///
/// [Authenticated Route] Posts a review. The author is always the acting
/// user and `pub_date` is server-assigned; a second review of the same
/// title by the same author is rejected with 409 by the storage-layer
/// uniqueness constraint.
#[utoipa::path(
    post,
    path = "/titles/{title_id}/reviews",
    params(("title_id" = Uuid, Path, description = "Title ID")),
    request_body = CreateReviewRequest,
    responses((status = 201, description = "Created", body = ReviewRead), (status = 409, description = "Duplicate"))
)]
pub async fn create_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path(title_id): Path<Uuid>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ReviewRead>), ApiError> {
    require_title(&state, title_id).await?;
    validation::validate_text(&payload.text)?;
    let score = payload.score.unwrap_or(10);
    validation::validate_score(score)?;

    let review = state
        .repo
        .create_review(title_id, user.id, &payload.text, score)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// get_review_detail
///
/// [Public Route]
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID")
    ),
    responses((status = 200, description = "Review", body = ReviewRead))
)]
pub async fn get_review_detail(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReviewRead>, ApiError> {
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await?
        .ok_or_else(|| ApiError::not_found("review"))?;
    Ok(Json(review))
}

/// update_review
///
/// [Authenticated Route] Author, moderator, admin or platform-elevated only.
/// The lookup runs first: 404 for an absent review, 403 for an existing one
/// the actor may not touch.
#[utoipa::path(
    patch,
    path = "/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID")
    ),
    request_body = UpdateReviewRequest,
    responses((status = 200, description = "Updated", body = ReviewRead), (status = 403, description = "Forbidden"))
)]
pub async fn update_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateReviewRequest>,
) -> Result<Json<ReviewRead>, ApiError> {
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await?
        .ok_or_else(|| ApiError::not_found("review"))?;
    if !permissions::is_author_or_moderator_or_admin_or_read_only(
        Some(&user),
        &Method::PATCH,
        review.author_id,
    ) {
        return Err(ApiError::Forbidden);
    }
    if let Some(text) = &payload.text {
        validation::validate_text(text)?;
    }
    if let Some(score) = payload.score {
        validation::validate_score(score)?;
    }
    let updated = state
        .repo
        .update_review(review_id, payload.text, payload.score)
        .await?;
    Ok(Json(updated))
}

/// delete_review
///
/// [Authenticated Route] Same authorization as update; comments cascade.
#[utoipa::path(
    delete,
    path = "/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID")
    ),
    responses((status = 204, description = "Deleted"), (status = 403, description = "Forbidden"))
)]
pub async fn delete_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await?
        .ok_or_else(|| ApiError::not_found("review"))?;
    if !permissions::is_author_or_moderator_or_admin_or_read_only(
        Some(&user),
        &Method::DELETE,
        review.author_id,
    ) {
        return Err(ApiError::Forbidden);
    }
    state.repo.delete_review(review_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Comments ---

/// Parent-existence gate for the comment handlers: the review must exist
/// under the named title.
async fn require_review(
    state: &AppState,
    title_id: Uuid,
    review_id: Uuid,
) -> Result<(), ApiError> {
    state
        .repo
        .get_review(title_id, review_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("review"))
}

/// list_comments
///
/// [Public Route] Comments of a review, newest first.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID")
    ),
    responses((status = 200, description = "Comments", body = [CommentRead]))
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<CommentRead>>, ApiError> {
    require_review(&state, title_id, review_id).await?;
    Ok(Json(state.repo.list_comments(review_id).await?))
}

/// create_comment
///
/// [Authenticated Route] Posts a comment under a review; the author is the
/// acting user, `pub_date` server-assigned.
#[utoipa::path(
    post,
    path = "/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID")
    ),
    request_body = CreateCommentRequest,
    responses((status = 201, description = "Created", body = CommentRead))
)]
pub async fn create_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentRead>), ApiError> {
    require_review(&state, title_id, review_id).await?;
    validation::validate_text(&payload.text)?;
    let comment = state
        .repo
        .create_comment(review_id, user.id, &payload.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// get_comment_detail
///
/// [Public Route]
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    responses((status = 200, description = "Comment", body = CommentRead))
)]
pub async fn get_comment_detail(
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(Uuid, Uuid, i64)>,
) -> Result<Json<CommentRead>, ApiError> {
    require_review(&state, title_id, review_id).await?;
    let comment = state
        .repo
        .get_comment(review_id, comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("comment"))?;
    Ok(Json(comment))
}

/// update_comment
///
/// [Authenticated Route] Author, moderator, admin or platform-elevated only.
#[utoipa::path(
    patch,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    request_body = UpdateCommentRequest,
    responses((status = 200, description = "Updated", body = CommentRead), (status = 403, description = "Forbidden"))
)]
pub async fn update_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(Uuid, Uuid, i64)>,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<Json<CommentRead>, ApiError> {
    require_review(&state, title_id, review_id).await?;
    let comment = state
        .repo
        .get_comment(review_id, comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("comment"))?;
    if !permissions::is_author_or_moderator_or_admin_or_read_only(
        Some(&user),
        &Method::PATCH,
        comment.author_id,
    ) {
        return Err(ApiError::Forbidden);
    }
    validation::validate_text(&payload.text)?;
    let updated = state.repo.update_comment(comment_id, &payload.text).await?;
    Ok(Json(updated))
}

/// delete_comment
///
/// [Authenticated Route] Same authorization as update.
#[utoipa::path(
    delete,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = Uuid, Path, description = "Title ID"),
        ("review_id" = Uuid, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    responses((status = 204, description = "Deleted"), (status = 403, description = "Forbidden"))
)]
pub async fn delete_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(Uuid, Uuid, i64)>,
) -> Result<StatusCode, ApiError> {
    require_review(&state, title_id, review_id).await?;
    let comment = state
        .repo
        .get_comment(review_id, comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("comment"))?;
    if !permissions::is_author_or_moderator_or_admin_or_read_only(
        Some(&user),
        &Method::DELETE,
        comment.author_id,
    ) {
        return Err(ApiError::Forbidden);
    }
    state.repo.delete_comment(comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
