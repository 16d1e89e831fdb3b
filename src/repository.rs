use crate::error::ApiError;
use crate::models::{
    Category, Comment, CommentRead, Genre, NewUser, Review, ReviewRead, Title, TitleRead,
    UpdateMeRequest, UpdateUserRequest, User,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, PgPool, query_builder::QueryBuilder};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// NewTitle
///
/// Insertion payload with category/genre references already resolved to ids.
/// Slug resolution (and its Not-Found failures) happens in the handlers
/// before this struct is built.
#[derive(Debug, Clone, Default)]
pub struct NewTitle {
    pub name: String,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub genre_ids: Vec<Uuid>,
}

/// TitlePatch
///
/// Partial title update; `genre_ids`, when present, replaces the entire
/// membership list.
#[derive(Debug, Clone, Default)]
pub struct TitlePatch {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub genre_ids: Option<Vec<Uuid>>,
}

/// TitleQuery
///
/// Listing filters for the public titles endpoint: equality on category
/// slug, genre slug and year, substring match on name.
#[derive(Debug, Clone, Default)]
pub struct TitleQuery {
    pub category_slug: Option<String>,
    pub genre_slug: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
}

/// Repository
///
/// The abstract persistence contract. Handlers talk to `Arc<dyn Repository>`
/// and never know whether Postgres or the in-memory store is behind it.
///
/// Uniqueness invariants (user email/username, category/genre name/slug,
/// title name, one review per (title, author)) are enforced by the storage
/// layer itself — a database constraint or the in-memory store's single
/// lock — so concurrent creators cannot race past a check-then-insert.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Identity store ---
    async fn create_user(&self, new: NewUser) -> Result<User, ApiError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, ApiError>;
    /// Exact (email, confirmation_code) match, the code-exchange lookup.
    async fn find_user_by_code(&self, email: &str, code: &str) -> Result<Option<User>, ApiError>;
    /// Overwrites the single active confirmation code.
    async fn set_confirmation_code(&self, user_id: Uuid, code: &str) -> Result<(), ApiError>;
    async fn list_users(&self, search: Option<String>) -> Result<Vec<User>, ApiError>;
    /// Admin-path update; the only route that may change `role`.
    async fn update_user(&self, username: &str, patch: UpdateUserRequest)
    -> Result<User, ApiError>;
    /// Self-service update; never touches `role` or `elevated`.
    async fn update_me(&self, id: Uuid, patch: UpdateMeRequest) -> Result<User, ApiError>;
    /// Deletes a user and cascades to their reviews and comments.
    async fn delete_user(&self, username: &str) -> Result<(), ApiError>;

    // --- Catalog: categories & genres ---
    async fn create_category(&self, name: &str, slug: &str) -> Result<Category, ApiError>;
    async fn list_categories(&self, search: Option<String>) -> Result<Vec<Category>, ApiError>;
    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, ApiError>;
    /// Deleting a category nulls the category reference of its titles.
    async fn delete_category(&self, slug: &str) -> Result<(), ApiError>;

    async fn create_genre(&self, name: &str, slug: &str) -> Result<Genre, ApiError>;
    async fn list_genres(&self, search: Option<String>) -> Result<Vec<Genre>, ApiError>;
    async fn get_genre_by_slug(&self, slug: &str) -> Result<Option<Genre>, ApiError>;
    async fn delete_genre(&self, slug: &str) -> Result<(), ApiError>;

    // --- Catalog: titles ---
    async fn create_title(&self, new: NewTitle) -> Result<TitleRead, ApiError>;
    async fn list_titles(&self, query: TitleQuery) -> Result<Vec<TitleRead>, ApiError>;
    async fn get_title(&self, id: Uuid) -> Result<Option<TitleRead>, ApiError>;
    async fn update_title(&self, id: Uuid, patch: TitlePatch) -> Result<TitleRead, ApiError>;
    /// Cascades to the title's reviews and, transitively, their comments.
    async fn delete_title(&self, id: Uuid) -> Result<(), ApiError>;

    // --- Reviews ---
    /// Fails with Conflict when this author already reviewed this title.
    async fn create_review(
        &self,
        title_id: Uuid,
        author_id: Uuid,
        text: &str,
        score: i16,
    ) -> Result<ReviewRead, ApiError>;
    /// Children of the title, newest first.
    async fn list_reviews(&self, title_id: Uuid) -> Result<Vec<ReviewRead>, ApiError>;
    async fn get_review(
        &self,
        title_id: Uuid,
        review_id: Uuid,
    ) -> Result<Option<ReviewRead>, ApiError>;
    async fn update_review(
        &self,
        review_id: Uuid,
        text: Option<String>,
        score: Option<i16>,
    ) -> Result<ReviewRead, ApiError>;
    /// Cascades to the review's comments.
    async fn delete_review(&self, review_id: Uuid) -> Result<(), ApiError>;

    // --- Comments ---
    async fn create_comment(
        &self,
        review_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> Result<CommentRead, ApiError>;
    async fn list_comments(&self, review_id: Uuid) -> Result<Vec<CommentRead>, ApiError>;
    async fn get_comment(
        &self,
        review_id: Uuid,
        comment_id: i64,
    ) -> Result<Option<CommentRead>, ApiError>;
    async fn update_comment(&self, comment_id: i64, text: &str) -> Result<CommentRead, ApiError>;
    async fn delete_comment(&self, comment_id: i64) -> Result<(), ApiError>;
}

/// The concrete type shared through the application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Postgres implementation ---

const USER_COLUMNS: &str =
    "id, username, email, role, elevated, first_name, last_name, bio, confirmation_code";

const REVIEW_READ: &str = "SELECT r.id, r.author_id, u.username AS author, r.text, r.score, \
     r.pub_date FROM reviews r JOIN users u ON u.id = r.author_id";

const COMMENT_READ: &str = "SELECT c.id, c.author_id, u.username AS author, c.text, c.pub_date \
     FROM comments c JOIN users u ON u.id = c.author_id";

/// One row of the aggregated title listing query. The category columns come
/// from a LEFT JOIN and the rating from AVG over the related reviews, cast
/// to float8 so SQL `numeric` never leaks into the model.
#[derive(Debug, FromRow)]
struct TitleRow {
    id: Uuid,
    name: String,
    year: Option<i32>,
    description: Option<String>,
    rating: Option<f64>,
    category_id: Option<Uuid>,
    category_name: Option<String>,
    category_slug: Option<String>,
}

/// PostgresRepository
///
/// Production implementation backed by PostgreSQL. Relies on the schema's
/// constraints for the hard invariants: UNIQUE(email), UNIQUE(username),
/// UNIQUE(title_id, author_id) on reviews, ON DELETE CASCADE from
/// titles→reviews→comments and users→reviews/comments, and ON DELETE SET
/// NULL from categories→titles.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolves the genre list for one title, ordered by name.
    async fn genres_of(&self, title_id: Uuid) -> Result<Vec<Genre>, ApiError> {
        let genres = sqlx::query_as::<_, Genre>(
            "SELECT g.id, g.name, g.slug FROM genres g \
             JOIN title_genres tg ON tg.genre_id = g.id \
             WHERE tg.title_id = $1 ORDER BY g.name",
        )
        .bind(title_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(genres)
    }

    async fn compose_title(&self, row: TitleRow) -> Result<TitleRead, ApiError> {
        let genre = self.genres_of(row.id).await?;
        let category = match (row.category_id, row.category_name, row.category_slug) {
            (Some(id), Some(name), Some(slug)) => Some(Category { id, name, slug }),
            _ => None,
        };
        Ok(TitleRead {
            id: row.id,
            name: row.name,
            year: row.year,
            description: row.description,
            rating: row.rating,
            category,
            genre,
        })
    }

    /// Fetches the joined read view of a review that is known to exist.
    async fn review_read(&self, id: Uuid) -> Result<ReviewRead, ApiError> {
        let review = sqlx::query_as::<_, ReviewRead>(&format!("{REVIEW_READ} WHERE r.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("review"))?;
        Ok(review)
    }

    async fn comment_read(&self, id: i64) -> Result<CommentRead, ApiError> {
        let comment = sqlx::query_as::<_, CommentRead>(&format!("{COMMENT_READ} WHERE c.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("comment"))?;
        Ok(comment)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_user(&self, new: NewUser) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users \
                (id, username, email, role, elevated, first_name, last_name, bio, \
                 confirmation_code) \
             VALUES ($1, $2, $3, $4, false, $5, $6, $7, $8) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new.username)
        .bind(&new.email)
        .bind(new.role)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.bio)
        .bind(&new.confirmation_code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "user with this email or username already exists"))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        Ok(
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_user_by_code(&self, email: &str, code: &str) -> Result<Option<User>, ApiError> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND confirmation_code = $2"
        ))
        .bind(email)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_confirmation_code(&self, user_id: Uuid, code: &str) -> Result<(), ApiError> {
        let result = sqlx::query("UPDATE users SET confirmation_code = $2 WHERE id = $1")
            .bind(user_id)
            .bind(code)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("user"));
        }
        Ok(())
    }

    async fn list_users(&self, search: Option<String>) -> Result<Vec<User>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
        if let Some(s) = search {
            builder.push(" WHERE username ILIKE ");
            builder.push_bind(format!("%{s}%"));
        }
        builder.push(" ORDER BY username");
        Ok(builder.build_query_as::<User>().fetch_all(&self.pool).await?)
    }

    async fn update_user(
        &self,
        username: &str,
        patch: UpdateUserRequest,
    ) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                username = COALESCE($2, username), \
                email = COALESCE($3, email), \
                role = COALESCE($4, role), \
                first_name = COALESCE($5, first_name), \
                last_name = COALESCE($6, last_name), \
                bio = COALESCE($7, bio) \
             WHERE username = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(&patch.username)
        .bind(&patch.email)
        .bind(patch.role)
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.bio)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "user with this email or username already exists"))?
        .ok_or_else(|| ApiError::not_found("user"))
    }

    async fn update_me(&self, id: Uuid, patch: UpdateMeRequest) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                username = COALESCE($2, username), \
                email = COALESCE($3, email), \
                first_name = COALESCE($4, first_name), \
                last_name = COALESCE($5, last_name), \
                bio = COALESCE($6, bio) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&patch.username)
        .bind(&patch.email)
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.bio)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "user with this email or username already exists"))?
        .ok_or_else(|| ApiError::not_found("user"))
    }

    async fn delete_user(&self, username: &str) -> Result<(), ApiError> {
        // Reviews and comments fall with the user via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("user"));
        }
        Ok(())
    }

    async fn create_category(&self, name: &str, slug: &str) -> Result<Category, ApiError> {
        sqlx::query_as::<_, Category>(
            "INSERT INTO categories (id, name, slug) VALUES ($1, $2, $3) \
             RETURNING id, name, slug",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "category with this name or slug already exists"))
    }

    async fn list_categories(&self, search: Option<String>) -> Result<Vec<Category>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT id, name, slug FROM categories");
        if let Some(s) = search {
            builder.push(" WHERE name ILIKE ");
            builder.push_bind(format!("%{s}%"));
        }
        builder.push(" ORDER BY name");
        Ok(builder
            .build_query_as::<Category>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, ApiError> {
        Ok(
            sqlx::query_as::<_, Category>("SELECT id, name, slug FROM categories WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn delete_category(&self, slug: &str) -> Result<(), ApiError> {
        // Titles keep existing with category_id nulled (ON DELETE SET NULL).
        let result = sqlx::query("DELETE FROM categories WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("category"));
        }
        Ok(())
    }

    async fn create_genre(&self, name: &str, slug: &str) -> Result<Genre, ApiError> {
        sqlx::query_as::<_, Genre>(
            "INSERT INTO genres (id, name, slug) VALUES ($1, $2, $3) RETURNING id, name, slug",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "genre with this name or slug already exists"))
    }

    async fn list_genres(&self, search: Option<String>) -> Result<Vec<Genre>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT id, name, slug FROM genres");
        if let Some(s) = search {
            builder.push(" WHERE name ILIKE ");
            builder.push_bind(format!("%{s}%"));
        }
        builder.push(" ORDER BY name");
        Ok(builder.build_query_as::<Genre>().fetch_all(&self.pool).await?)
    }

    async fn get_genre_by_slug(&self, slug: &str) -> Result<Option<Genre>, ApiError> {
        Ok(
            sqlx::query_as::<_, Genre>("SELECT id, name, slug FROM genres WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn delete_genre(&self, slug: &str) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM genres WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("genre"));
        }
        Ok(())
    }

    async fn create_title(&self, new: NewTitle) -> Result<TitleRead, ApiError> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO titles (id, name, year, description, category_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&new.name)
        .bind(new.year)
        .bind(&new.description)
        .bind(new.category_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "title with this name already exists"))?;

        for genre_id in &new.genre_ids {
            sqlx::query("INSERT INTO title_genres (title_id, genre_id) VALUES ($1, $2)")
                .bind(id)
                .bind(genre_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.get_title(id)
            .await?
            .ok_or_else(|| ApiError::Internal("freshly created title vanished".to_string()))
    }

    /// Flexible filtering with QueryBuilder so every user value stays a bind
    /// parameter. The rating is aggregated here, not stored.
    async fn list_titles(&self, query: TitleQuery) -> Result<Vec<TitleRead>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT t.id, t.name, t.year, t.description, \
                    AVG(r.score)::float8 AS rating, \
                    c.id AS category_id, c.name AS category_name, c.slug AS category_slug \
             FROM titles t \
             LEFT JOIN categories c ON c.id = t.category_id \
             LEFT JOIN reviews r ON r.title_id = t.id \
             WHERE true",
        );

        if let Some(slug) = query.category_slug {
            builder.push(" AND c.slug = ");
            builder.push_bind(slug);
        }
        if let Some(slug) = query.genre_slug {
            builder.push(
                " AND t.id IN (SELECT tg.title_id FROM title_genres tg \
                 JOIN genres g ON g.id = tg.genre_id WHERE g.slug = ",
            );
            builder.push_bind(slug);
            builder.push(")");
        }
        if let Some(name) = query.name {
            builder.push(" AND t.name ILIKE ");
            builder.push_bind(format!("%{name}%"));
        }
        if let Some(year) = query.year {
            builder.push(" AND t.year = ");
            builder.push_bind(year);
        }

        builder.push(
            " GROUP BY t.id, t.name, t.year, t.description, c.id, c.name, c.slug \
             ORDER BY t.name",
        );

        let rows = builder
            .build_query_as::<TitleRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut titles = Vec::with_capacity(rows.len());
        for row in rows {
            titles.push(self.compose_title(row).await?);
        }
        Ok(titles)
    }

    async fn get_title(&self, id: Uuid) -> Result<Option<TitleRead>, ApiError> {
        let row = sqlx::query_as::<_, TitleRow>(
            "SELECT t.id, t.name, t.year, t.description, \
                    AVG(r.score)::float8 AS rating, \
                    c.id AS category_id, c.name AS category_name, c.slug AS category_slug \
             FROM titles t \
             LEFT JOIN categories c ON c.id = t.category_id \
             LEFT JOIN reviews r ON r.title_id = t.id \
             WHERE t.id = $1 \
             GROUP BY t.id, t.name, t.year, t.description, c.id, c.name, c.slug",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.compose_title(row).await?)),
            None => Ok(None),
        }
    }

    async fn update_title(&self, id: Uuid, patch: TitlePatch) -> Result<TitleRead, ApiError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE titles SET \
                name = COALESCE($2, name), \
                year = COALESCE($3, year), \
                description = COALESCE($4, description), \
                category_id = COALESCE($5, category_id) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&patch.name)
        .bind(patch.year)
        .bind(&patch.description)
        .bind(patch.category_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "title with this name already exists"))?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("title"));
        }

        if let Some(genre_ids) = &patch.genre_ids {
            sqlx::query("DELETE FROM title_genres WHERE title_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for genre_id in genre_ids {
                sqlx::query("INSERT INTO title_genres (title_id, genre_id) VALUES ($1, $2)")
                    .bind(id)
                    .bind(genre_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        self.get_title(id)
            .await?
            .ok_or_else(|| ApiError::not_found("title"))
    }

    async fn delete_title(&self, id: Uuid) -> Result<(), ApiError> {
        // Reviews and their comments fall with the title via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM titles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("title"));
        }
        Ok(())
    }

    async fn create_review(
        &self,
        title_id: Uuid,
        author_id: Uuid,
        text: &str,
        score: i16,
    ) -> Result<ReviewRead, ApiError> {
        // The UNIQUE(title_id, author_id) constraint is the authoritative
        // one-review-per-author enforcement; the insert-and-join CTE returns
        // the enriched row in a single round trip.
        sqlx::query_as::<_, ReviewRead>(
            "WITH inserted AS ( \
                INSERT INTO reviews (id, author_id, title_id, text, score, pub_date) \
                VALUES ($1, $2, $3, $4, $5, NOW()) \
                RETURNING id, author_id, text, score, pub_date \
             ) \
             SELECT i.id, i.author_id, u.username AS author, i.text, i.score, i.pub_date \
             FROM inserted i JOIN users u ON u.id = i.author_id",
        )
        .bind(Uuid::new_v4())
        .bind(author_id)
        .bind(title_id)
        .bind(text)
        .bind(score)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "you have already reviewed this title"))
    }

    async fn list_reviews(&self, title_id: Uuid) -> Result<Vec<ReviewRead>, ApiError> {
        Ok(sqlx::query_as::<_, ReviewRead>(&format!(
            "{REVIEW_READ} WHERE r.title_id = $1 ORDER BY r.pub_date DESC"
        ))
        .bind(title_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_review(
        &self,
        title_id: Uuid,
        review_id: Uuid,
    ) -> Result<Option<ReviewRead>, ApiError> {
        Ok(sqlx::query_as::<_, ReviewRead>(&format!(
            "{REVIEW_READ} WHERE r.title_id = $1 AND r.id = $2"
        ))
        .bind(title_id)
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_review(
        &self,
        review_id: Uuid,
        text: Option<String>,
        score: Option<i16>,
    ) -> Result<ReviewRead, ApiError> {
        let result = sqlx::query(
            "UPDATE reviews SET text = COALESCE($2, text), score = COALESCE($3, score) \
             WHERE id = $1",
        )
        .bind(review_id)
        .bind(&text)
        .bind(score)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("review"));
        }
        self.review_read(review_id).await
    }

    async fn delete_review(&self, review_id: Uuid) -> Result<(), ApiError> {
        // Comments fall with the review via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(review_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("review"));
        }
        Ok(())
    }

    async fn create_comment(
        &self,
        review_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> Result<CommentRead, ApiError> {
        Ok(sqlx::query_as::<_, CommentRead>(
            "WITH inserted AS ( \
                INSERT INTO comments (author_id, review_id, text, pub_date) \
                VALUES ($1, $2, $3, NOW()) \
                RETURNING id, author_id, text, pub_date \
             ) \
             SELECT i.id, i.author_id, u.username AS author, i.text, i.pub_date \
             FROM inserted i JOIN users u ON u.id = i.author_id",
        )
        .bind(author_id)
        .bind(review_id)
        .bind(text)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_comments(&self, review_id: Uuid) -> Result<Vec<CommentRead>, ApiError> {
        Ok(sqlx::query_as::<_, CommentRead>(&format!(
            "{COMMENT_READ} WHERE c.review_id = $1 ORDER BY c.pub_date DESC"
        ))
        .bind(review_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_comment(
        &self,
        review_id: Uuid,
        comment_id: i64,
    ) -> Result<Option<CommentRead>, ApiError> {
        Ok(sqlx::query_as::<_, CommentRead>(&format!(
            "{COMMENT_READ} WHERE c.review_id = $1 AND c.id = $2"
        ))
        .bind(review_id)
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_comment(&self, comment_id: i64, text: &str) -> Result<CommentRead, ApiError> {
        let result = sqlx::query("UPDATE comments SET text = $2 WHERE id = $1")
            .bind(comment_id)
            .bind(text)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("comment"));
        }
        self.comment_read(comment_id).await
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("comment"));
        }
        Ok(())
    }
}

// --- In-memory implementation (test double) ---

#[derive(Default)]
struct Store {
    users: Vec<User>,
    categories: Vec<Category>,
    genres: Vec<Genre>,
    titles: Vec<Title>,
    title_genres: Vec<(Uuid, Uuid)>,
    reviews: Vec<Review>,
    comments: Vec<Comment>,
    next_comment_id: i64,
}

impl Store {
    fn username_of(&self, id: Uuid) -> String {
        self.users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }

    fn review_read(&self, review: &Review) -> ReviewRead {
        ReviewRead {
            id: review.id,
            author_id: review.author_id,
            author: self.username_of(review.author_id),
            text: review.text.clone(),
            score: review.score,
            pub_date: review.pub_date,
        }
    }

    fn comment_read(&self, comment: &Comment) -> CommentRead {
        CommentRead {
            id: comment.id,
            author_id: comment.author_id,
            author: self.username_of(comment.author_id),
            text: comment.text.clone(),
            pub_date: comment.pub_date,
        }
    }

    fn title_read(&self, title: &Title) -> TitleRead {
        let scores: Vec<i16> = self
            .reviews
            .iter()
            .filter(|r| r.title_id == title.id)
            .map(|r| r.score)
            .collect();
        // Mean of scores; null while no reviews exist, never zero.
        let rating = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64)
        };
        let category = title
            .category_id
            .and_then(|id| self.categories.iter().find(|c| c.id == id).cloned());
        let mut genre: Vec<Genre> = self
            .title_genres
            .iter()
            .filter(|(tid, _)| *tid == title.id)
            .filter_map(|(_, gid)| self.genres.iter().find(|g| g.id == *gid).cloned())
            .collect();
        genre.sort_by(|a, b| a.name.cmp(&b.name));
        TitleRead {
            id: title.id,
            name: title.name.clone(),
            year: title.year,
            description: title.description.clone(),
            rating,
            category,
            genre,
        }
    }

    /// Removes the reviews selected by the predicate together with their
    /// comments, mimicking the database cascade.
    fn cascade_reviews(&mut self, keep: impl Fn(&Review) -> bool) {
        let dropped: Vec<Uuid> = self
            .reviews
            .iter()
            .filter(|r| !keep(r))
            .map(|r| r.id)
            .collect();
        self.reviews.retain(|r| keep(r));
        self.comments.retain(|c| !dropped.contains(&c.review_id));
    }
}

/// InMemoryRepository
///
/// Mutex-guarded in-memory implementation used by the test suite. All
/// check-then-insert sequences run under the single lock, which makes the
/// store itself — not the calling code — the enforcer of the uniqueness
/// invariants, matching what the Postgres constraints do in production.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, new: NewUser) -> Result<User, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store
            .users
            .iter()
            .any(|u| u.email == new.email || u.username == new.username)
        {
            return Err(ApiError::Conflict(
                "user with this email or username already exists".to_string(),
            ));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            role: new.role,
            elevated: false,
            first_name: new.first_name,
            last_name: new.last_name,
            bio: new.bio,
            confirmation_code: new.confirmation_code,
        };
        store.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.username == username).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_code(&self, email: &str, code: &str) -> Result<Option<User>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .users
            .iter()
            .find(|u| u.email == email && u.confirmation_code.as_deref() == Some(code))
            .cloned())
    }

    async fn set_confirmation_code(&self, user_id: Uuid, code: &str) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        let user = store
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| ApiError::not_found("user"))?;
        user.confirmation_code = Some(code.to_string());
        Ok(())
    }

    async fn list_users(&self, search: Option<String>) -> Result<Vec<User>, ApiError> {
        let store = self.store.lock().unwrap();
        let needle = search.map(|s| s.to_lowercase());
        let mut users: Vec<User> = store
            .users
            .iter()
            .filter(|u| match &needle {
                Some(n) => u.username.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn update_user(
        &self,
        username: &str,
        patch: UpdateUserRequest,
    ) -> Result<User, ApiError> {
        let mut store = self.store.lock().unwrap();
        let id = store
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.id)
            .ok_or_else(|| ApiError::not_found("user"))?;
        if let Some(new_name) = &patch.username {
            if store.users.iter().any(|u| u.id != id && &u.username == new_name) {
                return Err(ApiError::Conflict(
                    "user with this email or username already exists".to_string(),
                ));
            }
        }
        if let Some(new_email) = &patch.email {
            if store.users.iter().any(|u| u.id != id && &u.email == new_email) {
                return Err(ApiError::Conflict(
                    "user with this email or username already exists".to_string(),
                ));
            }
        }
        let user = store.users.iter_mut().find(|u| u.id == id).unwrap();
        if let Some(v) = patch.username {
            user.username = v;
        }
        if let Some(v) = patch.email {
            user.email = v;
        }
        if let Some(v) = patch.role {
            user.role = v;
        }
        if let Some(v) = patch.first_name {
            user.first_name = Some(v);
        }
        if let Some(v) = patch.last_name {
            user.last_name = Some(v);
        }
        if let Some(v) = patch.bio {
            user.bio = Some(v);
        }
        Ok(user.clone())
    }

    async fn update_me(&self, id: Uuid, patch: UpdateMeRequest) -> Result<User, ApiError> {
        // Same field rules minus role, so reuse the admin path with the
        // role left untouched.
        let username = {
            let store = self.store.lock().unwrap();
            store
                .users
                .iter()
                .find(|u| u.id == id)
                .map(|u| u.username.clone())
                .ok_or_else(|| ApiError::not_found("user"))?
        };
        self.update_user(
            &username,
            UpdateUserRequest {
                username: patch.username,
                email: patch.email,
                role: None,
                first_name: patch.first_name,
                last_name: patch.last_name,
                bio: patch.bio,
            },
        )
        .await
    }

    async fn delete_user(&self, username: &str) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        let id = store
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.id)
            .ok_or_else(|| ApiError::not_found("user"))?;
        store.users.retain(|u| u.id != id);
        store.cascade_reviews(|r| r.author_id != id);
        store.comments.retain(|c| c.author_id != id);
        Ok(())
    }

    async fn create_category(&self, name: &str, slug: &str) -> Result<Category, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store
            .categories
            .iter()
            .any(|c| c.name == name || c.slug == slug)
        {
            return Err(ApiError::Conflict(
                "category with this name or slug already exists".to_string(),
            ));
        }
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
        };
        store.categories.push(category.clone());
        Ok(category)
    }

    async fn list_categories(&self, search: Option<String>) -> Result<Vec<Category>, ApiError> {
        let store = self.store.lock().unwrap();
        let needle = search.map(|s| s.to_lowercase());
        let mut categories: Vec<Category> = store
            .categories
            .iter()
            .filter(|c| match &needle {
                Some(n) => c.name.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store.categories.iter().find(|c| c.slug == slug).cloned())
    }

    async fn delete_category(&self, slug: &str) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        let id = store
            .categories
            .iter()
            .find(|c| c.slug == slug)
            .map(|c| c.id)
            .ok_or_else(|| ApiError::not_found("category"))?;
        store.categories.retain(|c| c.id != id);
        // SET NULL semantics: titles survive without a category.
        for title in store.titles.iter_mut() {
            if title.category_id == Some(id) {
                title.category_id = None;
            }
        }
        Ok(())
    }

    async fn create_genre(&self, name: &str, slug: &str) -> Result<Genre, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store.genres.iter().any(|g| g.name == name || g.slug == slug) {
            return Err(ApiError::Conflict(
                "genre with this name or slug already exists".to_string(),
            ));
        }
        let genre = Genre {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
        };
        store.genres.push(genre.clone());
        Ok(genre)
    }

    async fn list_genres(&self, search: Option<String>) -> Result<Vec<Genre>, ApiError> {
        let store = self.store.lock().unwrap();
        let needle = search.map(|s| s.to_lowercase());
        let mut genres: Vec<Genre> = store
            .genres
            .iter()
            .filter(|g| match &needle {
                Some(n) => g.name.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(genres)
    }

    async fn get_genre_by_slug(&self, slug: &str) -> Result<Option<Genre>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store.genres.iter().find(|g| g.slug == slug).cloned())
    }

    async fn delete_genre(&self, slug: &str) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        let id = store
            .genres
            .iter()
            .find(|g| g.slug == slug)
            .map(|g| g.id)
            .ok_or_else(|| ApiError::not_found("genre"))?;
        store.genres.retain(|g| g.id != id);
        store.title_genres.retain(|(_, gid)| *gid != id);
        Ok(())
    }

    async fn create_title(&self, new: NewTitle) -> Result<TitleRead, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store.titles.iter().any(|t| t.name == new.name) {
            return Err(ApiError::Conflict(
                "title with this name already exists".to_string(),
            ));
        }
        let title = Title {
            id: Uuid::new_v4(),
            name: new.name,
            year: new.year,
            description: new.description,
            category_id: new.category_id,
        };
        for genre_id in &new.genre_ids {
            store.title_genres.push((title.id, *genre_id));
        }
        store.titles.push(title.clone());
        Ok(store.title_read(&title))
    }

    async fn list_titles(&self, query: TitleQuery) -> Result<Vec<TitleRead>, ApiError> {
        let store = self.store.lock().unwrap();
        let name_needle = query.name.as_ref().map(|n| n.to_lowercase());
        let category_id = query
            .category_slug
            .as_ref()
            .and_then(|slug| store.categories.iter().find(|c| &c.slug == slug))
            .map(|c| c.id);
        let genre_id = query
            .genre_slug
            .as_ref()
            .and_then(|slug| store.genres.iter().find(|g| &g.slug == slug))
            .map(|g| g.id);

        let mut titles: Vec<TitleRead> = store
            .titles
            .iter()
            .filter(|t| {
                if let Some(n) = &name_needle {
                    if !t.name.to_lowercase().contains(n) {
                        return false;
                    }
                }
                if let Some(y) = query.year {
                    if t.year != Some(y) {
                        return false;
                    }
                }
                if query.category_slug.is_some() {
                    match category_id {
                        Some(cid) => {
                            if t.category_id != Some(cid) {
                                return false;
                            }
                        }
                        // Unknown slug matches nothing.
                        None => return false,
                    }
                }
                if query.genre_slug.is_some() {
                    match genre_id {
                        Some(gid) => {
                            if !store
                                .title_genres
                                .iter()
                                .any(|(tid, g)| *tid == t.id && *g == gid)
                            {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
                true
            })
            .map(|t| store.title_read(t))
            .collect();
        titles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(titles)
    }

    async fn get_title(&self, id: Uuid) -> Result<Option<TitleRead>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .titles
            .iter()
            .find(|t| t.id == id)
            .map(|t| store.title_read(t)))
    }

    async fn update_title(&self, id: Uuid, patch: TitlePatch) -> Result<TitleRead, ApiError> {
        let mut store = self.store.lock().unwrap();
        if let Some(new_name) = &patch.name {
            if store.titles.iter().any(|t| t.id != id && &t.name == new_name) {
                return Err(ApiError::Conflict(
                    "title with this name already exists".to_string(),
                ));
            }
        }
        {
            let title = store
                .titles
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| ApiError::not_found("title"))?;
            if let Some(v) = patch.name {
                title.name = v;
            }
            if let Some(v) = patch.year {
                title.year = Some(v);
            }
            if let Some(v) = patch.description {
                title.description = Some(v);
            }
            if let Some(v) = patch.category_id {
                title.category_id = Some(v);
            }
        }
        if let Some(genre_ids) = patch.genre_ids {
            store.title_genres.retain(|(tid, _)| *tid != id);
            for genre_id in genre_ids {
                store.title_genres.push((id, genre_id));
            }
        }
        let title = store.titles.iter().find(|t| t.id == id).cloned().unwrap();
        Ok(store.title_read(&title))
    }

    async fn delete_title(&self, id: Uuid) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        if !store.titles.iter().any(|t| t.id == id) {
            return Err(ApiError::not_found("title"));
        }
        store.titles.retain(|t| t.id != id);
        store.title_genres.retain(|(tid, _)| *tid != id);
        store.cascade_reviews(|r| r.title_id != id);
        Ok(())
    }

    async fn create_review(
        &self,
        title_id: Uuid,
        author_id: Uuid,
        text: &str,
        score: i16,
    ) -> Result<ReviewRead, ApiError> {
        let mut store = self.store.lock().unwrap();
        // Check-then-insert is atomic here: both happen under the store lock.
        if store
            .reviews
            .iter()
            .any(|r| r.title_id == title_id && r.author_id == author_id)
        {
            return Err(ApiError::Conflict(
                "you have already reviewed this title".to_string(),
            ));
        }
        let review = Review {
            id: Uuid::new_v4(),
            author_id,
            title_id,
            text: text.to_string(),
            score,
            pub_date: Utc::now(),
        };
        store.reviews.push(review.clone());
        Ok(store.review_read(&review))
    }

    async fn list_reviews(&self, title_id: Uuid) -> Result<Vec<ReviewRead>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut reviews: Vec<&Review> = store
            .reviews
            .iter()
            .filter(|r| r.title_id == title_id)
            .collect();
        reviews.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        Ok(reviews.into_iter().map(|r| store.review_read(r)).collect())
    }

    async fn get_review(
        &self,
        title_id: Uuid,
        review_id: Uuid,
    ) -> Result<Option<ReviewRead>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .reviews
            .iter()
            .find(|r| r.title_id == title_id && r.id == review_id)
            .map(|r| store.review_read(r)))
    }

    async fn update_review(
        &self,
        review_id: Uuid,
        text: Option<String>,
        score: Option<i16>,
    ) -> Result<ReviewRead, ApiError> {
        let mut store = self.store.lock().unwrap();
        let review = {
            let review = store
                .reviews
                .iter_mut()
                .find(|r| r.id == review_id)
                .ok_or_else(|| ApiError::not_found("review"))?;
            if let Some(v) = text {
                review.text = v;
            }
            if let Some(v) = score {
                review.score = v;
            }
            review.clone()
        };
        Ok(store.review_read(&review))
    }

    async fn delete_review(&self, review_id: Uuid) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        if !store.reviews.iter().any(|r| r.id == review_id) {
            return Err(ApiError::not_found("review"));
        }
        store.cascade_reviews(|r| r.id != review_id);
        Ok(())
    }

    async fn create_comment(
        &self,
        review_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> Result<CommentRead, ApiError> {
        let mut store = self.store.lock().unwrap();
        store.next_comment_id += 1;
        let comment = Comment {
            id: store.next_comment_id,
            author_id,
            review_id,
            text: text.to_string(),
            pub_date: Utc::now(),
        };
        store.comments.push(comment.clone());
        Ok(store.comment_read(&comment))
    }

    async fn list_comments(&self, review_id: Uuid) -> Result<Vec<CommentRead>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut comments: Vec<&Comment> = store
            .comments
            .iter()
            .filter(|c| c.review_id == review_id)
            .collect();
        comments.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));
        Ok(comments.into_iter().map(|c| store.comment_read(c)).collect())
    }

    async fn get_comment(
        &self,
        review_id: Uuid,
        comment_id: i64,
    ) -> Result<Option<CommentRead>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .comments
            .iter()
            .find(|c| c.review_id == review_id && c.id == comment_id)
            .map(|c| store.comment_read(c)))
    }

    async fn update_comment(&self, comment_id: i64, text: &str) -> Result<CommentRead, ApiError> {
        let mut store = self.store.lock().unwrap();
        let comment = {
            let comment = store
                .comments
                .iter_mut()
                .find(|c| c.id == comment_id)
                .ok_or_else(|| ApiError::not_found("comment"))?;
            comment.text = text.to_string();
            comment.clone()
        };
        Ok(store.comment_read(&comment))
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        if !store.comments.iter().any(|c| c.id == comment_id) {
            return Err(ApiError::not_found("comment"));
        }
        store.comments.retain(|c| c.id != comment_id);
        Ok(())
    }
}
