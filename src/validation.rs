use chrono::{Datelike, Utc};

use crate::error::ApiError;

/// Field validators shared by the handlers. Each returns the offending field
/// name inside `ApiError::Validation` so callers receive field-level detail.

// Review and comment bodies are capped at the same length.
pub const MAX_TEXT_LENGTH: usize = 250;
pub const MAX_SLUG_LENGTH: usize = 40;

/// A title's year may not lie in the future. Checked at write time against
/// the current calendar year.
pub fn validate_year(year: i32) -> Result<(), ApiError> {
    let current = Utc::now().year();
    if year > current {
        return Err(ApiError::validation(
            "year",
            format!("year cannot be greater than the current year ({current})"),
        ));
    }
    Ok(())
}

/// Review scores are integers in [1, 10].
pub fn validate_score(score: i16) -> Result<(), ApiError> {
    if !(1..=10).contains(&score) {
        return Err(ApiError::validation("score", "score must be between 1 and 10"));
    }
    Ok(())
}

/// Review/comment text: non-empty, at most 250 characters.
pub fn validate_text(text: &str) -> Result<(), ApiError> {
    if text.is_empty() {
        return Err(ApiError::validation("text", "text must not be empty"));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::validation(
            "text",
            format!("text must be at most {MAX_TEXT_LENGTH} characters"),
        ));
    }
    Ok(())
}

/// Slugs are URL-safe: lowercase letters, digits, '-' and '_', at most
/// 40 characters.
pub fn validate_slug(slug: &str) -> Result<(), ApiError> {
    if slug.is_empty() || slug.chars().count() > MAX_SLUG_LENGTH {
        return Err(ApiError::validation(
            "slug",
            format!("slug must be 1..={MAX_SLUG_LENGTH} characters"),
        ));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(ApiError::validation(
            "slug",
            "slug may only contain lowercase letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

/// Minimal well-formedness check for an email address: exactly one '@' with
/// a non-empty local part and a domain containing a dot. Deliberately loose —
/// real verification happens by delivering the confirmation code.
pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.starts_with('.') {
        return Err(ApiError::validation("email", "malformed email address"));
    }
    Ok(())
}

/// Usernames: non-empty, ASCII alphanumerics plus '.', '-', '_', ≤150 chars.
pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() || username.chars().count() > 150 {
        return Err(ApiError::validation(
            "username",
            "username must be 1..=150 characters",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(ApiError::validation(
            "username",
            "username may only contain letters, digits, '.', '-' and '_'",
        ));
    }
    Ok(())
}

/// Entity display names (categories, genres, titles): non-empty, ≤200 chars.
pub fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::validation("name", "name must not be empty"));
    }
    if name.chars().count() > 200 {
        return Err(ApiError::validation("name", "name must be at most 200 characters"));
    }
    Ok(())
}
