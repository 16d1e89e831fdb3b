use chrono::{Datelike, Utc};
use reviewdb::validation::{
    MAX_TEXT_LENGTH, validate_email, validate_name, validate_score, validate_slug, validate_text,
    validate_username, validate_year,
};

#[test]
fn year_in_the_future_is_rejected() {
    let next_year = Utc::now().year() + 1;
    assert!(validate_year(next_year).is_err());
}

#[test]
fn current_and_past_years_are_accepted() {
    let current = Utc::now().year();
    assert!(validate_year(current).is_ok());
    assert!(validate_year(1925).is_ok());
}

#[test]
fn score_bounds_are_inclusive() {
    assert!(validate_score(1).is_ok());
    assert!(validate_score(10).is_ok());
    assert!(validate_score(0).is_err());
    assert!(validate_score(11).is_err());
}

#[test]
fn text_must_be_nonempty_and_bounded() {
    assert!(validate_text("").is_err());
    assert!(validate_text("fine").is_ok());

    let at_limit = "x".repeat(MAX_TEXT_LENGTH);
    assert!(validate_text(&at_limit).is_ok());

    let over_limit = "x".repeat(MAX_TEXT_LENGTH + 1);
    assert!(validate_text(&over_limit).is_err());
}

#[test]
fn slug_charset_is_enforced() {
    assert!(validate_slug("sci-fi_2").is_ok());
    assert!(validate_slug("Sci-Fi").is_err());
    assert!(validate_slug("with space").is_err());
    assert!(validate_slug("").is_err());
    assert!(validate_slug(&"a".repeat(41)).is_err());
}

#[test]
fn email_well_formedness() {
    assert!(validate_email("reader@example.com").is_ok());
    assert!(validate_email("no-at-sign").is_err());
    assert!(validate_email("@example.com").is_err());
    assert!(validate_email("reader@nodot").is_err());
    assert!(validate_email("reader@.com").is_err());
}

#[test]
fn username_charset_is_enforced() {
    assert!(validate_username("jane.doe-42_x").is_ok());
    assert!(validate_username("jane doe").is_err());
    assert!(validate_username("").is_err());
    assert!(validate_username(&"a".repeat(151)).is_err());
}

#[test]
fn display_names_are_bounded() {
    assert!(validate_name("Books").is_ok());
    assert!(validate_name("").is_err());
    assert!(validate_name(&"n".repeat(201)).is_err());
}
