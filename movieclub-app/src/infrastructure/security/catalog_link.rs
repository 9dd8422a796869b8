use crate::domain::CatalogRef;
use movieclub_errors::{ClubError, ClubResult};
use regex_lite::Regex;
use std::sync::LazyLock;

const MAX_URL_LENGTH: usize = 2048;
const MAX_TITLE_LENGTH: usize = 500;
const MAX_NUMERIC_ID_LENGTH: usize = 12;
const CATALOG_HOST: &str = "kinopoisk.ru";
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

static CATALOG_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(film|series)/(\d+)(?:/.*)?$").expect("catalog path pattern")
});

static CATALOG_URL_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?kinopoisk\.ru/(?:film|series)/\d+/?\S*")
        .expect("catalog url pattern")
});

/// A movie reference resolved from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLink {
    pub catalog_ref: CatalogRef,
    /// Canonical catalog page, e.g. `https://www.kinopoisk.ru/film/326/`.
    pub url: String,
}

impl CatalogLink {
    /// Accepts a catalog page URL or a bare numeric catalog id.
    pub fn parse(input: &str) -> ClubResult<Self> {
        let input = input.trim();

        if input.is_empty() {
            return Err(ClubError::Validation("movie link is empty".to_string()));
        }

        if input.len() > MAX_URL_LENGTH {
            return Err(ClubError::Validation("movie link is too long".to_string()));
        }

        if input.len() <= MAX_NUMERIC_ID_LENGTH && input.chars().all(|c| c.is_ascii_digit()) {
            return Self::from_id("film", input);
        }

        let parsed = url::Url::parse(input)
            .map_err(|_| ClubError::Validation(format!("{input:?} is not a movie link")))?;

        let scheme = parsed.scheme().to_lowercase();
        if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
            return Err(ClubError::Validation(
                "only http and https links are accepted".to_string(),
            ));
        }

        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let on_catalog = host == CATALOG_HOST || host.ends_with(&format!(".{CATALOG_HOST}"));
        if !on_catalog {
            return Err(ClubError::Validation(format!(
                "{host:?} is not a {CATALOG_HOST} link"
            )));
        }

        let captures = CATALOG_PATH.captures(parsed.path()).ok_or_else(|| {
            ClubError::Validation(format!("{input:?} does not point at a movie page"))
        })?;
        let kind = captures.get(1).map_or("film", |m| m.as_str());
        let id = captures.get(2).map_or("", |m| m.as_str());
        Self::from_id(kind, id)
    }

    /// Every catalog link in `text`, in order of appearance, without duplicates.
    pub fn extract_all(text: &str) -> Vec<Self> {
        let mut links: Vec<Self> = Vec::new();
        for found in CATALOG_URL_IN_TEXT.find_iter(text) {
            match Self::parse(found.as_str()) {
                Ok(link) if !links.contains(&link) => links.push(link),
                Ok(_) => {}
                Err(err) => tracing::debug!(error = %err, "Skipping malformed catalog link"),
            }
        }
        links
    }

    /// Split "`<link or id> <title>`" into the link and a sanitized title.
    /// The title is empty when the text holds only the link.
    pub fn split_title(text: &str) -> ClubResult<(Self, String)> {
        let text = text.trim();
        let (head, rest) = text
            .split_once(char::is_whitespace)
            .unwrap_or((text, ""));
        let link = Self::parse(head)?;
        Ok((link, sanitize_title(rest)))
    }

    fn from_id(kind: &str, id: &str) -> ClubResult<Self> {
        Ok(Self {
            catalog_ref: CatalogRef::new(id)?,
            url: format!("https://www.{CATALOG_HOST}/{kind}/{id}/"),
        })
    }
}

/// Trim, drop control characters, cap the length.
pub fn sanitize_title(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_TITLE_LENGTH)
        .collect::<String>()
        .trim()
        .to_string()
}
