//! Index/category discovery: when the request URL is a listing page, follow
//! the links on it that look like the wanted article.

use std::sync::LazyLock;

use async_trait::async_trait;
use quarry_core::error::AppError;
use quarry_core::models::{ExtractionRequest, Tier};
use quarry_core::traits::{TierContext, TierOutput, TierStrategy};
use quarry_core::util::host_key;
use quarry_core::variants::subject_variants;
use regex::Regex;
use scraper::Html;
use url::Url;

use crate::extractor::dom::{element_text, select_all};
use crate::tiers::FollowUp;

/// Path segments of listing pages.
pub const INDEX_PATH_PATTERNS: &[&str] = &[
    "/reviews",
    "/car-reviews",
    "/road-tests",
    "/first-drives",
    "/test-drives",
    "/auto-reviews",
    "/news",
    "/category/",
    "/tag/",
    "/topics/",
];

/// Words in a link that suggest a full article rather than a listing.
pub const REVIEW_KEYWORDS: &[&str] = &[
    "review",
    "first drive",
    "first-drive",
    "test drive",
    "test-drive",
    "road test",
    "road-test",
    "long-term",
    "comparison",
    "hands-on",
    "drive",
    "test",
];

/// How many discovered links are followed.
pub const MAX_FOLLOWED_LINKS: usize = 3;

static ARTICLE_SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/\d{4}/|/\d{4}-\d{2}|/article/|/\d{5,}|\.html?$")
        .expect("hardcoded regex pattern is valid")
});

/// What a URL path says about the page behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Matches a listing pattern and carries no article segment.
    Index,
    /// Dated, numbered or `/article/` path.
    Article,
    /// Nothing conclusive; the page itself has to be inspected.
    Unknown,
}

pub fn classify_path(url: &str) -> PathKind {
    let Ok(parsed) = Url::parse(url) else {
        return PathKind::Unknown;
    };
    let path = parsed.path().to_ascii_lowercase();
    if ARTICLE_SEGMENT_REGEX.is_match(&path) {
        return PathKind::Article;
    }
    let as_dir = format!("{}/", path.trim_end_matches('/'));
    let is_index = INDEX_PATH_PATTERNS.iter().any(|pattern| {
        // "/reviews" must match "/reviews" or "/reviews/..." but not "/reviewsx".
        let pattern_dir = format!("{}/", pattern.trim_end_matches('/'));
        as_dir.contains(&pattern_dir)
    });
    if is_index {
        // A long slug after the listing segment is the article itself.
        let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        if last.matches('-').count() >= 3 {
            return PathKind::Article;
        }
        return PathKind::Index;
    }
    PathKind::Unknown
}

/// A page with many links and almost no prose is a listing.
pub fn looks_like_index(document: &Html) -> bool {
    let links = select_all(document, "a[href]").len();
    let prose = select_all(document, "p")
        .into_iter()
        .filter(|p| element_text(*p).chars().count() > 80)
        .count();
    links >= 20 && prose <= 3
}

/// One scored link from a listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLink {
    pub url: String,
    pub text: String,
    pub score: u32,
}

/// Score same-host links against the request's subject.
///
/// Only links that mention at least one subject token (in the anchor text or
/// the href) are kept, best first.
pub fn score_links(markup: &str, page_url: &str, request: &ExtractionRequest) -> Vec<ScoredLink> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let page_host = host_key(page_url);
    let tokens = subject_variants(request);
    if tokens.is_empty() {
        return Vec::new();
    }

    let document = Html::parse_document(markup);
    let mut scored: Vec<ScoredLink> = Vec::new();

    for anchor in select_all(&document, "a[href]") {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        let url = resolved.to_string();
        if host_key(&url) != page_host || url == base.as_str() {
            continue;
        }

        let text = element_text(anchor);
        let text_lower = text.to_lowercase();
        let href_lower = resolved.path().to_lowercase();

        let in_text = tokens.iter().filter(|t| t.appears_in(&text_lower)).count();
        let in_href = tokens
            .iter()
            .filter(|t| {
                t.forms()
                    .iter()
                    .any(|f| href_lower.contains(&f.replace(' ', "-")))
            })
            .count();
        if in_text == 0 && in_href == 0 {
            continue;
        }
        let keywords_in_text = REVIEW_KEYWORDS
            .iter()
            .filter(|k| text_lower.contains(*k))
            .count();
        let keywords_in_href = REVIEW_KEYWORDS
            .iter()
            .filter(|k| href_lower.contains(*k))
            .count();

        let mut score = 3 * in_text + 2 * keywords_in_text + in_href + keywords_in_href;
        if in_text == tokens.len() {
            score += 10;
        }
        let score = score as u32;

        match scored.iter_mut().find(|s| s.url == url) {
            Some(existing) if existing.score < score => {
                existing.score = score;
                existing.text = text;
            }
            Some(_) => {}
            None => scored.push(ScoredLink { url, text, score }),
        }
    }

    // Stable sort keeps page order among equal scores.
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored
}

/// Tier 5: crawl one hop out from a listing page.
pub struct IndexDiscoveryTier {
    follow_up: FollowUp,
}

impl IndexDiscoveryTier {
    pub fn new(follow_up: FollowUp) -> Self {
        Self { follow_up }
    }
}

#[async_trait]
impl TierStrategy for IndexDiscoveryTier {
    fn tier(&self) -> Tier {
        Tier::IndexDiscovery
    }

    async fn fetch(&self, ctx: &TierContext<'_>) -> Result<TierOutput, AppError> {
        let url = ctx.request.url();
        let kind = classify_path(url);
        if kind == PathKind::Article {
            return Err(AppError::NotApplicable(format!("{url} is an article, not a listing")));
        }

        let markup = self.follow_up.fetch_direct(ctx, url).await?;
        if kind == PathKind::Unknown && !looks_like_index(&Html::parse_document(&markup)) {
            return Err(AppError::NotApplicable(format!("{url} does not look like a listing")));
        }

        let links: Vec<String> = score_links(&markup, url, ctx.request)
            .into_iter()
            .take(MAX_FOLLOWED_LINKS)
            .map(|l| l.url)
            .collect();
        if links.is_empty() {
            return Err(AppError::NotApplicable(format!(
                "no link on {url} mentions the subject"
            )));
        }
        tracing::debug!(%url, found = links.len(), "Following links from listing page");

        let pages = self.follow_up.fetch_all(ctx, &links).await?;
        Ok(TierOutput {
            pages,
            provider: None,
        })
    }
}
