//! RSS/Atom feed tier.
//!
//! Feeds skip the page chrome entirely, so a matching item is turned into a
//! small HTML document and handed to the extractor like any other page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::error::AppError;
use quarry_core::models::{ExtractionRequest, Tier};
use quarry_core::variants::{TermVariants, subject_variants};
use quarry_core::traits::{FetchedPage, Fetcher, TierContext, TierOutput, TierStrategy};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use url::Url;

use crate::extractor::parse_date;

/// Paths tried when the site directory has no feed URL.
pub const COMMON_FEED_PATHS: &[&str] = &[
    "/feed",
    "/rss",
    "/rss.xml",
    "/feed.xml",
    "/atom.xml",
    "/feeds/posts/default",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Full content when the feed carries it, otherwise the summary.
    pub content: String,
}

impl FeedItem {
    /// A minimal HTML page carrying the item's metadata and body.
    pub fn to_html(&self) -> String {
        let mut head = format!("<title>{}</title>", escape(&self.title));
        if let Some(author) = &self.author {
            head.push_str(&format!(r#"<meta name="author" content="{}">"#, escape(author)));
        }
        if let Some(published) = self.published {
            head.push_str(&format!(
                r#"<meta property="article:published_time" content="{}">"#,
                published.to_rfc3339()
            ));
        }

        let body = if self.content.contains('<') {
            self.content.clone()
        } else {
            self.content
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| format!("<p>{}</p>", escape(p)))
                .collect()
        };

        format!(
            "<html><head>{head}</head><body><article><h1>{}</h1>{body}</article></body></html>",
            escape(&self.title)
        )
    }

    fn links_to(&self, target: &str) -> bool {
        self.link
            .as_deref()
            .is_some_and(|link| same_page(link, target))
    }

    /// Every subject token appears in the title, or every one in the content,
    /// in any of its spellings.
    fn mentions_subject(&self, tokens: &[TermVariants]) -> bool {
        if tokens.is_empty() {
            return false;
        }
        let title = self.title.to_lowercase();
        let content = self.content.to_lowercase();
        tokens.iter().all(|t| t.appears_in(&title)) || tokens.iter().all(|t| t.appears_in(&content))
    }
}

/// Same page modulo scheme, `www.`, trailing slash and fragment.
fn same_page(a: &str, b: &str) -> bool {
    fn key(raw: &str) -> Option<String> {
        let url = Url::parse(raw.trim()).ok()?;
        let host = url.host_str()?.trim_start_matches("www.").to_ascii_lowercase();
        let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
        Some(format!("{host}{}{query}", url.path().trim_end_matches('/')))
    }
    matches!((key(a), key(b)), (Some(x), Some(y)) if x == y)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ItemBuilder {
    item: FeedItem,
    summary: String,
    date: String,
}

impl ItemBuilder {
    fn push_text(&mut self, field: &str, in_author: bool, text: &str) {
        let target = match field {
            "title" => &mut self.item.title,
            "link" => self.item.link.get_or_insert_with(String::new),
            "encoded" | "content" => &mut self.item.content,
            "description" | "summary" => &mut self.summary,
            "creator" | "author" => self.item.author.get_or_insert_with(String::new),
            "name" if in_author => self.item.author.get_or_insert_with(String::new),
            "pubDate" | "published" | "date" | "updated" if self.date.is_empty() => {
                &mut self.date
            }
            _ => return,
        };
        target.push_str(text);
    }

    /// Atom links carry the URL in `href`; prefer the `alternate` one.
    fn atom_link(&mut self, element: &BytesStart<'_>) {
        let mut href = None;
        let mut rel = None;
        for attr in element.attributes().flatten() {
            let value = attr.unescape_value().map(|v| v.into_owned()).ok();
            match attr.key.local_name().as_ref() {
                b"href" => href = value,
                b"rel" => rel = value,
                _ => {}
            }
        }
        if let Some(href) = href
            && rel.as_deref().is_none_or(|r| r == "alternate")
            && self.item.link.is_none()
        {
            self.item.link = Some(href);
        }
    }

    fn finish(self) -> FeedItem {
        let mut item = self.item;
        item.title = item.title.trim().to_string();
        item.link = item.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        item.author = item.author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
        if item.content.trim().is_empty() {
            item.content = self.summary;
        }
        item.content = item.content.trim().to_string();
        item.published = parse_date(&self.date);
        item
    }
}

/// Parse an RSS 2.0, RSS 1.0 or Atom document.
///
/// Returns `ParseError` when the document is not a feed at all.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, AppError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root_seen = false;
    let mut items = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut field = String::new();
    let mut in_author = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if !root_seen {
                    if !matches!(name.as_str(), "rss" | "feed" | "RDF") {
                        return Err(AppError::ParseError(format!("<{name}> is not a feed root")));
                    }
                    root_seen = true;
                    continue;
                }
                match name.as_str() {
                    "item" | "entry" => current = Some(ItemBuilder::default()),
                    "author" => {
                        in_author = true;
                        field = name;
                    }
                    "link" => {
                        if let Some(builder) = current.as_mut() {
                            builder.atom_link(&e);
                        }
                        field = name;
                    }
                    _ => field = name,
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link"
                    && let Some(builder) = current.as_mut()
                {
                    builder.atom_link(&e);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(builder) = current.as_mut() {
                    let text = e.unescape().unwrap_or_default();
                    builder.push_text(&field, in_author, &text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(builder) = current.as_mut() {
                    builder.push_text(&field, in_author, &String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(builder) = current.take() {
                        items.push(builder.finish());
                    }
                    field.clear();
                }
                b"author" => {
                    in_author = false;
                    field.clear();
                }
                _ => field.clear(),
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(AppError::ParseError(format!("Feed XML error: {e}"))),
            _ => {}
        }
    }

    if !root_seen {
        return Err(AppError::ParseError("Document has no feed root".into()));
    }
    Ok(items)
}

/// Items relevant to the request: exact link matches first, then items
/// that mention the subject.
pub fn matching_items<'a>(items: &'a [FeedItem], request: &ExtractionRequest) -> Vec<&'a FeedItem> {
    let tokens = subject_variants(request);
    let exact = items.iter().filter(|i| i.links_to(request.url()));
    let topical = items
        .iter()
        .filter(|i| !i.links_to(request.url()) && i.mentions_subject(&tokens));
    exact.chain(topical).collect()
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Tier 3: read the article out of the site's syndication feed.
pub struct FeedTier<F> {
    fetcher: F,
    max_items: usize,
}

impl<F: Fetcher> FeedTier<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            max_items: 3,
        }
    }

    fn feed_urls(ctx: &TierContext<'_>) -> Vec<String> {
        if let Some(feed) = ctx.site.and_then(|s| s.feed_url.clone()) {
            return vec![feed];
        }
        let Ok(base) = Url::parse(ctx.request.url()) else {
            return Vec::new();
        };
        COMMON_FEED_PATHS
            .iter()
            .filter_map(|p| base.join(p).ok())
            .map(|u| u.to_string())
            .collect()
    }
}

#[async_trait]
impl<F: Fetcher + 'static> TierStrategy for FeedTier<F> {
    fn tier(&self) -> Tier {
        Tier::Feed
    }

    async fn fetch(&self, ctx: &TierContext<'_>) -> Result<TierOutput, AppError> {
        for (i, feed_url) in Self::feed_urls(ctx).into_iter().enumerate() {
            // The first candidate uses the token the orchestrator already took.
            if i > 0 {
                ctx.throttle(&feed_url).await;
            }
            let body = match self.fetcher.fetch(&feed_url).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(url = %feed_url, error = %e, "Feed candidate failed");
                    continue;
                }
            };
            let items = match parse_feed(&body) {
                Ok(items) => items,
                Err(e) => {
                    tracing::debug!(url = %feed_url, error = %e, "Not a feed");
                    continue;
                }
            };

            tracing::debug!(url = %feed_url, items = items.len(), "Feed found");
            let pages: Vec<FetchedPage> = matching_items(&items, ctx.request)
                .into_iter()
                .take(self.max_items)
                .map(|item| {
                    let url = item.link.clone().unwrap_or_else(|| feed_url.clone());
                    FetchedPage::new(url, item.to_html())
                })
                .collect();

            if pages.is_empty() {
                return Err(AppError::NotApplicable(format!(
                    "feed {feed_url} has no item about the requested subject"
                )));
            }
            return Ok(TierOutput {
                pages,
                provider: Some(feed_url),
            });
        }

        Err(AppError::NotApplicable("no feed found for site".into()))
    }
}
