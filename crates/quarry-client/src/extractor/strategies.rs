//! Pluggable heuristics that pull article text out of a parsed page.
//!
//! Each strategy sees the same markup and parsed document and returns its
//! best guess at the article body, or `None` when it finds nothing usable.
//! The extractor runs them in order and lets the quality gate decide.

use std::sync::LazyLock;

use htmd::HtmlToMarkdown;
use quarry_core::quality::DEFAULT_BOILERPLATE_MARKERS;
use regex::Regex;
use scraper::{ElementRef, Html};

use super::dom::{
    direct_paragraphs, element_text, in_chrome, paragraph_text, select_all, select_first,
    visible_text,
};

/// Turns markup into candidate article text.
pub trait ExtractionStrategy: Send + Sync {
    /// Short identifier reported as the candidate's method.
    fn name(&self) -> &'static str;

    fn extract(&self, markup: &str, document: &Html) -> Option<String>;
}

/// Prepend the page heading unless the body already starts with it.
fn with_heading(heading: Option<String>, body: String) -> String {
    match heading {
        Some(h) if !h.is_empty() && !body.starts_with(&h) => format!("{h}\n\n{body}"),
        _ => body,
    }
}

fn heading(document: &Html) -> Option<String> {
    select_first(document, "h1").map(element_text)
}

// ---------------------------------------------------------------------------
// Article body
// ---------------------------------------------------------------------------

/// Content containers, most specific signal first.
const ARTICLE_SELECTORS: &[&str] = &[
    "[itemprop=articleBody]",
    "article",
    ".article-content",
    ".article-body",
    ".post-content",
    ".entry-content",
    "main",
    "div.article",
    "div.post",
    "div.entry",
    "div.content",
];

/// A container with less text than this is probably a teaser card.
const CONTAINER_MIN_CHARS: usize = 200;

/// Paragraph text of the best semantic or well-known content container.
pub struct ArticleBody;

impl ExtractionStrategy for ArticleBody {
    fn name(&self) -> &'static str {
        "article-body"
    }

    fn extract(&self, _markup: &str, document: &Html) -> Option<String> {
        let mut fallback: Option<String> = None;

        for css in ARTICLE_SELECTORS {
            let best = select_all(document, css)
                .into_iter()
                .filter(|el| !in_chrome(*el))
                .map(paragraph_text)
                .max_by_key(|text| text.chars().count());
            let Some(text) = best.filter(|t| !t.is_empty()) else {
                continue;
            };
            if text.chars().count() >= CONTAINER_MIN_CHARS {
                return Some(with_heading(heading(document), text));
            }
            if fallback.as_ref().is_none_or(|f| f.len() < text.len()) {
                fallback = Some(text);
            }
        }

        fallback.map(|text| with_heading(heading(document), text))
    }
}

// ---------------------------------------------------------------------------
// Title anchored
// ---------------------------------------------------------------------------

const TITLE_ANCESTOR_LEVELS: usize = 6;
const TITLE_BLOCK_MIN_CHARS: usize = 400;

/// Walks outward from the page heading until the enclosing block holds a
/// story's worth of paragraphs.
pub struct TitleAnchored;

impl ExtractionStrategy for TitleAnchored {
    fn name(&self) -> &'static str {
        "title-anchored"
    }

    fn extract(&self, _markup: &str, document: &Html) -> Option<String> {
        let anchor = select_all(document, "h1")
            .into_iter()
            .find(|h| !in_chrome(*h))
            .or_else(|| select_first(document, "h2"))?;
        let title = element_text(anchor);

        let mut best = String::new();
        for ancestor in anchor
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take(TITLE_ANCESTOR_LEVELS)
        {
            if matches!(ancestor.value().name(), "body" | "html") {
                break;
            }
            let text = paragraph_text(ancestor);
            if text.chars().count() >= TITLE_BLOCK_MIN_CHARS {
                return Some(with_heading(Some(title), text));
            }
            if text.len() > best.len() {
                best = text;
            }
        }

        (!best.is_empty()).then(|| with_heading(Some(title), best))
    }
}

// ---------------------------------------------------------------------------
// Paragraph density
// ---------------------------------------------------------------------------

const DENSITY_BLOCKS: &str = "div, section, article, main, td";

/// Scores every block by its direct paragraphs and keeps the densest.
pub struct ParagraphDensity;

impl ParagraphDensity {
    fn score(paragraphs: &[String]) -> usize {
        let chars: usize = paragraphs.iter().map(|p| p.chars().count()).sum();
        paragraphs.len() * 100 + chars
    }
}

impl ExtractionStrategy for ParagraphDensity {
    fn name(&self) -> &'static str {
        "paragraph-density"
    }

    fn extract(&self, _markup: &str, document: &Html) -> Option<String> {
        let best = select_all(document, DENSITY_BLOCKS)
            .into_iter()
            .filter(|el| !in_chrome(*el))
            .map(direct_paragraphs)
            .filter(|paragraphs| !paragraphs.is_empty())
            .max_by_key(|paragraphs| Self::score(paragraphs))?;
        Some(best.join("\n\n"))
    }
}

// ---------------------------------------------------------------------------
// Filtered full text
// ---------------------------------------------------------------------------

static IMAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("hardcoded regex pattern is valid")
});

static LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("hardcoded regex pattern is valid")
});

static NAV_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(home|menu|search|sign in|sign up|log ?in|register|subscribe|share|follow us|skip to|back to top|read more|next|previous|advertisement|close)\b.{0,40}$",
    )
    .expect("hardcoded regex pattern is valid")
});

static MARKUP_PREFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#{1,6}|>|[*+-]|\d+\.)\s+").expect("hardcoded regex pattern is valid")
});

/// List items shorter than this are menu entries.
const MIN_LIST_ITEM_CHARS: usize = 25;

/// All visible text as Markdown, minus navigation and boilerplate lines.
pub struct FilteredFullText {
    converter: HtmlToMarkdown,
}

impl FilteredFullText {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form", "button",
            ])
            .build();
        Self { converter }
    }

    fn clean_line(line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let without_images = IMAGE_REGEX.replace_all(line, "");
        // A line made only of links is a menu or a tag list.
        let link_free = LINK_REGEX.replace_all(&without_images, "");
        if link_free
            .chars()
            .all(|c| c.is_whitespace() || c.is_ascii_punctuation() || c == '|' || c == '·')
        {
            return None;
        }

        let is_list_item = MARKUP_PREFIX_REGEX
            .captures(&without_images)
            .is_some_and(|c| matches!(&c[1], "*" | "+" | "-") || c[1].ends_with('.'));
        let text = LINK_REGEX.replace_all(&without_images, "$1");
        let text = MARKUP_PREFIX_REGEX.replace(&text, "");
        let text = text.replace("**", "").replace("__", "");
        let text = text.trim();

        if text.is_empty() || NAV_LINE_REGEX.is_match(text) {
            return None;
        }
        if is_list_item && text.chars().count() < MIN_LIST_ITEM_CHARS {
            return None;
        }
        let lower = text.to_lowercase();
        if DEFAULT_BOILERPLATE_MARKERS.iter().any(|m| lower.contains(m)) {
            return None;
        }
        Some(text.to_string())
    }
}

impl Default for FilteredFullText {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionStrategy for FilteredFullText {
    fn name(&self) -> &'static str {
        "filtered-full-text"
    }

    fn extract(&self, markup: &str, _document: &Html) -> Option<String> {
        let markdown = match self.converter.convert(markup) {
            Ok(md) => md,
            Err(e) => {
                tracing::debug!(error = %e, "Markdown conversion failed");
                return None;
            }
        };

        let kept: Vec<String> = markdown.lines().filter_map(Self::clean_line).collect();
        (!kept.is_empty()).then(|| kept.join("\n\n"))
    }
}

// ---------------------------------------------------------------------------
// Longest block
// ---------------------------------------------------------------------------

/// Lines shorter than this break a run of prose.
const PROSE_LINE_MIN_CHARS: usize = 25;

/// The largest uninterrupted run of prose-length lines on the page.
pub struct LongestBlock;

impl ExtractionStrategy for LongestBlock {
    fn name(&self) -> &'static str {
        "longest-block"
    }

    fn extract(&self, _markup: &str, document: &Html) -> Option<String> {
        let root = select_first(document, "body")?;
        let text = visible_text(root);

        let mut best: Vec<String> = Vec::new();
        let mut best_chars = 0;
        let mut run: Vec<String> = Vec::new();
        let mut run_chars = 0;

        let lines = text
            .lines()
            .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|l| !l.is_empty());
        for line in lines {
            let chars = line.chars().count();
            if chars >= PROSE_LINE_MIN_CHARS {
                run_chars += chars;
                run.push(line);
                continue;
            }
            if run_chars > best_chars {
                best_chars = run_chars;
                best = std::mem::take(&mut run);
            }
            run.clear();
            run_chars = 0;
        }
        if run_chars > best_chars {
            best = run;
        }

        (!best.is_empty()).then(|| best.join("\n\n"))
    }
}

/// The default strategy order: primary first, then the alternatives.
pub fn default_strategies() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(ArticleBody),
        Box::new(TitleAnchored),
        Box::new(ParagraphDensity),
        Box::new(FilteredFullText::new()),
        Box::new(LongestBlock),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(strategy: &dyn ExtractionStrategy, markup: &str) -> Option<String> {
        let document = Html::parse_document(markup);
        strategy.extract(markup, &document)
    }

    const REVIEW: &str = r#"<html><body>
        <nav><a href="/">Home</a><a href="/reviews">Reviews</a></nav>
        <article>
          <h1>2024 Mazda CX-5 Review</h1>
          <p>The Mazda CX-5 remains one of the most engaging compact crossovers on sale today.</p>
          <p>Its steering is precise and well weighted, and the ride stays composed on rough roads.</p>
          <p>Inside, the cabin feels a class above, with soft materials and a tidy dashboard layout.</p>
          <div class="related-posts"><p>Related: the best family SUVs you can buy this year.</p></div>
        </article>
        <footer><p>Copyright 2024 Example Media. All rights reserved.</p></footer>
        </body></html>"#;

    #[test]
    fn article_body_reads_paragraphs_of_article() {
        let text = run(&ArticleBody, REVIEW).unwrap();
        assert!(text.starts_with("2024 Mazda CX-5 Review"));
        assert!(text.contains("precise and well weighted"));
        assert!(!text.contains("family SUVs"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn article_body_needs_a_container() {
        assert!(run(&ArticleBody, "<html><body><p>Loose paragraph with enough text.</p></body></html>").is_none());
    }

    #[test]
    fn title_anchored_finds_story_next_to_heading() {
        let markup = r#"<html><body>
            <div class="card"><p>A teaser for a completely different story here.</p></div>
            <div id="x"><div><h1>Long Term Test</h1></div>
              <p>First paragraph of the long term test covers twelve months of ownership.</p>
              <p>Second paragraph explains fuel economy figures recorded over that period.</p>
            </div></body></html>"#;
        let text = run(&TitleAnchored, markup).unwrap();
        assert!(text.starts_with("Long Term Test"));
        assert!(text.contains("twelve months"));
        assert!(text.contains("fuel economy"));
        assert!(!text.contains("teaser"));
    }

    #[test]
    fn paragraph_density_prefers_block_with_most_paragraphs() {
        let markup = r#"<html><body>
            <div><p>A single paragraph that is fairly long but stands alone on the page.</p></div>
            <section>
              <p>One of three paragraphs in the densest block of this page.</p>
              <p>Two of three paragraphs in the densest block of this page.</p>
              <p>Three of three paragraphs in the densest block of this page.</p>
            </section></body></html>"#;
        let text = run(&ParagraphDensity, markup).unwrap();
        assert!(text.starts_with("One of three"));
        assert!(!text.contains("stands alone"));
    }

    #[test]
    fn filtered_full_text_drops_menus_and_boilerplate() {
        let markup = r#"<html><body>
            <ul><li><a href="/">Home</a></li><li><a href="/news">News</a></li></ul>
            <p>The <a href="/cx5">CX-5</a> gets a mild update for the new model year.</p>
            <p>Sign up for our newsletter to get the latest reviews.</p>
            <p>Read more</p>
            </body></html>"#;
        let text = run(&FilteredFullText::new(), markup).unwrap();
        assert_eq!(text, "The CX-5 gets a mild update for the new model year.");
    }

    #[test]
    fn longest_block_returns_biggest_run() {
        let markup = r#"<html><body>
            <div>Short</div>
            <div>This line is long enough to count as prose text.</div>
            <div>Tiny</div>
            <div>First of a longer run of prose lines on this page.</div>
            <div>Second of a longer run of prose lines on this page.</div>
            </body></html>"#;
        let text = run(&LongestBlock, markup).unwrap();
        assert_eq!(
            text,
            "First of a longer run of prose lines on this page.\n\nSecond of a longer run of prose lines on this page."
        );
    }

    #[test]
    fn default_order_starts_with_article_body() {
        let names: Vec<&str> = default_strategies().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "article-body",
                "title-anchored",
                "paragraph-density",
                "filtered-full-text",
                "longest-block"
            ]
        );
    }
}
