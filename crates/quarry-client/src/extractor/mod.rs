//! HTML content extraction.
//!
//! [`HtmlExtractor`] runs an ordered list of [`ExtractionStrategy`]
//! heuristics over a page, gates each candidate, and stops at the first one
//! the gate accepts. Title, byline and publication date are read alongside.

pub mod dom;
pub mod metadata;
pub mod strategies;

use quarry_core::models::{ExtractedContent, ExtractionCandidate, ExtractionRequest};
use quarry_core::quality::{QualityConfig, QualityGate};
use quarry_core::traits::ContentExtractor;
use quarry_core::util::normalize_whitespace;
use scraper::Html;

pub use metadata::{PageMetadata, extract_metadata, parse_date};
pub use strategies::{
    ArticleBody, ExtractionStrategy, FilteredFullText, LongestBlock, ParagraphDensity,
    TitleAnchored, default_strategies,
};

/// Strategy-driven extractor for HTML pages.
pub struct HtmlExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    gate: QualityGate,
}

impl HtmlExtractor {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            strategies: default_strategies(),
            gate: QualityGate::new(config),
        }
    }

    /// Replace the default strategy list entirely.
    pub fn with_strategies(
        config: QualityConfig,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        Self {
            strategies,
            gate: QualityGate::new(config),
        }
    }

    /// Append a strategy after the built-in ones.
    pub fn with_strategy(mut self, strategy: impl ExtractionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

impl ContentExtractor for HtmlExtractor {
    fn extract(&self, markup: &str, request: &ExtractionRequest) -> ExtractedContent {
        let document = Html::parse_document(markup);
        let meta = extract_metadata(&document);

        let mut candidates = Vec::new();
        for strategy in &self.strategies {
            let Some(raw) = strategy.extract(markup, &document) else {
                continue;
            };
            let text = normalize_whitespace(&raw);
            if text.is_empty() {
                continue;
            }

            let verdict = self.gate.evaluate(&text, request, meta.published);
            let passes = verdict.passes();
            tracing::debug!(
                method = strategy.name(),
                chars = text.chars().count(),
                score = verdict.score,
                passes,
                "Extraction candidate"
            );
            candidates.push(ExtractionCandidate {
                method: strategy.name().to_string(),
                text,
                score: verdict.score,
                passes_gate: passes,
                rejection: verdict.rejection,
            });
            if passes {
                break;
            }
        }

        ExtractedContent {
            candidates,
            title: meta.title,
            byline: meta.byline,
            published: meta.published,
        }
    }
}

#[cfg(test)]
mod tests {
    use quarry_core::quality::Rejection;

    use super::*;

    fn request() -> ExtractionRequest {
        ExtractionRequest::builder("https://example.com/reviews/mazda-cx-5")
            .subjects(["Mazda", "CX-5"])
            .build()
            .unwrap()
    }

    fn story_paragraphs(n: usize) -> String {
        (1..=n)
            .map(|i| {
                format!(
                    "<p>Paragraph {i} of the long-term test describes how the car handled \
                     another month of commuting and weekend trips.</p>"
                )
            })
            .collect()
    }

    fn review_page(head: &str) -> String {
        format!(
            r#"<html><head>{head}</head><body>
            <nav><a href="/">Home</a> <a href="/reviews">Reviews</a></nav>
            <article><h1>Mazda CX-5 long-term test</h1>{}</article>
            </body></html>"#,
            story_paragraphs(6)
        )
    }

    #[test]
    fn primary_strategy_accepts_article() {
        let content = HtmlExtractor::default().extract(&review_page(""), &request());
        let accepted = content.accepted().unwrap();
        assert_eq!(accepted.method, "article-body");
        assert!(accepted.text.starts_with("Mazda CX-5 long-term test"));
        assert!(!accepted.text.contains("Home"));
        assert_eq!(content.candidates.len(), 1);
    }

    #[test]
    fn falls_back_to_alternatives_when_primary_is_rejected() {
        let markup = format!(
            r#"<html><body>
            <article><p>Short teaser about the Mazda CX-5 that links elsewhere.</p></article>
            <div id="story"><h1>Mazda CX-5 long-term test</h1>{}</div>
            </body></html>"#,
            story_paragraphs(6)
        );
        let content = HtmlExtractor::default().extract(&markup, &request());

        assert_eq!(content.candidates[0].method, "article-body");
        assert!(matches!(
            content.candidates[0].rejection,
            Some(Rejection::TooShort { .. })
        ));
        assert_eq!(content.accepted().unwrap().method, "title-anchored");
    }

    #[test]
    fn navigation_page_yields_nothing_acceptable() {
        let markup = r#"<html><body><nav><ul>
            <li><a href="/">Home</a></li><li><a href="/news">News</a></li>
            <li><a href="/reviews">Reviews</a></li><li><a href="/contact">Contact us</a></li>
            </ul></nav><div class="menu"><a href="/mazda">Mazda</a></div></body></html>"#;
        let content = HtmlExtractor::default().extract(markup, &request());
        assert!(content.accepted().is_none());
    }

    #[test]
    fn metadata_is_attached() {
        let head = r#"<meta name="author" content="Jane Doe">
            <meta property="article:published_time" content="2024-05-01T09:00:00Z">"#;
        let content = HtmlExtractor::default().extract(&review_page(head), &request());
        assert_eq!(content.byline.as_deref(), Some("Jane Doe"));
        assert_eq!(content.title.as_deref(), Some("Mazda CX-5 long-term test"));
        assert!(content.published.is_some());
    }

    #[test]
    fn publication_outside_window_rejects_every_candidate() {
        let head = r#"<meta property="article:published_time" content="2019-05-01T09:00:00Z">"#;
        let request = ExtractionRequest::builder("https://example.com/reviews/mazda-cx-5")
            .subjects(["Mazda", "CX-5"])
            .published_between(Some("2024-01-01T00:00:00Z".parse().unwrap()), None)
            .build()
            .unwrap();
        let content = HtmlExtractor::default().extract(&review_page(head), &request);

        assert!(content.accepted().is_none());
        assert!(matches!(
            content.candidates[0].rejection,
            Some(Rejection::OutsideDateWindow { .. })
        ));
    }

    struct Fixed;

    impl ExtractionStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn extract(&self, _markup: &str, _document: &Html) -> Option<String> {
            Some(format!("Mazda CX-5 {}", "steady prose ".repeat(60)))
        }
    }

    #[test]
    fn custom_strategies_plug_in() {
        let extractor = HtmlExtractor::with_strategies(QualityConfig::default(), Vec::new())
            .with_strategy(Fixed);
        assert_eq!(extractor.strategy_names(), vec!["fixed"]);
        let content = extractor.extract("<html></html>", &request());
        assert_eq!(content.accepted().unwrap().method, "fixed");
    }
}
