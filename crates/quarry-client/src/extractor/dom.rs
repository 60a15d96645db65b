//! Small DOM helpers shared by the extraction strategies.

use scraper::{ElementRef, Html, Selector};

/// Elements whose text is never article content.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "nav", "aside", "footer",
    "header", "form", "button", "select", "figure", "figcaption",
];

/// Elements that start a new line of text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "pre", "br", "tr", "table", "dd", "dt",
];

/// Class/id words that mark page chrome rather than content.
const CHROME_WORDS: &[&str] = &[
    "sidebar", "related", "newsletter", "cookie", "cookies", "share", "social", "comments",
    "comment", "promo", "advert", "ad", "ads", "breadcrumb", "breadcrumbs", "menu", "nav",
    "navbar", "subscribe", "popup", "modal", "footer", "header", "trending",
];

/// Paragraphs shorter than this are captions, datelines or buttons.
pub const MIN_PARAGRAPH_CHARS: usize = 20;

/// Every element matching `css`, or nothing if the selector does not parse.
pub fn select_all<'a>(root: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => root.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn select_first<'a>(root: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    root.select(&selector).next()
}

/// Descendants of `element` matching `css`.
pub fn select_within<'a>(element: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => element.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

/// Whitespace-collapsed text of an element, including hidden children.
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True if the element's class or id names it as navigation, sidebar, ads...
pub fn is_chrome(element: ElementRef<'_>) -> bool {
    let value = element.value();
    let name = value.name();
    if SKIP_TAGS.contains(&name) {
        return true;
    }
    let role = value.attr("role").unwrap_or_default();
    if matches!(role, "navigation" | "banner" | "contentinfo" | "complementary") {
        return true;
    }
    let markers = [value.attr("class"), value.attr("id")];
    let named_as_chrome = markers.into_iter().flatten().any(|attr| {
        attr.to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| CHROME_WORDS.contains(&word))
    });
    // Wrappers like `<div class="has-sidebar">` still hold the story.
    named_as_chrome && direct_paragraphs(element).len() < 2
}

/// Text a reader would see inside `element`, one line per block element,
/// skipping scripts, navigation and other page chrome.
pub fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_visible(element, &mut out);
    out
}

fn collect_visible(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if is_chrome(child_el) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&child_el.value().name());
            if block {
                out.push('\n');
            }
            collect_visible(child_el, out);
            if block {
                out.push('\n');
            }
        }
    }
}

/// Text of the `<p>` elements below `element` that are not inside page
/// chrome, one paragraph per block.
pub fn paragraph_text(element: ElementRef<'_>) -> String {
    select_within(element, "p")
        .into_iter()
        .filter(|p| !has_chrome_ancestor(*p, element))
        .map(element_text)
        .filter(|t| t.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Direct `<p>` children of `element` that carry real text.
pub fn direct_paragraphs(element: ElementRef<'_>) -> Vec<String> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|c| c.value().name() == "p")
        .map(element_text)
        .filter(|t| t.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect()
}

/// True if the element, or anything between it and `<body>`, is chrome.
pub fn in_chrome(element: ElementRef<'_>) -> bool {
    if is_chrome(element) {
        return true;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|a| !matches!(a.value().name(), "body" | "html"))
        .any(is_chrome)
}

fn has_chrome_ancestor(node: ElementRef<'_>, stop: ElementRef<'_>) -> bool {
    for ancestor in node.ancestors().filter_map(ElementRef::wrap) {
        if ancestor == stop {
            return false;
        }
        if is_chrome(ancestor) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_text_skips_chrome() {
        let doc = Html::parse_document(
            r#"<body><nav>Home Reviews</nav><div class="post"><p>Body text here.</p>
            <div class="related-posts">Other story</div><script>var x = 1;</script></div></body>"#,
        );
        let body = select_first(&doc, "body").unwrap();
        let text = visible_text(body);
        assert!(text.contains("Body text here."));
        assert!(!text.contains("Home Reviews"));
        assert!(!text.contains("Other story"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn paragraph_text_drops_short_and_sidebar_paragraphs() {
        let doc = Html::parse_document(
            r#"<article><p>Photo: Mazda</p>
            <p>The CX-5 rides well and steers with real precision.</p>
            <aside><p>This paragraph lives in the sidebar, not the story.</p></aside></article>"#,
        );
        let article = select_first(&doc, "article").unwrap();
        let text = paragraph_text(article);
        assert_eq!(text, "The CX-5 rides well and steers with real precision.");
    }

    #[test]
    fn chrome_detection_uses_whole_words() {
        let doc = Html::parse_document(
            r#"<div id="a" class="share-buttons"></div><div id="b" class="shared-content"></div>"#,
        );
        assert!(is_chrome(select_first(&doc, "#a").unwrap()));
        assert!(!is_chrome(select_first(&doc, "#b").unwrap()));
    }

    #[test]
    fn invalid_selectors_match_nothing() {
        let doc = Html::parse_document("<p>x</p>");
        assert!(select_all(&doc, "p[").is_empty());
        assert!(select_first(&doc, "p[").is_none());
    }
}
