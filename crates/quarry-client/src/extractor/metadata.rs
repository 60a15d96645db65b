//! Title, byline and publication date discovery.
//!
//! Sources are tried from most to least structured: JSON-LD, then meta
//! tags, then `<time>` and byline elements in the page body.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::Html;
use serde_json::Value;

use super::dom::{element_text, select_all, select_first};

const DATE_KEYS: &[&str] = &["datePublished", "dateCreated", "uploadDate", "dateModified"];

const META_AUTHOR: &[&str] = &[
    r#"meta[name="author"]"#,
    r#"meta[property="article:author"]"#,
    r#"meta[name="byl"]"#,
    r#"meta[name="parsely-author"]"#,
    r#"meta[name="sailthru.author"]"#,
];

const META_DATE: &[&str] = &[
    r#"meta[property="article:published_time"]"#,
    r#"meta[itemprop="datePublished"]"#,
    r#"meta[name="date"]"#,
    r#"meta[name="pubdate"]"#,
    r#"meta[name="publish-date"]"#,
    r#"meta[name="parsely-pub-date"]"#,
    r#"meta[property="og:updated_time"]"#,
];

const BYLINE_ELEMENTS: &[&str] = &[
    r#"[rel="author"]"#,
    r#"[itemprop="author"] [itemprop="name"]"#,
    r#"[itemprop="author"]"#,
    ".byline",
    ".author-name",
    ".author",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub byline: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

pub fn extract_metadata(document: &Html) -> PageMetadata {
    let json_ld = json_ld_objects(document);

    PageMetadata {
        title: title(document),
        byline: json_ld
            .iter()
            .find_map(|obj| obj.get("author").and_then(author_name))
            .or_else(|| meta_byline(document))
            .or_else(|| element_byline(document)),
        published: json_ld
            .iter()
            .find_map(|obj| {
                DATE_KEYS
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(Value::as_str).and_then(parse_date))
            })
            .or_else(|| {
                META_DATE.iter().find_map(|css| {
                    select_first(document, css)
                        .and_then(|el| el.value().attr("content"))
                        .and_then(parse_date)
                })
            })
            .or_else(|| {
                select_all(document, "time[datetime]")
                    .into_iter()
                    .find_map(|el| el.value().attr("datetime").and_then(parse_date))
            }),
    }
}

fn title(document: &Html) -> Option<String> {
    select_first(document, r#"meta[property="og:title"]"#)
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| select_first(document, "h1").map(element_text))
        .or_else(|| select_first(document, "title").map(element_text))
        .filter(|t| !t.is_empty())
}

fn meta_byline(document: &Html) -> Option<String> {
    META_AUTHOR.iter().find_map(|css| {
        let content = select_first(document, css)?.value().attr("content")?.trim();
        // article:author is often a profile URL rather than a name.
        (!content.is_empty() && !content.starts_with("http")).then(|| content.to_string())
    })
}

fn element_byline(document: &Html) -> Option<String> {
    BYLINE_ELEMENTS.iter().find_map(|css| {
        let text = element_text(select_first(document, css)?);
        // Long matches are author bio boxes, not bylines.
        (!text.is_empty() && text.chars().count() <= 80).then_some(text)
    })
}

/// Every JSON-LD object on the page, with `@graph` members flattened in.
fn json_ld_objects(document: &Html) -> Vec<serde_json::Map<String, Value>> {
    let mut objects = Vec::new();
    for script in select_all(document, r#"script[type="application/ld+json"]"#) {
        let raw = script.inner_html();
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            collect_objects(value, &mut objects);
        }
    }
    objects
}

fn collect_objects(value: Value, out: &mut Vec<serde_json::Map<String, Value>>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_objects(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                collect_objects(graph, out);
            }
            out.push(map);
        }
        _ => {}
    }
}

/// `author` may be a string, a Person object, or a list of either.
fn author_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(map) => map.get("name").and_then(author_name),
        Value::Array(items) => {
            let names: Vec<String> = items.iter().filter_map(author_name).collect();
            (!names.is_empty()).then(|| names.join(", "))
        }
        _ => None,
    }
}

/// Parse the date formats seen in markup and feeds.
///
/// Dates without a time are taken as midnight UTC; times without an
/// offset are taken as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_json_ld() {
        let doc = Html::parse_document(
            r#"<html><head>
            <meta name="author" content="Meta Person">
            <script type="application/ld+json">
            {"@context":"https://schema.org","@graph":[
              {"@type":"WebPage","name":"x"},
              {"@type":"NewsArticle","headline":"CX-5 Review",
               "author":[{"@type":"Person","name":"Jane Doe"}],
               "datePublished":"2024-03-05T08:00:00-05:00"}]}
            </script></head><body><h1>CX-5 Review</h1></body></html>"#,
        );
        let meta = extract_metadata(&doc);
        assert_eq!(meta.byline.as_deref(), Some("Jane Doe"));
        assert_eq!(
            meta.published,
            Some("2024-03-05T13:00:00Z".parse().unwrap())
        );
        assert_eq!(meta.title.as_deref(), Some("CX-5 Review"));
    }

    #[test]
    fn falls_back_to_meta_then_elements() {
        let doc = Html::parse_document(
            r#"<html><head><title>Site | Story</title>
            <meta property="article:author" content="https://example.com/staff/jane">
            <meta name="date" content="2023-11-02"></head>
            <body><span class="byline">By John Smith</span></body></html>"#,
        );
        let meta = extract_metadata(&doc);
        assert_eq!(meta.byline.as_deref(), Some("By John Smith"));
        assert_eq!(meta.published, Some("2023-11-02T00:00:00Z".parse().unwrap()));
        assert_eq!(meta.title.as_deref(), Some("Site | Story"));
    }

    #[test]
    fn time_element_is_last_resort() {
        let doc = Html::parse_document(
            r#"<article><time datetime="2022-07-14T10:30:00">July 14</time></article>"#,
        );
        assert_eq!(
            extract_metadata(&doc).published,
            Some("2022-07-14T10:30:00Z".parse().unwrap())
        );
    }

    #[test]
    fn parses_common_date_formats() {
        let expected: DateTime<Utc> = "2024-01-02T03:04:05Z".parse().unwrap();
        for raw in [
            "2024-01-02T03:04:05Z",
            "2024-01-02T03:04:05+0000",
            "Tue, 02 Jan 2024 03:04:05 GMT",
            "2024-01-02 03:04:05",
        ] {
            assert_eq!(parse_date(raw), Some(expected), "{raw}");
        }
        assert!(parse_date("yesterday").is_none());
        assert!(parse_date("").is_none());
    }
}
