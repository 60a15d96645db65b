//! Accept/reject decision for extracted text.
//!
//! A candidate passes only when it is long enough, mentions the expected
//! subject, carries little navigation boilerplate, is not dominated by an
//! unrelated subject, and (when known) was published inside the requested
//! window. Rules are checked in that precedence order, except that a topic
//! mismatch is reported before a missing subject.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::ExtractionRequest;
use crate::variants::{TermVariants, subject_variants};

/// Phrases that mark sidebars, footers and consent banners.
pub const DEFAULT_BOILERPLATE_MARKERS: &[&str] = &[
    "recent posts",
    "related articles",
    "related posts",
    "related stories",
    "you may also like",
    "you might also like",
    "trending now",
    "most popular",
    "sign up for our newsletter",
    "subscribe now",
    "accept all cookies",
    "cookie policy",
    "privacy policy",
    "terms of service",
    "all rights reserved",
    "advertisement",
    "share this article",
    "skip to content",
];

/// Mentions needed before a distractor counts as a strong match.
const STRONG_MATCH_MIN: usize = 2;

/// A distractor mentioned this many times more often than every expected
/// token dominates the page.
const DOMINANCE_FACTOR: usize = 3;

#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Minimum length of acceptable text, in characters.
    pub min_length: usize,
    /// Lowercase phrases counted as boilerplate.
    pub boilerplate_markers: Vec<String>,
    /// Candidates with this many marker hits or more are rejected.
    pub max_boilerplate: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_length: 500,
            boilerplate_markers: DEFAULT_BOILERPLATE_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_boilerplate: 3,
        }
    }
}

/// Why a candidate was turned down.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rejection {
    TooShort { chars: usize, min: usize },
    MissingSubject,
    Boilerplate { markers: usize, cap: usize },
    TopicMismatch { distractor: String },
    OutsideDateWindow { published: DateTime<Utc> },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooShort { chars, min } => write!(f, "too short ({chars} < {min} chars)"),
            Rejection::MissingSubject => write!(f, "no expected subject token present"),
            Rejection::Boilerplate { markers, cap } => {
                write!(f, "boilerplate heavy ({markers} markers, cap {cap})")
            }
            Rejection::TopicMismatch { distractor } => {
                write!(f, "page is about '{distractor}' instead")
            }
            Rejection::OutsideDateWindow { published } => {
                write!(f, "published {published} outside requested window")
            }
        }
    }
}

/// Gate decision plus the score used to rank candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: f64,
    pub rejection: Option<Rejection>,
}

impl Verdict {
    pub fn passes(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Stateless quality gate; cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        let mut config = config;
        for marker in &mut config.boilerplate_markers {
            *marker = marker.trim().to_lowercase();
        }
        config.boilerplate_markers.retain(|m| !m.is_empty());
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Score `text` and decide whether it is acceptable for `request`.
    ///
    /// `published` is the page's publication date, when one was found.
    pub fn evaluate(
        &self,
        text: &str,
        request: &ExtractionRequest,
        published: Option<DateTime<Utc>>,
    ) -> Verdict {
        let lower = text.to_lowercase();
        let chars = text.chars().count();
        let subjects = subject_variants(request);
        let token_hits: Vec<usize> = subjects.iter().map(|v| v.count_in(&lower)).collect();
        let markers = self.boilerplate_count(&lower);

        let score = self.score(chars, &token_hits, markers);
        let rejection = self.first_rejection(
            &lower,
            chars,
            request,
            &subjects,
            &token_hits,
            markers,
            published,
        );

        Verdict { score, rejection }
    }

    fn score(&self, chars: usize, token_hits: &[usize], markers: usize) -> f64 {
        let min = self.config.min_length.max(1) as f64;
        let length_score = (chars as f64 / min).min(3.0) * 20.0;
        let topic_score = if token_hits.is_empty() {
            10.0
        } else {
            token_hits.iter().sum::<usize>().min(10) as f64 * 5.0
        };
        length_score + topic_score - markers as f64 * 10.0
    }

    fn first_rejection(
        &self,
        lower: &str,
        chars: usize,
        request: &ExtractionRequest,
        subjects: &[TermVariants],
        token_hits: &[usize],
        markers: usize,
        published: Option<DateTime<Utc>>,
    ) -> Option<Rejection> {
        if chars < self.config.min_length {
            return Some(Rejection::TooShort {
                chars,
                min: self.config.min_length,
            });
        }

        if let Some(distractor) = dominant_distractor(lower, request, subjects, token_hits) {
            return Some(Rejection::TopicMismatch { distractor });
        }

        if !token_hits.is_empty() && token_hits.iter().all(|&h| h == 0) {
            return Some(Rejection::MissingSubject);
        }

        if markers >= self.config.max_boilerplate {
            return Some(Rejection::Boilerplate {
                markers,
                cap: self.config.max_boilerplate,
            });
        }

        if let (Some(published), Some(window)) = (published, request.window())
            && !window.contains(published)
        {
            return Some(Rejection::OutsideDateWindow { published });
        }

        None
    }

    fn boilerplate_count(&self, lower: &str) -> usize {
        self.config
            .boilerplate_markers
            .iter()
            .map(|m| lower.matches(m.as_str()).count())
            .sum()
    }
}

/// Returns the first distractor that dominates the text.
///
/// A distractor dominates when it is mentioned at least twice and, among the
/// expected tokens that are not part of the distractor's own name, one is
/// absent or all of them are mentioned far less often. Every spelling
/// variant of a token or distractor counts as a mention.
fn dominant_distractor(
    lower: &str,
    request: &ExtractionRequest,
    subjects: &[TermVariants],
    token_hits: &[usize],
) -> Option<String> {
    for distractor in request.distractors() {
        let d_lower = distractor.to_lowercase();
        let d_hits = TermVariants::in_request(distractor, request).count_in(lower);
        if d_hits < STRONG_MATCH_MIN {
            continue;
        }

        let competing: Vec<usize> = subjects
            .iter()
            .zip(token_hits)
            .filter(|(token, _)| !token.appears_in(&d_lower))
            .map(|(_, &hits)| hits)
            .collect();

        if competing.is_empty() {
            // Expected tokens give nothing to compare against.
            if token_hits.iter().all(|&h| h == 0) {
                return Some(distractor.clone());
            }
            continue;
        }

        let any_absent = competing.iter().any(|&h| h == 0);
        let max_expected = competing.iter().copied().max().unwrap_or(0);
        if any_absent || d_hits > DOMINANCE_FACTOR * max_expected {
            return Some(distractor.clone());
        }
    }
    None
}

/// Count whole-term occurrences of `term` in `haystack`.
///
/// Both arguments must already be lowercase. A match must not be preceded
/// or followed by an alphanumeric character, so `cx-5` does not match
/// inside `cx-50`.
pub fn count_term(haystack: &str, term: &str) -> usize {
    if term.is_empty() {
        return 0;
    }
    haystack
        .match_indices(term)
        .filter(|(start, _)| {
            let before = haystack[..*start].chars().next_back();
            let after = haystack[start + term.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tokens: &[&str], distractors: &[&str]) -> ExtractionRequest {
        ExtractionRequest::builder("https://example.com/review")
            .subjects(tokens.iter().copied())
            .distractors(distractors.iter().copied())
            .build()
            .unwrap()
    }

    fn filler(chars: usize) -> String {
        "The cabin is quiet and the ride is composed on broken pavement. "
            .repeat(chars / 64 + 1)
    }

    #[test]
    fn count_term_respects_word_boundaries() {
        assert_eq!(count_term("the cx-50 and the cx-5", "cx-5"), 1);
        assert_eq!(count_term("cx-50 cx-50", "cx-5"), 0);
        assert_eq!(count_term("mazda, mazda. mazda", "mazda"), 3);
        assert_eq!(count_term("mazdaspeed", "mazda"), 0);
        assert_eq!(count_term("anything", ""), 0);
    }

    #[test]
    fn rejects_short_text_for_all_inputs() {
        let gate = QualityGate::default();
        let req = request(&["Mazda"], &[]);
        for len in [0, 1, 150, 499] {
            let text: String = "Mazda ".chars().cycle().take(len).collect();
            let verdict = gate.evaluate(&text, &req, None);
            assert!(
                matches!(verdict.rejection, Some(Rejection::TooShort { .. })),
                "length {len} should be too short"
            );
        }
    }

    #[test]
    fn passes_long_on_topic_text_with_single_mention() {
        let gate = QualityGate::default();
        let req = request(&["Outback"], &[]);
        let mut text = filler(5000);
        text.truncate(4990);
        text.push_str(" Outback");
        assert!(text.chars().count() >= 4990);

        let verdict = gate.evaluate(&text, &req, None);
        assert!(verdict.passes(), "rejected: {:?}", verdict.rejection);
    }

    #[test]
    fn rejects_text_without_subject() {
        let gate = QualityGate::default();
        let req = request(&["Outback"], &[]);
        let verdict = gate.evaluate(&filler(2000), &req, None);
        assert_eq!(verdict.rejection, Some(Rejection::MissingSubject));
    }

    #[test]
    fn subject_match_is_case_insensitive() {
        let gate = QualityGate::default();
        let req = request(&["OUTBACK"], &[]);
        let text = format!("{} the outback", filler(1000));
        assert!(gate.evaluate(&text, &req, None).passes());
    }

    #[test]
    fn no_subject_tokens_skips_topic_rule() {
        let gate = QualityGate::default();
        let req = request(&[], &[]);
        assert!(gate.evaluate(&filler(1000), &req, None).passes());
    }

    #[test]
    fn rejects_boilerplate_heavy_text() {
        let gate = QualityGate::default();
        let req = request(&["Outback"], &[]);
        let text = format!(
            "Outback {} Related articles. Recent posts. You may also like. Privacy policy.",
            filler(1000)
        );
        assert!(matches!(
            gate.evaluate(&text, &req, None).rejection,
            Some(Rejection::Boilerplate { markers: 4, cap: 3 })
        ));
    }

    #[test]
    fn topic_mismatch_beats_substring_presence() {
        let gate = QualityGate::default();
        let req = request(&["Mazda", "CX-5"], &["CX-50"]);
        let text = format!(
            "Mazda CX-50 first drive. {} The CX-50 is rugged. The Mazda CX-50 tows well.",
            filler(1500)
        );
        // "cx-5" is a substring of every "cx-50", but never a whole term.
        assert!(text.to_lowercase().contains("cx-5"));
        let verdict = gate.evaluate(&text, &req, None);
        assert_eq!(
            verdict.rejection,
            Some(Rejection::TopicMismatch {
                distractor: "CX-50".into()
            })
        );
    }

    #[test]
    fn passing_comparison_mention_is_not_a_mismatch() {
        let gate = QualityGate::default();
        let req = request(&["Mazda", "CX-5"], &["CX-50"]);
        let text = format!(
            "Mazda CX-5 review. {} The CX-5 rides better than the CX-50. The CX-5 is cheaper \
             and the CX-5 is quicker than the CX-50 around town.",
            filler(1500)
        );
        assert!(gate.evaluate(&text, &req, None).passes());
    }

    #[test]
    fn unhyphenated_subject_is_not_a_mismatch_against_its_sibling() {
        let gate = QualityGate::default();
        let req = request(&["Mazda", "CX-5"], &["CX-50"]);
        let text = format!(
            "Mazda CX5 long-term test. {} Our CX5 beat the CX-50 on fuel, and the CX5 \
             rode better than the CX-50 did.",
            filler(1500)
        );
        assert!(gate.evaluate(&text, &req, None).passes());
    }

    #[test]
    fn distractor_spelling_variants_count_toward_dominance() {
        let gate = QualityGate::default();
        let req = request(&["Mazda", "CX-5"], &["CX-50"]);
        let text = format!(
            "Mazda CX50 first drive. {} The CX 50 is rugged, the CX-50 is roomy. The MazdaCX50 \
             tows well and one CX-5 owner agreed.",
            filler(1500)
        );
        assert_eq!(
            gate.evaluate(&text, &req, None).rejection,
            Some(Rejection::TopicMismatch {
                distractor: "CX-50".into()
            })
        );
    }

    #[test]
    fn spaced_model_name_matches_glued_spelling() {
        let gate = QualityGate::default();
        let req = request(&["Lexus", "ES 350"], &[]);
        let text = format!("The Lexus ES350 is quiet. {}", filler(1000));
        assert!(gate.evaluate(&text, &req, None).passes());
    }

    #[test]
    fn dominant_distractor_with_overlapping_name() {
        let gate = QualityGate::default();
        let req = request(&["Mazda", "CX-5"], &["Mazda CX-50"]);
        let text = format!(
            "{} Mazda CX-50 Mazda CX-50 Mazda CX-50 and one CX-5 mention.",
            filler(1000)
        );
        // CX-5 is present once and the distractor only three times.
        assert!(gate.evaluate(&text, &req, None).passes());

        let text = format!("{} Mazda CX-50 Mazda CX-50 Mazda CX-50 Mazda CX-50", filler(1000));
        assert!(matches!(
            gate.evaluate(&text, &req, None).rejection,
            Some(Rejection::TopicMismatch { .. })
        ));
    }

    #[test]
    fn rejects_date_outside_window() {
        let gate = QualityGate::default();
        let req = ExtractionRequest::builder("https://example.com/review")
            .subject("Outback")
            .published_between(Some("2024-01-01T00:00:00Z".parse().unwrap()), None)
            .build()
            .unwrap();
        let text = format!("Outback {}", filler(1000));

        let old = "2023-05-01T00:00:00Z".parse().unwrap();
        assert!(matches!(
            gate.evaluate(&text, &req, Some(old)).rejection,
            Some(Rejection::OutsideDateWindow { .. })
        ));

        let fresh = "2024-05-01T00:00:00Z".parse().unwrap();
        assert!(gate.evaluate(&text, &req, Some(fresh)).passes());
        assert!(gate.evaluate(&text, &req, None).passes());
    }

    #[test]
    fn score_prefers_longer_on_topic_text() {
        let gate = QualityGate::default();
        let req = request(&["Outback"], &[]);
        let short = format!("Outback {}", filler(600));
        let long = format!("Outback Outback {}", filler(1400));
        assert!(
            gate.evaluate(&long, &req, None).score > gate.evaluate(&short, &req, None).score
        );
    }

    #[test]
    fn custom_markers_are_normalized() {
        let gate = QualityGate::new(QualityConfig {
            min_length: 10,
            boilerplate_markers: vec!["  SPONSORED  ".into(), "".into()],
            max_boilerplate: 1,
        });
        let req = request(&[], &[]);
        assert_eq!(gate.config().boilerplate_markers, vec!["sponsored"]);
        let verdict = gate.evaluate("This sponsored block is long enough", &req, None);
        assert!(matches!(
            verdict.rejection,
            Some(Rejection::Boilerplate { .. })
        ));
    }
}
