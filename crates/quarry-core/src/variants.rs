//! Spelling variants of subject tokens.
//!
//! Model names are written with a hyphen, a space or nothing between their
//! letter and number parts ("CX-5", "CX 5", "CX5"), and sometimes glued to
//! the make ("MazdaCX5"). Every variant is matched as a whole term, so
//! "cx5" still never matches inside "cx50".

use crate::models::ExtractionRequest;
use crate::quality::count_term;

/// Above this many separator positions only uniform spellings are generated.
const MAX_MIXED_GAPS: u32 = 3;

const SEPARATORS: [&str; 3] = ["-", " ", ""];

/// Every lowercase spelling of one term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermVariants {
    forms: Vec<String>,
}

impl TermVariants {
    pub fn new(term: &str) -> Self {
        let lower = term.trim().to_lowercase();
        if lower.is_empty() {
            return Self { forms: Vec::new() };
        }

        let parts = segments(&lower);
        let mut forms = vec![lower];
        let gaps = parts.len().saturating_sub(1) as u32;
        if gaps == 0 {
            return Self { forms };
        }

        if gaps <= MAX_MIXED_GAPS {
            for combo in 0..SEPARATORS.len().pow(gaps) {
                let mut form = parts[0].clone();
                let mut rest = combo;
                for part in &parts[1..] {
                    form.push_str(SEPARATORS[rest % SEPARATORS.len()]);
                    form.push_str(part);
                    rest /= SEPARATORS.len();
                }
                push_unique(&mut forms, form);
            }
        } else {
            for sep in SEPARATORS {
                push_unique(&mut forms, parts.join(sep));
            }
        }
        Self { forms }
    }

    /// Spellings of `term` in the context of `request`: also glued onto each
    /// single-word subject token, which is usually the make.
    pub fn in_request(term: &str, request: &ExtractionRequest) -> Self {
        request
            .subject_tokens()
            .iter()
            .filter(|t| !t.is_empty() && t.chars().all(char::is_alphabetic))
            .fold(Self::new(term), |variants, make| variants.with_prefix(make))
    }

    /// Add every form glued directly onto `prefix` ("mazdacx5").
    ///
    /// Forms with a separator after the prefix already match on their own.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return self;
        }
        let glued: Vec<String> = self
            .forms
            .iter()
            .filter(|f| !f.starts_with(&prefix))
            .map(|f| format!("{prefix}{f}"))
            .collect();
        for form in glued {
            push_unique(&mut self.forms, form);
        }
        self
    }

    pub fn forms(&self) -> &[String] {
        &self.forms
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Whole-term occurrences of any form in an already lowercased haystack.
    pub fn count_in(&self, haystack: &str) -> usize {
        self.forms.iter().map(|f| count_term(haystack, f)).sum()
    }

    pub fn appears_in(&self, haystack: &str) -> bool {
        self.forms.iter().any(|f| count_term(haystack, f) > 0)
    }
}

/// Variants for every subject token of `request`, in token order.
pub fn subject_variants(request: &ExtractionRequest) -> Vec<TermVariants> {
    request
        .subject_tokens()
        .iter()
        .map(|t| TermVariants::in_request(t, request))
        .collect()
}

/// Splits on spaces and hyphens, then between letters and digits.
fn segments(lower: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for word in lower
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
    {
        let mut current = String::new();
        let mut prev: Option<char> = None;
        for c in word.chars() {
            if let Some(p) = prev
                && ((p.is_alphabetic() && c.is_ascii_digit())
                    || (p.is_ascii_digit() && c.is_alphabetic()))
            {
                parts.push(std::mem::take(&mut current));
            }
            current.push(c);
            prev = Some(c);
        }
        parts.push(current);
    }
    parts
}

fn push_unique(forms: &mut Vec<String>, form: String) {
    if !form.is_empty() && !forms.contains(&form) {
        forms.push(form);
    }
}
