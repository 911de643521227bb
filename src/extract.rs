//! SMS text extraction (component B).
//!
//! Three extraction strategies, tried in order by the correlator:
//! `extract_full` (explicit `to:`/`code:` prefixes), `extract_masked_tail`
//! (masked-number formats like `+201122•••407`), and
//! `extract_code_with_context` (scored heuristic over keyword patterns).
//! Ported from the source bot's `extract_number_and_code`,
//! `extract_last_three_digits_from_masked_number` and
//! `extract_code_from_message`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::normalize;

static TO_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)to:\s*(\+?\d{7,15})").unwrap());
static CODE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)code:\s*(\d{2,8})").unwrap());

/// Masked-tail patterns, most specific first: a full `to:` line with a
/// masked body, then bare masked bodies with 3 and 2 trailing digits.
static MASKED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)to:\s*\+?\d+[\x{2022}*]{2,}(\d{3})\b").unwrap(),
        Regex::new(r"[\x{2022}*]{2,}(\d{3})\b").unwrap(),
        Regex::new(r"[\x{2022}*]{2,}(\d{2})\b").unwrap(),
        Regex::new(r"\*{2,}(\d{3})\b").unwrap(),
        Regex::new(r"\*{2,}(\d{2})\b").unwrap(),
    ]
});

/// Context/keyword code patterns, in priority order. Index determines the
/// base score (`100 - i*5`); a match also earns a keyword bonus.
static CODE_CONTEXT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(?:verification|confirmation|security)\s*code\s*(?:is|:)?\s*(\d{4,8})").unwrap(),
        Regex::new(r"(?i)your\s+code\s+is\s*:?\s*(\d{4,8})").unwrap(),
        Regex::new(r"(?i)otp\s*(?:is|:)?\s*(\d{4,8})").unwrap(),
        Regex::new(r"(?i)pin\s*(?:is|:)?\s*(\d{4,8})").unwrap(),
        Regex::new(r"(?i)code\s*(?:is|:)?\s*(\d{4,8})").unwrap(),
        Regex::new(r"\u{0643}\u{0648}\u{062f}\s*(?:\u{0627}\u{0644}\u{062a}\u{062d}\u{0642}\u{0642})?\s*:?\s*(\d{4,8})").unwrap(),
        Regex::new(r"\b(\d{4,8})\b").unwrap(),
    ]
});

const NULL_CODES: [&str; 3] = ["1234", "0000", "9999"];

/// Explicit `to: <number>` / `code: <value>` extraction. Either side may be
/// absent; callers combine with [`extract_masked_tail`] and
/// [`extract_code_with_context`] as fallbacks. The captured `to:` token is
/// normalized before being returned, so a non-canonical form (stray
/// spaces, a leading `00`, a missing `+`) still resolves to the number's
/// stored E.164 form rather than falling through to Orphan.
pub fn extract_full(text: &str) -> (Option<String>, Option<String>) {
    let number = TO_PATTERN.captures(text).map(|c| c[1].to_string()).and_then(|raw| {
        let normalized = normalize(&raw);
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    });
    let code = CODE_PATTERN.captures(text).map(|c| c[1].to_string());
    (number, code)
}

/// Tries each masked-number pattern in priority order, returning the first
/// match's captured tail digits.
pub fn extract_masked_tail(text: &str) -> Option<String> {
    for pattern in MASKED_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Scored code extraction: tries each context pattern, scores survivors by
/// priority + keyword/service bonuses minus null-code/phone-like penalties,
/// and returns the highest scorer. `service_name` and `service_pattern` add
/// a bonus when present in the surrounding text.
pub fn extract_code_with_context(
    text: &str,
    service_name: Option<&str>,
    service_pattern: Option<&str>,
) -> Option<String> {
    let lower = text.to_lowercase();
    let mut best: Option<(i32, String)> = None;

    if let Some(pattern) = service_pattern {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(caps) = re.captures(text) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                    let candidate = m.as_str().to_string();
                    if candidate.chars().all(|c| c.is_ascii_digit()) {
                        best = Some((150, candidate));
                    }
                }
            }
        }
    }

    for (i, pattern) in CODE_CONTEXT_PATTERNS.iter().enumerate() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let Some(code) = caps.get(1) else { continue };
        let code = code.as_str().to_string();

        let mut score = 100 - (i as i32) * 5;

        let has_keyword = ["code", "verification", "otp", "pin", "confirmation", "\u{0643}\u{0648}\u{062f}"]
            .iter()
            .any(|kw| lower.contains(kw));
        if has_keyword {
            score += 20;
        }
        if let Some(name) = service_name {
            if !name.is_empty() && lower.contains(&name.to_lowercase()) {
                score += 15;
            }
        }
        if NULL_CODES.contains(&code.as_str()) {
            score -= 30;
        }
        if looks_like_phone_fragment(&code, text) {
            score -= 25;
        }

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, code));
        }
    }

    best.map(|(_, code)| code)
}

/// A bare digit run is penalized when it is itself a substring of a
/// longer digit run in the text — a strong signal it came from a
/// timestamp or embedded phone number rather than a standalone code.
fn looks_like_phone_fragment(code: &str, text: &str) -> bool {
    static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{7,}").unwrap());
    DIGIT_RUN
        .find_iter(text)
        .any(|m| m.as_str().contains(code) && m.as_str().len() > code.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_explicit_to_and_code() {
        let (num, code) = extract_full("to: +201112223344 code: 4821 thanks");
        assert_eq!(num.as_deref(), Some("+201112223344"));
        assert_eq!(code.as_deref(), Some("4821"));
    }

    #[test]
    fn extracts_explicit_to_normalizes_non_canonical_form() {
        let (num, _) = extract_full("to: 00201112223344 code: 4821 thanks");
        assert_eq!(num.as_deref(), Some("+201112223344"));
    }

    #[test]
    fn extracts_masked_tail_bullet_style() {
        assert_eq!(
            extract_masked_tail("to: +201122\u{2022}\u{2022}\u{2022}407"),
            Some("407".to_string())
        );
    }

    #[test]
    fn extracts_masked_tail_asterisk_style() {
        assert_eq!(extract_masked_tail("**407"), Some("407".to_string()));
    }

    #[test]
    fn masked_tail_absent_returns_none() {
        assert_eq!(extract_masked_tail("no mask here"), None);
    }

    #[test]
    fn scored_extraction_prefers_keyword_context() {
        let code = extract_code_with_context("your verification code is 58213, do not share", None, None);
        assert_eq!(code.as_deref(), Some("58213"));
    }

    #[test]
    fn scored_extraction_penalizes_null_codes() {
        let code = extract_code_with_context("your code is 1234 and also 7781", None, None);
        assert_eq!(code.as_deref(), Some("7781"));
    }

    #[test]
    fn scored_extraction_avoids_timestamp_digits() {
        let code = extract_code_with_context(
            "sent at 16923456789, your otp is 4821",
            None,
            None,
        );
        assert_eq!(code.as_deref(), Some("4821"));
    }

    #[test]
    fn scored_extraction_with_no_match_returns_none() {
        assert_eq!(extract_code_with_context("hello there", None, None), None);
    }
}
