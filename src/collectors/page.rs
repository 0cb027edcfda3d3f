//! Lightweight HTML digesting: title, description, headings and visible text.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters of visible text kept in [`PageDigest::excerpt`].
pub const EXCERPT_CHARS: usize = 1500;

/// Headings kept per page.
const MAX_HEADINGS: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageDigest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<String>,
    pub excerpt: String,
}

impl PageDigest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.excerpt.is_empty()
    }
}

/// Extracts the parts of a page the research stage summarizes.
pub fn digest_html(html: &str) -> PageDigest {
    let without_code = strip(html, r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>");

    let title = first_capture(&without_code, r"(?is)<title[^>]*>(.*?)</title>")
        .map(|t| clean_text(&t))
        .filter(|t| !t.is_empty());

    let description = first_capture(
        &without_code,
        r#"(?is)<meta[^>]+(?:name|property)\s*=\s*["'](?:og:)?description["'][^>]*content\s*=\s*["']([^"']*)["']"#,
    )
    .or_else(|| {
        first_capture(
            &without_code,
            r#"(?is)<meta[^>]+content\s*=\s*["']([^"']*)["'][^>]*(?:name|property)\s*=\s*["'](?:og:)?description["']"#,
        )
    })
    .map(|d| clean_text(&d))
    .filter(|d| !d.is_empty());

    let headings = Regex::new(r"(?is)<h[1-3][^>]*>(.*?)</h[1-3]>")
        .map(|re| {
            re.captures_iter(&without_code)
                .filter_map(|c| c.get(1))
                .map(|m| clean_text(&strip(m.as_str(), r"<[^>]+>")))
                .filter(|h| !h.is_empty())
                .take(MAX_HEADINGS)
                .collect()
        })
        .unwrap_or_default();

    let body = strip(&without_code, r"(?is)<head\b[^>]*>.*?</head>");
    let text = clean_text(&strip(&body, r"<[^>]+>"));
    let excerpt: String = text.chars().take(EXCERPT_CHARS).collect();

    PageDigest {
        title,
        description,
        headings,
        excerpt,
    }
}

fn strip(input: &str, pattern: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re.replace_all(input, " ").into_owned(),
        Err(_) => input.to_string(),
    }
}

fn first_capture(input: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(input)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Decodes common entities and collapses whitespace.
fn clean_text(input: &str) -> String {
    let decoded = input
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <title>Acme Rockets &amp; Co</title>
  <meta name="description" content="Reusable rockets for small payloads.">
  <style>body { color: red; }</style>
</head>
<body>
  <script>var tracking = "ignore me";</script>
  <h1>Launch with <em>Acme</em></h1>
  <p>We build   rockets.</p>
  <h2>Pricing</h2>
</body></html>"#;

    #[test]
    fn test_digest_extracts_fields() {
        let digest = digest_html(PAGE);
        assert_eq!(digest.title.as_deref(), Some("Acme Rockets & Co"));
        assert_eq!(
            digest.description.as_deref(),
            Some("Reusable rockets for small payloads.")
        );
        assert_eq!(digest.headings, vec!["Launch with Acme", "Pricing"]);
        assert!(digest.excerpt.contains("We build rockets."));
        assert!(!digest.excerpt.contains("ignore me"));
        assert!(!digest.excerpt.contains("color"));
    }

    #[test]
    fn test_description_with_reversed_attributes() {
        let html = r#"<meta content="Reversed order" property="og:description">"#;
        assert_eq!(
            digest_html(html).description.as_deref(),
            Some("Reversed order")
        );
    }

    #[test]
    fn test_plain_text_and_empty() {
        assert!(digest_html("").is_empty());
        let digest = digest_html("just words");
        assert_eq!(digest.excerpt, "just words");
        assert!(digest.title.is_none());
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let html = format!("<p>{}</p>", "word ".repeat(2000));
        assert!(digest_html(&html).excerpt.chars().count() <= EXCERPT_CHARS);
    }
}
