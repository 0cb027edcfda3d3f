//! Prompt for summarizing a company from its web pages.

use super::Prompt;
use crate::collectors::PageDigest;

const RESEARCH_SYSTEM: &str = r#"You are a solutions engineer preparing a tailored analytics demo for a prospect.
You read the prospect's public web pages and describe the business in plain terms.

## OUTPUT FORMAT

Respond with a single JSON object:
{
  "company_name": "Short company name as customers know it",
  "summary": "Two or three sentences describing what the company does and for whom",
  "industry": "One industry label, e.g. Retail, Financial Services, Healthcare, Software",
  "offerings": ["Main product or service", "..."],
  "audience": ["Primary customer segment", "..."],
  "key_terms": ["Domain term used on the site", "..."]
}

Only use facts supported by the page content. Output ONLY the JSON object."#;

/// Builds the research prompt from the page digests gathered for `url`.
///
/// `pages` pairs each fetched URL with its digest; the main page comes first.
pub fn build_research_prompt(url: &str, pages: &[(String, PageDigest)]) -> Prompt {
    let mut user = format!("Prospect website: {}\n", url);
    for (page_url, digest) in pages {
        user.push_str(&format!("\n## Page: {}\n", page_url));
        if let Some(title) = &digest.title {
            user.push_str(&format!("Title: {}\n", title));
        }
        if let Some(description) = &digest.description {
            user.push_str(&format!("Description: {}\n", description));
        }
        if !digest.headings.is_empty() {
            user.push_str(&format!("Headings: {}\n", digest.headings.join("; ")));
        }
        if !digest.excerpt.is_empty() {
            user.push_str(&format!("Text:\n{}\n", digest.excerpt));
        }
    }
    user.push_str("\nDescribe this company for the demo team.");
    Prompt::new(RESEARCH_SYSTEM, user)
}
