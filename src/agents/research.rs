//! Research stage: learns what the prospect does from its website.
//!
//! The main page is required. `/about` and `/products` are optional; when
//! either cannot be fetched the stage logs a WARNING, records the page under
//! `degraded`, and carries on with what it has.
//!
//! The LLM-backed variants summarise the page digests with a model. The
//! offline variant derives the same fields heuristically from titles,
//! headings and keyword frequencies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;

use super::keys;
use super::types::CompanyResearch;
use crate::collectors::{digest_html, ContentFetcher, FetchError, PageDigest};
use crate::error::{StageError, StageResult};
use crate::llm::LlmBackend;
use crate::pipeline::{PipelineState, Stage, StageContext, StageOutput, StageSettings};
use crate::prompts::build_research_prompt;

/// Optional pages fetched next to the main page.
const OPTIONAL_PAGES: [&str; 2] = ["/about", "/products"];

const TITLE_SEPARATORS: [&str; 6] = [" | ", " - ", " – ", " — ", ": ", " · "];

const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Financial Services",
        &["bank", "payment", "finance", "loan", "insurance", "invest", "credit"],
    ),
    (
        "Retail",
        &["shop", "store", "retail", "commerce", "cart", "fashion", "apparel"],
    ),
    (
        "Healthcare",
        &["health", "clinic", "patient", "medical", "care", "pharma"],
    ),
    (
        "Software",
        &["software", "cloud", "platform", "api", "saas", "developer", "data"],
    ),
    (
        "Travel & Hospitality",
        &["travel", "hotel", "flight", "booking", "restaurant", "trip"],
    ),
    (
        "Logistics",
        &["logistics", "shipping", "freight", "delivery", "warehouse", "fleet"],
    ),
    (
        "Education",
        &["school", "course", "learning", "student", "education", "training"],
    ),
];

const STOPWORDS: &[&str] = &[
    "about", "after", "their", "there", "these", "which", "would", "could", "where", "while",
    "other", "every", "being", "using", "learn", "more", "contact", "privacy", "cookies",
    "policy", "terms", "rights", "reserved", "please", "your", "with", "from", "that", "this",
    "what", "when", "have", "will", "into", "page", "home",
];

#[derive(Debug, Deserialize)]
struct LlmResearch {
    #[serde(default)]
    company_name: String,
    summary: String,
    industry: String,
    #[serde(default)]
    offerings: Vec<String>,
    #[serde(default)]
    audience: Vec<String>,
    #[serde(default)]
    key_terms: Vec<String>,
}

pub struct ResearchAgent {
    fetcher: Arc<dyn ContentFetcher>,
    llm: Option<LlmBackend>,
    settings: StageSettings,
}

impl ResearchAgent {
    /// With `llm` set to `None` the agent runs its offline heuristics.
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        llm: Option<LlmBackend>,
        settings: StageSettings,
    ) -> Self {
        Self {
            fetcher,
            llm,
            settings,
        }
    }

    /// Fetches and digests one page within the fetch budget.
    ///
    /// The budget covers every retry attempt the fetcher may make.
    async fn fetch_digest(&self, url: &str) -> Result<PageDigest, FetchError> {
        let budget = self.settings.fetch_timeout * self.settings.retry.max_attempts;
        let page = tokio::time::timeout(budget, self.fetcher.fetch(url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                timeout: budget,
            })??;
        Ok(digest_html(&page.body))
    }
}

#[async_trait]
impl Stage for ResearchAgent {
    fn name(&self) -> &'static str {
        "research"
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> StageResult<StageOutput> {
        let source_url: String = state.require(keys::SOURCE_URL)?;
        let base = Url::parse(&source_url)
            .map_err(|e| StageError::invalid(keys::SOURCE_URL, e.to_string()))?;

        ctx.info(format!("Fetching {}", source_url));
        let main = self
            .fetch_digest(&source_url)
            .await
            .map_err(required_fetch_error)?;
        if main.is_empty() {
            ctx.warn("Main page has no readable content");
        }

        let mut pages = vec![(source_url.clone(), main)];
        let mut degraded = Vec::new();

        let optional_urls: Vec<String> = OPTIONAL_PAGES
            .iter()
            .filter_map(|path| base.join(path).ok())
            .map(|u| u.to_string())
            .filter(|u| *u != source_url)
            .collect();
        let fetched = futures::future::join_all(
            optional_urls
                .iter()
                .map(|u| async move { (u.clone(), self.fetch_digest(u).await) }),
        )
        .await;
        for (url, result) in fetched {
            match result {
                Ok(digest) => pages.push((url, digest)),
                Err(e) => {
                    ctx.warn(format!("Optional page {} unavailable: {}", url, e));
                    degraded.push(url);
                }
            }
        }
        ctx.report_progress(0.5);

        let mut research = match &self.llm {
            Some(llm) => {
                ctx.info(format!("Summarizing {} page(s) with {}", pages.len(), llm.model()));
                let prompt = build_research_prompt(&source_url, &pages);
                let reply: LlmResearch = llm.complete_json(&prompt.system, &prompt.user).await?;
                let company_name = if reply.company_name.trim().is_empty() {
                    company_name(&pages[0].1, &base)
                } else {
                    reply.company_name.trim().to_string()
                };
                CompanyResearch {
                    company_name,
                    summary: reply.summary,
                    industry: reply.industry,
                    offerings: reply.offerings,
                    audience: reply.audience,
                    key_terms: reply.key_terms,
                    ..Default::default()
                }
            }
            None => summarize_offline(&pages, &base),
        };
        research.source_url = source_url;
        research.pages = pages.into_iter().map(|(url, _)| url).collect();
        research.degraded = degraded;

        ctx.success(format!(
            "Researched {} ({})",
            research.company_name, research.industry
        ));

        let mut partial = PipelineState::new();
        partial.put(keys::COMPANY_RESEARCH, &research)?;
        Ok(StageOutput::new(partial)
            .with_summary(json!({
                "company_name": research.company_name,
                "industry": research.industry,
                "pages_fetched": research.pages.len(),
                "degraded": research.degraded,
            }))
            .with_metadata("company_name", json!(research.company_name))
            .with_metadata("industry", json!(research.industry))
            .with_display_name(research.company_name.clone()))
    }
}

fn required_fetch_error(err: FetchError) -> StageError {
    match err {
        FetchError::Timeout { url, timeout } => {
            StageError::timeout(format!("fetch {}", url), timeout)
        }
        other => StageError::External(other.to_string()),
    }
}

// ============================================================================
// Offline heuristics
// ============================================================================

fn summarize_offline(pages: &[(String, PageDigest)], base: &Url) -> CompanyResearch {
    let main = &pages[0].1;
    let name = company_name(main, base);

    let corpus: String = pages
        .iter()
        .map(|(_, d)| {
            format!(
                "{} {} {} {}",
                d.title.as_deref().unwrap_or_default(),
                d.description.as_deref().unwrap_or_default(),
                d.headings.join(" "),
                d.excerpt
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let industry = classify_industry(&corpus);

    let summary = main
        .description
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| main.excerpt.chars().take(300).collect::<String>());
    let summary = if summary.trim().is_empty() {
        format!("{} operates in {}.", name, industry)
    } else {
        summary.trim().to_string()
    };

    let mut seen = BTreeSet::new();
    let mut offerings: Vec<String> = pages
        .iter()
        .flat_map(|(_, d)| d.headings.iter())
        .map(|h| h.trim().to_string())
        .filter(|h| (3..=60).contains(&h.chars().count()) && !h.eq_ignore_ascii_case(&name))
        .filter(|h| seen.insert(h.to_lowercase()))
        .take(5)
        .collect();
    if offerings.is_empty() {
        offerings.push(format!("{} services", industry));
    }

    CompanyResearch {
        company_name: name,
        summary,
        audience: audience_for(&industry),
        key_terms: key_terms(&corpus, 8),
        industry,
        offerings,
        ..Default::default()
    }
}

/// The first segment of the page title, else the capitalized host name.
fn company_name(main: &PageDigest, base: &Url) -> String {
    if let Some(title) = main.title.as_deref() {
        let cut = TITLE_SEPARATORS
            .iter()
            .filter_map(|sep| title.find(sep))
            .min()
            .unwrap_or(title.len());
        let first = title[..cut].trim();
        if !first.is_empty() && first.chars().count() <= 60 {
            return first.to_string();
        }
    }
    let host = base.host_str().unwrap_or("company");
    let label = host
        .trim_start_matches("www.")
        .split('.')
        .next()
        .unwrap_or(host);
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Company".to_string(),
    }
}

fn classify_industry(corpus: &str) -> String {
    let mut best = ("General Business", 0usize);
    for (industry, keywords) in INDUSTRY_KEYWORDS {
        let score: usize = keywords.iter().map(|k| corpus.matches(k).count()).sum();
        if score > best.1 {
            best = (industry, score);
        }
    }
    best.0.to_string()
}

fn audience_for(industry: &str) -> Vec<String> {
    let audience: &[&str] = match industry {
        "Financial Services" => &["Retail banking customers", "Small businesses"],
        "Retail" => &["Online shoppers", "Loyalty members"],
        "Healthcare" => &["Patients", "Care providers"],
        "Software" => &["Engineering teams", "IT decision makers"],
        "Travel & Hospitality" => &["Leisure travelers", "Business travelers"],
        "Logistics" => &["Shippers", "Fleet operators"],
        "Education" => &["Students", "Instructors"],
        _ => &["Customers", "Partners"],
    };
    audience.iter().map(|s| s.to_string()).collect()
}

/// Most frequent meaningful words, ties broken alphabetically.
fn key_terms(corpus: &str, limit: usize) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for word in corpus.split(|c: char| !c.is_alphabetic()) {
        if word.chars().count() >= 5 && !STOPWORDS.contains(&word) {
            *counts.entry(word).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(w, _)| w.to_string())
        .collect()
}
