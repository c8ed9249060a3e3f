use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::debug;

use crate::{param_str, Skill};

use super::url_encode;

/// Web research: search via the DuckDuckGo HTML endpoint (no key required)
/// or fetch a specific URL and extract its readable text.
pub struct ResearchSkill {
    client: reqwest::Client,
}

impl ResearchSkill {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("mentat/0.1")
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<String> {
        let url = format!("https://html.duckduckgo.com/html/?q={}", url_encode(query));
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("search error: HTTP {}", response.status());
        }
        let body = response.text().await?;

        let document = Html::parse_document(&body);
        let result_selector = Selector::parse(".result__title").unwrap();
        let snippet_selector = Selector::parse(".result__snippet").unwrap();

        let titles: Vec<String> = document
            .select(&result_selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .take(max_results)
            .collect();
        let snippets: Vec<String> = document
            .select(&snippet_selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .take(max_results)
            .collect();

        if titles.is_empty() {
            return Ok("No results found.".to_string());
        }

        let mut lines = Vec::with_capacity(titles.len());
        for (i, title) in titles.iter().enumerate() {
            let snippet = snippets.get(i).map(String::as_str).unwrap_or("");
            lines.push(format!("{}. {title}\n   {snippet}", i + 1));
        }
        Ok(lines.join("\n"))
    }

    /// Fetch one page and return its readable text, tags stripped.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        debug!(url, "fetching page");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            bail!("fetch error: HTTP {}", response.status());
        }
        let body = response.text().await?;
        Ok(extract_readable_text(&body, 2000))
    }
}

impl Default for ResearchSkill {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip scripts/styles and collapse the document body into plain text.
pub fn extract_readable_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();
    let text = document
        .select(&body_selector)
        .flat_map(|body| body.text())
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect()
}

#[async_trait]
impl Skill for ResearchSkill {
    fn name(&self) -> &str {
        "research"
    }
    fn description(&self) -> &str {
        "Search the web or fetch a URL and summarize what it says."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "url": { "type": "string", "description": "Specific URL to fetch instead of searching" },
                "num_results": { "type": "integer", "description": "Max results (default 5)" }
            },
            "required": []
        })
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        if let Some(url) = param_str(params, "url") {
            return self.fetch_page(url).await;
        }
        let Some(query) = param_str(params, "query") else {
            bail!("research needs either 'query' or 'url'");
        };
        let max_results = crate::param_i64(params, "num_results").unwrap_or(5).clamp(1, 10) as usize;
        self.search(query, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_text_strips_markup() {
        let html = "<html><head><title>t</title></head>\
                    <body><h1>Header</h1><p>Some   body text.</p></body></html>";
        let text = extract_readable_text(html, 100);
        assert!(text.contains("Header"));
        assert!(text.contains("Some body text."));
        assert!(!text.contains('<'));
    }

    #[test]
    fn readable_text_respects_char_cap() {
        let html = format!("<body><p>{}</p></body>", "word ".repeat(1000));
        assert!(extract_readable_text(&html, 50).chars().count() <= 50);
    }

    #[tokio::test]
    async fn missing_query_and_url_is_an_error() {
        let skill = ResearchSkill::new();
        assert!(skill.execute(&json!({})).await.is_err());
    }
}
