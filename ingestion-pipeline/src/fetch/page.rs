use std::collections::HashSet;

use common::{
    error::AppError,
    storage::types::{
        article::ArticleDraft,
        source::{ScrapeConfig, Source},
    },
};
use dom_smoothie::{Readability, TextMode};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::{html_to_text, http::HttpFetcher, FetchOutcome, UNTITLED};

/// HTML sources: links are discovered on the listing page, then each article page is scraped.
#[derive(Clone)]
pub struct PageScraper {
    http: HttpFetcher,
}

struct Selectors {
    link: Selector,
    title: Selector,
    content: Selector,
    image: Selector,
}

impl Selectors {
    fn parse(config: &ScrapeConfig) -> Result<Self, AppError> {
        Ok(Self {
            link: parse_selector(&config.link_selector)?,
            title: parse_selector(&config.title_selector)?,
            content: parse_selector(&config.content_selector)?,
            image: parse_selector(&config.image_selector)?,
        })
    }
}

fn parse_selector(raw: &str) -> Result<Selector, AppError> {
    Selector::parse(raw).map_err(|err| AppError::Validation(format!("bad selector {raw:?}: {err:?}")))
}

impl PageScraper {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    #[tracing::instrument(skip_all, fields(source_id = %source.id, page_url = %source.url))]
    pub async fn fetch(&self, source: &Source) -> Result<FetchOutcome, AppError> {
        let selectors = Selectors::parse(&source.scrape)?;
        let base = Url::parse(&source.url)
            .map_err(|_| AppError::Validation(format!("invalid source URL: {}", source.url)))?;

        let listing = self
            .http
            .get_text(&source.url, &source.scrape.anti_detection)
            .await?;
        let links = discover_links(&listing, &base, &selectors.link, source.poll_limit());
        debug!(links = links.len(), "links discovered");

        let mut outcome = FetchOutcome::default();
        for link in links {
            let page = match self
                .http
                .get_text(link.as_str(), &source.scrape.anti_detection)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(url = %link, error = %err, "article page fetch failed");
                    outcome.failed += 1;
                    continue;
                }
            };

            match extract_article(&page, &link, &selectors) {
                Some(draft) => outcome.drafts.push(draft),
                None => {
                    warn!(url = %link, "no article content found");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            items = outcome.drafts.len(),
            failed = outcome.failed,
            "page source scraped"
        );
        Ok(outcome)
    }
}

/// Absolute http(s) article links in document order, deduplicated, excluding the listing itself.
fn discover_links(html: &str, base: &Url, selector: &Selector, limit: usize) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(selector) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);
        if resolved == *base {
            continue;
        }
        if seen.insert(resolved.to_string()) {
            links.push(resolved);
        }
        if links.len() >= limit {
            break;
        }
    }

    links
}

fn extract_article(html: &str, url: &Url, selectors: &Selectors) -> Option<ArticleDraft> {
    let document = Html::parse_document(html);

    let title = document
        .select(&selectors.title)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty());

    let content = document
        .select(&selectors.content)
        .map(|el| html_to_text(&el.html()))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let image = document
        .select(&selectors.image)
        .filter_map(|el| el.value().attr("src"))
        .find_map(|src| url.join(src.trim()).ok())
        .map(|resolved| resolved.to_string());

    let (title, content) = if content.is_empty() {
        let (fallback_title, fallback_content) = readability_fallback(html, url)?;
        (title.or(fallback_title), fallback_content)
    } else {
        (title, content)
    };

    Some(ArticleDraft {
        original_url: url.to_string(),
        original_title: title.unwrap_or_else(|| UNTITLED.to_string()),
        original_content: content,
        original_image_url: image,
    })
}

/// Readability extraction for pages whose content selector matched nothing.
fn readability_fallback(html: &str, url: &Url) -> Option<(Option<String>, String)> {
    let config = dom_smoothie::Config {
        text_mode: TextMode::Formatted,
        ..Default::default()
    };
    let mut readability = Readability::new(html, Some(url.as_str()), Some(config)).ok()?;
    let article = readability.parse().ok()?;

    let content = article.text_content.trim().to_string();
    if content.is_empty() {
        return None;
    }
    let title = Some(article.title.trim().to_string()).filter(|title| !title.is_empty());
    Some((title, content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_selectors() -> Selectors {
        Selectors::parse(&ScrapeConfig::default()).expect("default selectors")
    }

    #[test]
    fn links_are_resolved_deduplicated_and_capped() {
        let base = Url::parse("https://news.example/latest").expect("base");
        let html = r##"
            <a href="#top">Top</a>
            <a href="/2024/storm">Storm</a>
            <a href="https://news.example/2024/storm#comments">Storm again</a>
            <a href="mailto:desk@news.example">Mail</a>
            <a href="https://news.example/latest">Self</a>
            <a href="2024/flood">Flood</a>
            <a href="/2024/heat">Heat</a>
        "##;

        let links = discover_links(html, &base, &default_selectors().link, 2);
        let links: Vec<String> = links.into_iter().map(|u| u.to_string()).collect();
        assert_eq!(
            links,
            vec![
                "https://news.example/2024/storm".to_string(),
                "https://news.example/2024/flood".to_string(),
            ]
        );
    }

    #[test]
    fn article_fields_come_from_selectors() {
        let url = Url::parse("https://news.example/2024/storm").expect("url");
        let html = r#"
            <html><body>
              <nav>Menu</nav>
              <h1> Storm   Hits Coast </h1>
              <article>
                <img src="/img/storm.jpg">
                <p>Heavy rain lashed the shore.</p>
                <aside>Related stories</aside>
                <script>track()</script>
                <p>Residents were evacuated.</p>
              </article>
            </body></html>
        "#;

        let draft = extract_article(html, &url, &default_selectors()).expect("draft");
        assert_eq!(draft.original_title, "Storm Hits Coast");
        assert_eq!(
            draft.original_content,
            "Heavy rain lashed the shore.\nResidents were evacuated."
        );
        assert_eq!(
            draft.original_image_url.as_deref(),
            Some("https://news.example/img/storm.jpg")
        );
        assert_eq!(draft.original_url, "https://news.example/2024/storm");
    }

    #[test]
    fn missing_title_becomes_untitled() {
        let url = Url::parse("https://news.example/a").expect("url");
        let html = "<article><p>Body only.</p></article>";

        let draft = extract_article(html, &url, &default_selectors()).expect("draft");
        assert_eq!(draft.original_title, UNTITLED);
        assert!(draft.original_image_url.is_none());
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let config = ScrapeConfig {
            content_selector: "div[".into(),
            ..ScrapeConfig::default()
        };
        assert!(matches!(
            Selectors::parse(&config),
            Err(AppError::Validation(_))
        ));
    }
}
