pub mod feed;
pub mod http;
pub mod page;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::{
        article::ArticleDraft,
        source::{Source, SourceKind},
    },
};
use scraper::{Html, Node};

pub use feed::FeedFetcher;
pub use http::HttpFetcher;
pub use page::PageScraper;

pub(crate) const UNTITLED: &str = "Untitled";

const SKIPPED_ELEMENTS: [&str; 6] = ["script", "style", "nav", "footer", "aside", "iframe"];
const BLOCK_ELEMENTS: [&str; 16] = [
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "blockquote", "tr",
];

/// Candidates from one poll plus the number of items that could not be fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub drafts: Vec<ArticleDraft>,
    pub failed: usize,
}

/// Produces candidate items for a source.
///
/// An `Err` is a total failure (nothing could be fetched); per-item problems are
/// reported through [`FetchOutcome::failed`].
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<FetchOutcome, AppError>;
}

/// Dispatches on the source kind.
#[derive(Clone)]
pub struct SourceFetcher {
    feed: FeedFetcher,
    page: PageScraper,
}

impl SourceFetcher {
    pub fn new() -> Result<Self, AppError> {
        let http = HttpFetcher::new()?;
        Ok(Self {
            feed: FeedFetcher::new(http.clone()),
            page: PageScraper::new(http),
        })
    }
}

#[async_trait]
impl ContentFetcher for SourceFetcher {
    async fn fetch(&self, source: &Source) -> Result<FetchOutcome, AppError> {
        match source.kind {
            SourceKind::Feed => self.feed.fetch(source).await,
            SourceKind::Page => self.page.fetch(source).await,
        }
    }
}

/// Visible text of an HTML fragment, one line per block, chrome elements dropped.
pub(crate) fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut raw = String::new();

    for node in fragment.tree.root().descendants() {
        match node.value() {
            Node::Text(text) => {
                let hidden = node.ancestors().any(|ancestor| {
                    ancestor
                        .value()
                        .as_element()
                        .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
                });
                if !hidden {
                    raw.push_str(&text.replace('\n', " "));
                }
            }
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => raw.push('\n'),
            _ => {}
        }
    }

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
