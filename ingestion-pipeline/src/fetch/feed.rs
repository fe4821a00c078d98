use common::{
    error::AppError,
    storage::types::{
        article::ArticleDraft,
        source::{AntiDetection, Source},
    },
};
use feed_rs::model::Entry;
use scraper::{Html, Selector};
use tracing::{debug, info};

use super::{html_to_text, FetchOutcome, UNTITLED};
use super::http::HttpFetcher;

/// RSS/Atom sources.
#[derive(Clone)]
pub struct FeedFetcher {
    http: HttpFetcher,
}

impl FeedFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, source: &Source) -> Result<FetchOutcome, AppError> {
        let anti_detection = AntiDetection {
            rotate_user_agent: source.scrape.anti_detection.rotate_user_agent,
            random_delay: false,
        };
        let bytes = self.http.get_bytes(&source.url, &anti_detection).await?;
        let outcome = parse_feed(&bytes, source.poll_limit())?;

        info!(
            source_id = %source.id,
            feed_url = %source.url,
            items = outcome.drafts.len(),
            unlinked = outcome.failed,
            "feed parsed"
        );
        Ok(outcome)
    }
}

/// Parse a feed document into at most `limit` drafts, in document order.
///
/// Entries without a usable link are counted as failed; only entries seen
/// before the limit is reached are counted.
pub fn parse_feed(bytes: &[u8], limit: usize) -> Result<FetchOutcome, AppError> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|err| AppError::Processing(format!("unparseable feed: {err}")))?;

    let mut outcome = FetchOutcome {
        drafts: Vec::new(),
        failed: 0,
    };
    for entry in feed.entries {
        if outcome.drafts.len() >= limit {
            break;
        }
        let entry_id = entry.id.clone();
        match entry_to_draft(entry) {
            Some(draft) => outcome.drafts.push(draft),
            None => {
                debug!(%entry_id, "feed entry has no link; skipped");
                outcome.failed = outcome.failed.saturating_add(1);
            }
        }
    }
    Ok(outcome)
}

fn entry_to_draft(entry: Entry) -> Option<ArticleDraft> {
    let url = entry
        .links
        .first()
        .map(|link| link.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

    let title = entry
        .title
        .as_ref()
        .map(|text| html_to_text(&text.content))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let body_html = entry
        .content
        .as_ref()
        .and_then(|content| content.body.clone())
        .or_else(|| entry.summary.as_ref().map(|summary| summary.content.clone()))
        .unwrap_or_default();

    let image = media_image(&entry).or_else(|| first_img_src(&body_html));

    Some(ArticleDraft {
        original_url: url,
        original_title: title,
        original_content: html_to_text(&body_html),
        original_image_url: image,
    })
}

/// Media RSS content first, then thumbnails.
fn media_image(entry: &Entry) -> Option<String> {
    let content = entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .find(|content| {
            content
                .content_type
                .as_ref()
                .map_or(true, |mime| mime.to_string().starts_with("image/"))
        })
        .and_then(|content| content.url.as_ref().map(ToString::to_string));

    content.or_else(|| {
        entry
            .media
            .iter()
            .flat_map(|media| media.thumbnails.iter())
            .map(|thumbnail| thumbnail.image.uri.clone())
            .next()
    })
}

fn first_img_src(html: &str) -> Option<String> {
    let selector = Selector::parse("img").ok()?;
    Html::parse_fragment(html)
        .select(&selector)
        .find_map(|img| img.value().attr("src").map(str::to_string))
        .filter(|src| !src.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Coastal Wire</title>
    <link>https://wire.example</link>
    <description>News</description>
    <item>
      <title>Storm Hits Coast</title>
      <link>https://wire.example/storm</link>
      <description><![CDATA[<p>Heavy <b>rain</b> lashed the shore.</p><img src="https://img.example/inline.jpg"/>]]></description>
      <media:content url="https://img.example/storm.jpg" medium="image" type="image/jpeg"/>
    </item>
    <item>
      <title>Harbour Reopens</title>
      <link>https://wire.example/harbour</link>
      <description><![CDATA[<p>Boats return.</p><img src="https://img.example/harbour.jpg"/>]]></description>
    </item>
    <item>
      <title>Linkless Bulletin</title>
      <description>Nowhere to go.</description>
    </item>
    <item>
      <link>https://wire.example/untitled</link>
      <description>No title here.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_with_images_and_plain_text() {
        let outcome = parse_feed(RSS.as_bytes(), 10).expect("parse");
        assert_eq!(outcome.failed, 1, "the linkless entry is counted");
        let drafts = outcome.drafts;
        assert_eq!(drafts.len(), 3);

        let storm = &drafts[0];
        assert_eq!(storm.original_url, "https://wire.example/storm");
        assert_eq!(storm.original_title, "Storm Hits Coast");
        assert!(storm.original_content.contains("rain"));
        assert!(!storm.original_content.contains("<b>"));
        assert_eq!(
            storm.original_image_url.as_deref(),
            Some("https://img.example/storm.jpg")
        );

        assert_eq!(
            drafts[1].original_image_url.as_deref(),
            Some("https://img.example/harbour.jpg")
        );
        assert_eq!(drafts[2].original_title, UNTITLED);
    }

    #[test]
    fn respects_item_limit() {
        let outcome = parse_feed(RSS.as_bytes(), 1).expect("parse");
        assert_eq!(outcome.drafts.len(), 1);
        assert_eq!(outcome.drafts[0].original_title, "Storm Hits Coast");
        assert_eq!(outcome.failed, 0, "entries past the limit are not inspected");
    }

    #[test]
    fn garbage_is_a_total_failure() {
        assert!(parse_feed(b"definitely not xml", 5).is_err());
    }
}
