use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{error::AppError, storage::types::source::AntiDetection};
use ingestion_pipeline::fetch::HttpFetcher;
use serde::Deserialize;
use tracing::debug;

use super::{ImageClassifier, ImageGenerator, ImageVerdict, MediaFetcher, StockSearch};
use crate::llm_output::extract_json_payload;

const STOP_WORDS: [&str; 15] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "is", "are", "was",
    "were",
];
const MAX_QUERY_KEYWORDS: usize = 5;
const STOCK_RESULTS_PER_QUERY: u32 = 5;
const STOCK_TIMEOUT: Duration = Duration::from_secs(15);
const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const GENERATED_IMAGE_SIZE: &str = "1024x576";

/// Up to five lowercase content words of a title, stop-words and short words removed.
pub fn build_keyword_query(title: &str) -> String {
    title
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| word.chars().count() > 2 && !STOP_WORDS.contains(&word.as_str()))
        .take(MAX_QUERY_KEYWORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

fn stock_client() -> Result<reqwest::Client, AppError> {
    Ok(reqwest::Client::builder().timeout(STOCK_TIMEOUT).build()?)
}

pub struct PexelsSearch {
    http: reqwest::Client,
    api_key: String,
}

impl PexelsSearch {
    pub fn new(api_key: String) -> Result<Self, AppError> {
        Ok(Self {
            http: stock_client()?,
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct PexelsResponse {
    #[serde(default)]
    photos: Vec<PexelsPhoto>,
}

#[derive(Deserialize)]
struct PexelsPhoto {
    src: PexelsSources,
}

#[derive(Deserialize)]
struct PexelsSources {
    large: String,
}

fn pexels_urls(body: PexelsResponse) -> Vec<String> {
    body.photos.into_iter().map(|photo| photo.src.large).collect()
}

#[async_trait]
impl StockSearch for PexelsSearch {
    fn name(&self) -> &'static str {
        "pexels"
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, AppError> {
        let body: PexelsResponse = self
            .http
            .get("https://api.pexels.com/v1/search")
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .query(&[
                ("query", query.to_string()),
                ("per_page", STOCK_RESULTS_PER_QUERY.to_string()),
                ("orientation", "landscape".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(pexels_urls(body))
    }
}

pub struct UnsplashSearch {
    http: reqwest::Client,
    access_key: String,
}

impl UnsplashSearch {
    pub fn new(access_key: String) -> Result<Self, AppError> {
        Ok(Self {
            http: stock_client()?,
            access_key,
        })
    }
}

#[derive(Deserialize)]
struct UnsplashResponse {
    #[serde(default)]
    results: Vec<UnsplashPhoto>,
}

#[derive(Deserialize)]
struct UnsplashPhoto {
    urls: UnsplashUrls,
}

#[derive(Deserialize)]
struct UnsplashUrls {
    regular: String,
}

fn unsplash_urls(body: UnsplashResponse) -> Vec<String> {
    body.results.into_iter().map(|photo| photo.urls.regular).collect()
}

#[async_trait]
impl StockSearch for UnsplashSearch {
    fn name(&self) -> &'static str {
        "unsplash"
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, AppError> {
        let body: UnsplashResponse = self
            .http
            .get("https://api.unsplash.com/search/photos")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Client-ID {}", self.access_key),
            )
            .query(&[
                ("query", query.to_string()),
                ("per_page", STOCK_RESULTS_PER_QUERY.to_string()),
                ("orientation", "landscape".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(unsplash_urls(body))
    }
}

/// Image generation over an OpenAI-compatible `/images/generations` endpoint.
///
/// Goes through reqwest rather than the typed client because providers accept
/// sizes outside the OpenAI enum.
pub struct OpenAiImageGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiImageGenerator {
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self, AppError> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(GENERATION_TIMEOUT)
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[derive(Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Deserialize)]
struct GeneratedImage {
    url: Option<String>,
    b64_json: Option<String>,
}

fn generated_url(body: GenerationResponse) -> Option<String> {
    let image = body.data.into_iter().next()?;
    image
        .url
        .filter(|url| !url.is_empty())
        .or_else(|| image.b64_json.map(|b64| format!("data:image/png;base64,{b64}")))
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Option<String>, AppError> {
        let body: GenerationResponse = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "n": 1,
                "size": GENERATED_IMAGE_SIZE,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(generated_url(body))
    }
}

#[derive(Debug, Deserialize)]
struct ImageAssessment {
    clean: bool,
    #[serde(default)]
    has_watermark: bool,
    #[serde(default)]
    has_text: bool,
    #[serde(default)]
    has_logo: bool,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<ImageAssessment> for ImageVerdict {
    fn from(assessment: ImageAssessment) -> Self {
        let mut reasons = Vec::new();
        if assessment.has_watermark {
            reasons.push("watermark".to_string());
        }
        if assessment.has_text {
            reasons.push("text overlay".to_string());
        }
        if assessment.has_logo {
            reasons.push("logo".to_string());
        }
        let low_quality = assessment
            .quality
            .as_deref()
            .is_some_and(|quality| quality.eq_ignore_ascii_case("low"));
        if low_quality {
            reasons.push("low quality".to_string());
        }
        if let Some(reason) = assessment.reason.filter(|reason| !reason.trim().is_empty()) {
            reasons.push(reason);
        }

        let acceptable = assessment.clean
            && !assessment.has_watermark
            && !assessment.has_text
            && !assessment.has_logo
            && !low_quality;
        ImageVerdict {
            acceptable,
            reasons,
        }
    }
}

const CLASSIFIER_PROMPT: &str = r#"Decide whether this image can be reused as the featured image of a news article.
Look for visible watermarks, overlaid text, logos and poor quality or artifacts.
Answer with JSON only:
{"clean": true, "has_watermark": false, "has_text": false, "has_logo": false, "quality": "high|medium|low", "reason": "short explanation"}"#;

/// Vision-model check of an original image.
pub struct VisionClassifier {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    timeout: Duration,
}

impl VisionClassifier {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String, timeout: Duration) -> Self {
        Self {
            client,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl ImageClassifier for VisionClassifier {
    async fn classify(&self, image_url: &str) -> Result<ImageVerdict, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(400_u32)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(CLASSIFIER_PROMPT)
                        .build()?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(image_url)
                                .detail(ImageDetail::Low)
                                .build()?,
                        )
                        .build()?
                        .into(),
                ])
                .build()?
                .into()])
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AppError::Provider(format!("image classification by {} timed out", self.model)))??;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::LLMParsing("empty image classification".into()))?;

        let assessment: ImageAssessment = extract_json_payload(&content)?;
        let verdict = ImageVerdict::from(assessment);
        debug!(acceptable = verdict.acceptable, reasons = ?verdict.reasons, "image classified");
        Ok(verdict)
    }
}

/// Fetches remote images through the guarded HTTP client; decodes `data:` URLs in place.
#[derive(Clone)]
pub struct HttpMediaFetcher {
    http: HttpFetcher,
}

impl HttpMediaFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

fn decode_data_url(url: &str) -> Option<Result<Vec<u8>, AppError>> {
    let rest = url.strip_prefix("data:")?;
    let Some((meta, payload)) = rest.split_once(',') else {
        return Some(Err(AppError::Validation("malformed data URL".into())));
    };
    if !meta.ends_with(";base64") {
        return Some(Err(AppError::Validation(
            "only base64 data URLs are supported".into(),
        )));
    }
    Some(
        STANDARD
            .decode(payload.trim())
            .map_err(|err| AppError::Validation(format!("invalid base64 image: {err}"))),
    )
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        if let Some(decoded) = decode_data_url(url) {
            return decoded;
        }
        let plain = AntiDetection {
            rotate_user_agent: false,
            random_delay: false,
        };
        self.http.get_bytes(url, &plain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_query_drops_stop_words_and_short_words() {
        assert_eq!(build_keyword_query("Storm Hits the Coast"), "storm hits coast");
        assert_eq!(
            build_keyword_query("The Mayor, an Ex-Pilot, Is Back on TV: Council Votes Today"),
            "mayor ex-pilot back council votes"
        );
        assert_eq!(build_keyword_query("A to Z"), "");
    }

    #[test]
    fn stock_payloads_map_to_urls() {
        let pexels: PexelsResponse = serde_json::from_value(serde_json::json!({
            "photos": [{"src": {"large": "https://images.pexels.com/1.jpeg"}}]
        }))
        .expect("pexels");
        assert_eq!(pexels_urls(pexels), vec!["https://images.pexels.com/1.jpeg"]);

        let unsplash: UnsplashResponse = serde_json::from_value(serde_json::json!({
            "results": [{"urls": {"regular": "https://images.unsplash.com/2"}}]
        }))
        .expect("unsplash");
        assert_eq!(unsplash_urls(unsplash), vec!["https://images.unsplash.com/2"]);

        let empty: UnsplashResponse = serde_json::from_value(serde_json::json!({})).expect("empty");
        assert!(unsplash_urls(empty).is_empty());
    }

    #[test]
    fn generated_images_prefer_urls_then_inline_data() {
        let by_url: GenerationResponse = serde_json::from_value(serde_json::json!({
            "data": [{"url": "https://gen.example/1.png"}]
        }))
        .expect("url");
        assert_eq!(generated_url(by_url).as_deref(), Some("https://gen.example/1.png"));

        let inline: GenerationResponse = serde_json::from_value(serde_json::json!({
            "data": [{"b64_json": "aGVsbG8="}]
        }))
        .expect("inline");
        assert_eq!(
            generated_url(inline).as_deref(),
            Some("data:image/png;base64,aGVsbG8=")
        );

        let nothing: GenerationResponse =
            serde_json::from_value(serde_json::json!({"data": []})).expect("nothing");
        assert!(generated_url(nothing).is_none());
    }

    #[test]
    fn assessment_flags_make_an_image_unacceptable() {
        let clean: ImageAssessment = extract_json_payload(
            r#"{"clean": true, "has_watermark": false, "has_text": false, "has_logo": false, "quality": "high", "reason": "ok"}"#,
        )
        .expect("clean");
        assert!(ImageVerdict::from(clean).acceptable);

        let watermarked: ImageAssessment = extract_json_payload(
            r#"Result: {"clean": true, "has_watermark": true, "quality": "medium"}"#,
        )
        .expect("watermarked");
        let verdict = ImageVerdict::from(watermarked);
        assert!(!verdict.acceptable);
        assert_eq!(verdict.reasons, vec!["watermark".to_string()]);

        let low: ImageAssessment =
            extract_json_payload(r#"{"clean": true, "quality": "LOW"}"#).expect("low");
        assert!(!ImageVerdict::from(low).acceptable);
    }

    #[test]
    fn data_urls_are_decoded_locally() {
        let decoded = decode_data_url("data:image/png;base64,aGVsbG8=")
            .expect("data url")
            .expect("decoded");
        assert_eq!(decoded, b"hello");
        assert!(decode_data_url("https://example.com/a.png").is_none());
        assert!(matches!(
            decode_data_url("data:text/plain,hello"),
            Some(Err(AppError::Validation(_)))
        ));
    }
}
