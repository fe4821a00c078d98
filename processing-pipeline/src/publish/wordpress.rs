use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::site::{Site, SiteCategory},
};
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{CredentialStore, Identity, PostDraft, PublishedPost, PublishingTarget, TargetResolver};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CATEGORIES_PER_PAGE: u32 = 100;
const ERROR_BODY_MAX_CHARS: usize = 300;

/// WordPress REST API (`/wp-json/wp/v2`) with application-password basic auth.
pub struct WordPressClient {
    http: reqwest::Client,
    api_base: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct WpCategory {
    id: i64,
    name: String,
}

#[derive(Deserialize)]
struct WpMedia {
    id: i64,
}

#[derive(Deserialize)]
struct WpPost {
    id: i64,
    #[serde(default)]
    link: String,
}

#[derive(Deserialize)]
struct WpUser {
    id: i64,
    #[serde(default)]
    name: String,
}

impl WordPressClient {
    pub fn new(
        http: reqwest::Client,
        site_url: &str,
        username: String,
        password: String,
    ) -> Self {
        Self {
            http,
            api_base: format!("{}/wp-json/wp/v2", site_url.trim_end_matches('/')),
            username,
            password,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .basic_auth(&self.username, Some(&self.password))
            .timeout(REQUEST_TIMEOUT)
    }
}

/// Server-side and throttling failures stay retryable; any other non-success is a rejection.
async fn ensure_success(response: Response, action: &str) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(ERROR_BODY_MAX_CHARS).collect();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(AppError::Provider(format!("{action} failed with {status}: {detail}")))
    } else {
        Err(AppError::Publish(format!("{action} rejected with {status}: {detail}")))
    }
}

fn total_pages(response: &Response) -> u32 {
    response
        .headers()
        .get("X-WP-TotalPages")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(1)
}

fn content_type_for(filename: &str) -> &'static str {
    if filename.ends_with(".png") {
        "image/png"
    } else if filename.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// JSON body for `POST /posts`; optional fields are omitted rather than nulled.
fn post_body(post: &PostDraft) -> Value {
    let mut body = Map::new();
    body.insert("title".into(), json!(post.title));
    body.insert("content".into(), json!(post.content));
    body.insert("status".into(), json!("publish"));
    if let Some(category_id) = post.category_id {
        body.insert("categories".into(), json!([category_id]));
    }
    if let Some(media_id) = post.media_id {
        body.insert("featured_media".into(), json!(media_id));
    }
    if let Some(author_id) = post.author_id {
        body.insert("author".into(), json!(author_id));
    }
    if let Some(summary) = post.summary.as_deref().filter(|summary| !summary.is_empty()) {
        body.insert(
            "meta".into(),
            json!({
                "_yoast_wpseo_metadesc": summary,
                "rank_math_description": summary,
            }),
        );
    }
    Value::Object(body)
}

#[async_trait]
impl PublishingTarget for WordPressClient {
    async fn list_categories(&self) -> Result<Vec<SiteCategory>, AppError> {
        let mut categories = Vec::new();
        let mut page = 1_u32;

        loop {
            let response = self
                .authorized(self.http.get(self.endpoint("categories")))
                .query(&[("per_page", CATEGORIES_PER_PAGE), ("page", page)])
                .send()
                .await?;
            let response = ensure_success(response, "category listing").await?;
            let pages = total_pages(&response);

            let batch: Vec<WpCategory> = response
                .json()
                .await
                .context("decoding WordPress category page")?;
            if batch.is_empty() {
                break;
            }
            categories.extend(batch.into_iter().map(|category| SiteCategory {
                id: category.id,
                name: category.name,
            }));

            if page >= pages {
                break;
            }
            page = page.saturating_add(1);
        }

        debug!(count = categories.len(), "categories listed");
        Ok(categories)
    }

    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        alt_text: &str,
    ) -> Result<i64, AppError> {
        let response = self
            .authorized(self.http.post(self.endpoint("media")))
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            )
            .header(header::CONTENT_TYPE, content_type_for(filename))
            .body(bytes)
            .send()
            .await?;
        let media: WpMedia = ensure_success(response, "media upload")
            .await?
            .json()
            .await
            .context("decoding WordPress media response")?;

        if !alt_text.is_empty() {
            let update = self
                .authorized(self.http.post(self.endpoint(&format!("media/{}", media.id))))
                .json(&json!({ "alt_text": alt_text }))
                .send()
                .await;
            match update {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!(media_id = media.id, status = %response.status(), "alt text update rejected"),
                Err(err) => warn!(media_id = media.id, error = %err, "alt text update failed"),
            }
        }

        Ok(media.id)
    }

    async fn create_post(&self, post: &PostDraft) -> Result<PublishedPost, AppError> {
        let response = self
            .authorized(self.http.post(self.endpoint("posts")))
            .json(&post_body(post))
            .send()
            .await?;
        let created: WpPost = ensure_success(response, "post creation")
            .await?
            .json()
            .await
            .context("decoding WordPress post response")?;

        Ok(PublishedPost {
            post_id: created.id.to_string(),
            post_url: created.link,
        })
    }

    async fn whoami(&self) -> Result<Identity, AppError> {
        let response = self
            .authorized(self.http.get(self.endpoint("users/me")))
            .send()
            .await?;
        let user: WpUser = ensure_success(response, "credential check")
            .await?
            .json()
            .await
            .context("decoding WordPress user")?;
        Ok(Identity {
            id: user.id,
            name: user.name,
        })
    }
}

/// Resolves each site to a WordPress client using the credential store.
pub struct WordPressResolver {
    http: reqwest::Client,
    credentials: CredentialStore,
}

impl WordPressResolver {
    pub fn new(credentials: CredentialStore) -> Result<Self, AppError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            credentials,
        })
    }
}

impl TargetResolver for WordPressResolver {
    fn target_for(&self, site: &Site) -> Result<Arc<dyn PublishingTarget>, AppError> {
        let credentials = self.credentials.resolve(&site.credentials_ref)?;
        Ok(Arc::new(WordPressClient::new(
            self.http.clone(),
            &site.base_url,
            credentials.username.clone(),
            credentials.application_password.clone(),
        )))
    }
}
