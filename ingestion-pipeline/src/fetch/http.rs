use std::{net::IpAddr, time::Duration};

use common::{error::AppError, storage::types::source::AntiDetection};
use rand::{seq::IndexedRandom, Rng};
use tracing::warn;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
];

/// Plain HTTP GETs for feeds and pages, with optional anti-detection behaviour.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// GET `url` and return the body, rejecting non-public targets and non-2xx responses.
    pub async fn get_bytes(
        &self,
        url: &str,
        anti_detection: &AntiDetection,
    ) -> Result<Vec<u8>, AppError> {
        let parsed =
            url::Url::parse(url).map_err(|_| AppError::Validation(format!("invalid URL: {url}")))?;
        ensure_fetch_url_allowed(&parsed)?;

        if anti_detection.random_delay {
            let millis = rand::rng().random_range(1_000..=3_000);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let response = self
            .client
            .get(parsed)
            .header(reqwest::header::USER_AGENT, pick_user_agent(anti_detection))
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }

    pub async fn get_text(
        &self,
        url: &str,
        anti_detection: &AntiDetection,
    ) -> Result<String, AppError> {
        let bytes = self.get_bytes(url, anti_detection).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn pick_user_agent(anti_detection: &AntiDetection) -> &'static str {
    if anti_detection.rotate_user_agent {
        USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    } else {
        USER_AGENTS[0]
    }
}

/// Only http(s) URLs to public hosts may be fetched.
pub fn ensure_fetch_url_allowed(url: &url::Url) -> Result<(), AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "Rejected fetch URL due to unsupported scheme");
            return Err(AppError::Validation(format!(
                "unsupported URL scheme '{scheme}'"
            )));
        }
    }

    let Some(host) = url.host_str() else {
        warn!(%url, "Rejected fetch URL missing host");
        return Err(AppError::Validation("URL is missing a host".to_string()));
    };

    if host.eq_ignore_ascii_case("localhost") {
        warn!(%url, host, "Rejected fetch URL to localhost");
        return Err(AppError::Validation("URL host is not allowed".to_string()));
    }

    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        let is_private = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };

        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_private {
            warn!(%url, host, %ip, "Rejected fetch URL pointing to restricted network range");
            return Err(AppError::Validation("URL host is not allowed".to_string()));
        }
    }

    Ok(())
}
