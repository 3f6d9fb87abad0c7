use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::models::Article;

/// Response body of the feed-to-JSON proxy.
#[derive(Debug, Deserialize)]
pub struct ProxyResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub feed: Option<ProxyFeed>,
    #[serde(default)]
    pub items: Vec<ProxyItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProxyFeed {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pub_date: Option<String>,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub enclosure: Option<ProxyEnclosure>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProxyEnclosure {
    #[serde(default)]
    pub link: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl ProxyItem {
    pub fn into_article(self, source_name: &str) -> Article {
        let published_at = self
            .pub_date
            .as_deref()
            .and_then(parse_pub_date)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let thumbnail_url = non_empty(self.thumbnail)
            .or_else(|| non_empty(self.enclosure.and_then(|enclosure| enclosure.link)));

        let content_html = non_empty(self.content)
            .or(self.description)
            .unwrap_or_default();

        Article {
            guid: non_empty(self.guid),
            link: self.link,
            title: self.title,
            published_at,
            source_name: source_name.to_string(),
            thumbnail_url,
            content_html,
        }
    }
}

/// Parse the proxy's `pubDate`. The proxy emits `YYYY-MM-DD HH:MM:SS` in
/// UTC; RFC 3339 and RFC 2822 are accepted too.
pub fn parse_pub_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Resolves feeds through the proxy.
pub struct Fetcher {
    client: Client,
    proxy_url: String,
}

impl Fetcher {
    pub fn new(proxy_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("OrbitReader/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            proxy_url: proxy_url.into(),
        })
    }

    /// Fetch every feed in parallel, merge and sort newest first.
    ///
    /// A feed that fails contributes nothing; this never errors.
    pub async fn fetch_merged(&self, feed_urls: &[String]) -> Vec<Article> {
        info!("Fetching {} feeds", feed_urls.len());

        let results = join_all(feed_urls.iter().map(|url| async move {
            match self.fetch_feed(url).await {
                Ok(articles) => articles,
                Err(e) => {
                    warn!(feed = %url, error = %e, "failed to fetch feed");
                    Vec::new()
                }
            }
        }))
        .await;

        let mut articles: Vec<Article> = results.into_iter().flatten().collect();
        // stable: ties keep arrival order
        articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        articles
    }

    pub async fn fetch_feed(&self, feed_url: &str) -> Result<Vec<Article>, FetchError> {
        let response = self
            .client
            .get(&self.proxy_url)
            .query(&[("rss_url", feed_url)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body: ProxyResponse = response.json().await?;
        if body.status != "ok" {
            return Err(FetchError::Proxy {
                status: body.status,
                message: body.message.unwrap_or_default(),
            });
        }

        let source_name = body.feed.unwrap_or_default().title;
        let articles: Vec<Article> = body
            .items
            .into_iter()
            .map(|item| item.into_article(&source_name))
            .collect();

        info!("Resolved {} items for feed '{}'", articles.len(), feed_url);
        Ok(articles)
    }
}
