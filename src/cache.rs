use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Article;

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Cache key for a set of feeds requested together: deduplicated, sorted,
/// joined with `|`.
pub fn cache_key<'a, I>(feed_urls: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let unique: BTreeSet<&str> = feed_urls.into_iter().collect();
    unique.into_iter().collect::<Vec<_>>().join("|")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fetched_at: DateTime<Utc>,
    pub articles: Vec<Article>,
}

/// Merged article lists keyed by request shape. Entries expire by age and
/// are only ever replaced, never evicted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedCache {
    entries: HashMap<String, CacheEntry>,
}

impl FeedCache {
    /// Articles cached under `key`, if they are younger than `ttl` at `now`.
    pub fn fresh(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Option<&[Article]> {
        let entry = self.entries.get(key)?;
        // a fetch time in the future counts as age zero
        let age = now
            .signed_duration_since(entry.fetched_at)
            .to_std()
            .unwrap_or_default();
        (age < ttl).then_some(entry.articles.as_slice())
    }

    pub fn insert(&mut self, key: String, fetched_at: DateTime<Utc>, articles: Vec<Article>) {
        self.entries.insert(
            key,
            CacheEntry {
                fetched_at,
                articles,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
