//! The `Reader` owns the application state and routes every user action
//! through the store, the aggregator and the sync coordinator.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::cache::cache_key;
use crate::config::Config;
use crate::content::filter_media;
use crate::db::Database;
use crate::error::{ReaderError, SyncError};
use crate::fetcher::Fetcher;
use crate::models::Article;
use crate::state::{Mutation, ReaderState, SyncPolicy};
use crate::sync::{GistClient, SyncCoordinator, SyncOutcome};

/// An article of the current view together with its read flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleEntry {
    #[serde(flatten)]
    pub article: Article,
    pub read: bool,
}

#[derive(Default)]
struct CurrentArticles {
    generation: u64,
    articles: Vec<Article>,
}

pub struct Reader {
    db: Arc<Database>,
    fetcher: Fetcher,
    sync: SyncCoordinator,
    state: RwLock<ReaderState>,
    current: RwLock<CurrentArticles>,
    generation: AtomicU64,
    cache_ttl: Duration,
}

impl Reader {
    /// Open the store, load persisted state and build the network clients.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let db = Database::new(&config.database_url).await?;
        db.initialize().await?;
        let db = Arc::new(db);

        let state = db.load_state(&config.folders).await;
        // persists seeded folders and the normalized form of legacy data
        db.save_library(&state).await?;
        info!(
            folders = state.folders.len(),
            read = state.read_articles.len(),
            "Reader state loaded"
        );

        let fetcher = Fetcher::new(config.proxy_url.clone(), config.request_timeout())?;
        let gist = GistClient::new(config.sync.api_base.clone(), config.request_timeout())?;
        let sync = SyncCoordinator::new(gist, db.clone()).await;

        Ok(Self {
            db,
            fetcher,
            sync,
            state: RwLock::new(state),
            current: RwLock::new(CurrentArticles::default()),
            generation: AtomicU64::new(0),
            cache_ttl: config.cache_ttl(),
        })
    }

    pub async fn snapshot(&self) -> ReaderState {
        self.state.read().await.clone()
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    /// Apply a mutation, persist what it touched and push it if it is
    /// sync-worthy. Returns whether the state changed.
    pub async fn apply(&self, mutation: Mutation) -> Result<bool, ReaderError> {
        let policy = mutation.sync_policy();
        debug!(?mutation, "applying mutation");

        let (changed, view_changed) = {
            let mut state = self.state.write().await;
            let view_before = state.view.clone();
            let changed = state.apply(mutation)?;
            if changed {
                if policy == SyncPolicy::SyncWorthy {
                    self.db.save_library(&state).await?;
                }
                // folder removal can reset the view too
                self.db.save_view(&state).await?;
            }
            (changed, state.view != view_before)
        };

        if view_changed {
            self.invalidate_view().await;
        }
        if changed && policy == SyncPolicy::SyncWorthy {
            if let Err(e) = self.sync.push(&self.state).await {
                warn!(error = %e, "push after mutation failed");
            }
        }
        Ok(changed)
    }

    /// Drop the shown articles and make any in-flight load stale.
    async fn invalidate_view(&self) {
        let mut current = self.current.write().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "view changed, clearing articles");
        *current = CurrentArticles {
            generation,
            articles: Vec::new(),
        };
    }

    /// Load the articles of the current view. Returns false when a newer
    /// load started or the view changed meanwhile, and this result was
    /// discarded.
    pub async fn load_view(&self) -> Result<bool, ReaderError> {
        self.load_view_at(Utc::now()).await
    }

    pub async fn load_view_at(&self, now: DateTime<Utc>) -> Result<bool, ReaderError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (key, urls, cached) = {
            let state = self.state.read().await;
            let urls = unique(state.view_feed_urls());
            let key = cache_key(urls.iter().map(String::as_str));
            let cached = state
                .feed_cache
                .fresh(&key, now, self.cache_ttl)
                .map(<[Article]>::to_vec);
            (key, urls, cached)
        };

        let articles = if urls.is_empty() {
            Vec::new()
        } else if let Some(articles) = cached {
            debug!(key = %key, "feed cache hit");
            articles
        } else {
            let articles = self.fetcher.fetch_merged(&urls).await;
            let cache = {
                let mut state = self.state.write().await;
                state.feed_cache.insert(key, now, articles.clone());
                state.feed_cache.clone()
            };
            self.db.save_feed_cache(&cache).await?;
            articles
        };

        let mut current = self.current.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            info!(generation, "discarding stale view load");
            return Ok(false);
        }
        *current = CurrentArticles {
            generation,
            articles,
        };
        Ok(true)
    }

    /// Current articles, without read ones when hide-read is on.
    pub async fn visible_articles(&self) -> Vec<ArticleEntry> {
        let state = self.state.read().await;
        let current = self.current.read().await;
        current
            .articles
            .iter()
            .map(|article| ArticleEntry {
                read: state.is_read(article.identity()),
                article: article.clone(),
            })
            .filter(|entry| !(state.hide_read && entry.read))
            .collect()
    }

    /// Generation of the articles currently shown; zero before any load.
    pub async fn current_generation(&self) -> u64 {
        self.current.read().await.generation
    }

    pub async fn mark_read(&self, ids: Vec<String>) -> Result<bool, ReaderError> {
        self.apply(Mutation::MarkRead(ids)).await
    }

    pub async fn mark_all_read(&self) -> Result<bool, ReaderError> {
        let ids: Vec<String> = self
            .current
            .read()
            .await
            .articles
            .iter()
            .map(|article| article.identity().to_string())
            .collect();
        self.mark_read(ids).await
    }

    /// Mark an article of the current view read and return it with its
    /// content filtered by the media settings.
    pub async fn open_article(&self, identity: &str) -> Result<Option<Article>, ReaderError> {
        let found = self
            .current
            .read()
            .await
            .articles
            .iter()
            .find(|article| article.identity() == identity)
            .cloned();
        let Some(mut article) = found else {
            return Ok(None);
        };

        self.mark_read(vec![identity.to_string()]).await?;
        let settings = self.state.read().await.settings.clone();
        article.content_html = filter_media(&article.content_html, &settings);
        Ok(Some(article))
    }

    pub async fn connect(&self, token: &str) -> Result<SyncOutcome, SyncError> {
        let outcome = self.sync.connect(token, &self.state).await?;
        if matches!(outcome, SyncOutcome::Connected { .. }) {
            self.persist().await?;
        }
        Ok(outcome)
    }

    pub async fn disconnect(&self) -> Result<(), SyncError> {
        self.sync.disconnect().await
    }

    pub async fn push(&self) -> Result<SyncOutcome, SyncError> {
        self.sync.push(&self.state).await
    }

    pub async fn pull(&self) -> Result<SyncOutcome, SyncError> {
        let view_before = self.state.read().await.view.clone();
        let outcome = self.sync.pull(&self.state).await?;
        if outcome == SyncOutcome::Pulled {
            self.persist().await?;
            if self.state.read().await.view != view_before {
                self.invalidate_view().await;
            }
        }
        Ok(outcome)
    }

    /// Pull once after `delay` if a credential is stored, then reload the view.
    pub async fn startup_pull(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
        if !self.sync.credential().await.is_configured() {
            debug!("sync not configured, skipping startup pull");
            return;
        }

        match self.pull().await {
            Ok(SyncOutcome::Pulled) => {
                if let Err(e) = self.load_view().await {
                    warn!(error = %e, "failed to reload view after startup pull");
                }
            }
            Ok(outcome) => debug!(?outcome, "startup pull did not run"),
            Err(e) => error!(error = %e, "startup pull failed"),
        }
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let state = self.state.read().await;
        self.db.save_library(&state).await?;
        self.db.save_view(&state).await?;
        Ok(())
    }
}

/// Drop repeated URLs, keeping first occurrences in order.
fn unique(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|url| seen.insert(url.clone())).collect()
}
