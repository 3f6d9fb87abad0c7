//! Cloud sync of folders, settings and read state through a single gist.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::SyncError;
use crate::models::SyncCredential;
use crate::state::{ReaderState, SyncDocument};

/// Description that marks the gist holding our document.
pub const DOCUMENT_DESCRIPTION: &str = "orbit-reader-config";
pub const DOCUMENT_FILENAME: &str = "orbit_config.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Gist {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: HashMap<String, GistFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GistFile {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identity {
    login: String,
}

/// The gist in `gists` that holds our document, if any.
pub fn find_config_document(gists: &[Gist]) -> Option<&Gist> {
    gists.iter().find(|gist| {
        gist.description.as_deref() == Some(DOCUMENT_DESCRIPTION)
            && gist.files.contains_key(DOCUMENT_FILENAME)
    })
}

/// Thin client for the GitHub user and gist endpoints.
pub struct GistClient {
    client: Client,
    api_base: String,
}

impl GistClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("OrbitReader/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/vnd.github+json")
    }

    async fn check(response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Status { status, body })
    }

    /// Validate a token; returns the account login.
    pub async fn authenticate(&self, token: &str) -> Result<String, SyncError> {
        let response = self.request(Method::GET, "/user", token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::InvalidToken(status));
        }
        let identity: Identity = response.json().await?;
        Ok(identity.login)
    }

    pub async fn list(&self, token: &str) -> Result<Vec<Gist>, SyncError> {
        let response = self.request(Method::GET, "/gists", token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn get(&self, token: &str, id: &str) -> Result<Gist, SyncError> {
        let response = self
            .request(Method::GET, &format!("/gists/{}", id), token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn create(&self, token: &str, content: &str) -> Result<Gist, SyncError> {
        let body = json!({
            "description": DOCUMENT_DESCRIPTION,
            "public": false,
            "files": { DOCUMENT_FILENAME: { "content": content } }
        });
        let response = self
            .request(Method::POST, "/gists", token)
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn update(&self, token: &str, id: &str, content: &str) -> Result<(), SyncError> {
        let body = json!({
            "files": { DOCUMENT_FILENAME: { "content": content } }
        });
        let response = self
            .request(Method::PATCH, &format!("/gists/{}", id), token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Content of our file in `gist`; large files come back truncated and
    /// are fetched from their raw URL.
    pub async fn document_content(
        &self,
        token: &str,
        gist: &Gist,
    ) -> Result<Option<String>, SyncError> {
        let Some(file) = gist.files.get(DOCUMENT_FILENAME) else {
            return Ok(None);
        };
        match (&file.content, file.truncated, &file.raw_url) {
            (_, true, Some(raw_url)) => {
                let response = self
                    .client
                    .get(raw_url)
                    .header("Authorization", format!("token {}", token))
                    .send()
                    .await?;
                Ok(Some(Self::check(response).await?.text().await?))
            }
            (content, _, _) => Ok(content.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Pending,
    Connected,
    Error,
}

/// What the status line of the front end shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotConfigured,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Pushed,
    Pulled,
    /// The remote document holds no config file; nothing was merged.
    NothingToPull,
    Connected {
        login: String,
        document_id: String,
        created: bool,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl SyncOutcome {
    fn skipped(reason: SkipReason) -> Self {
        SyncOutcome::Skipped { reason }
    }
}

pub struct SyncCoordinator {
    gist: GistClient,
    db: Arc<Database>,
    credential: RwLock<SyncCredential>,
    syncing: RwLock<bool>,
    status: RwLock<SyncStatus>,
}

impl SyncCoordinator {
    pub async fn new(gist: GistClient, db: Arc<Database>) -> Self {
        let credential = db.load_credential().await;
        let status = if credential.is_configured() {
            SyncStatus {
                state: SyncState::Connected,
                message: "Connected".to_string(),
            }
        } else {
            SyncStatus {
                state: SyncState::Idle,
                message: "Disconnected".to_string(),
            }
        };

        Self {
            gist,
            db,
            credential: RwLock::new(credential),
            syncing: RwLock::new(false),
            status: RwLock::new(status),
        }
    }

    pub async fn credential(&self) -> SyncCredential {
        self.credential.read().await.clone()
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    pub async fn is_syncing(&self) -> bool {
        *self.syncing.read().await
    }

    async fn set_status(&self, state: SyncState, message: impl Into<String>) {
        let message = message.into();
        info!(?state, "{}", message);
        *self.status.write().await = SyncStatus { state, message };
    }

    /// Claim the in-flight flag. Returns false if another operation holds it.
    async fn begin(&self) -> bool {
        let mut syncing = self.syncing.write().await;
        if *syncing {
            return false;
        }
        *syncing = true;
        true
    }

    async fn finish(&self) {
        let mut syncing = self.syncing.write().await;
        *syncing = false;
    }

    async fn configured(&self) -> Option<(String, String)> {
        let credential = self.credential.read().await;
        match (&credential.token, &credential.document_id) {
            (Some(token), Some(id)) => Some((token.clone(), id.clone())),
            _ => None,
        }
    }

    /// Record a successful sync. Returns false if the credential was
    /// cleared while the sync ran.
    async fn mark_synced(&self) -> Result<bool, SyncError> {
        // held across the store write so a concurrent disconnect cannot be undone
        let mut credential = self.credential.write().await;
        if credential.token.is_none() {
            return Ok(false);
        }
        credential.last_synced_at = Some(Utc::now());
        self.db.save_credential(&credential).await?;
        Ok(true)
    }

    /// Overwrite the remote document with the local state.
    pub async fn push(&self, state: &RwLock<ReaderState>) -> Result<SyncOutcome, SyncError> {
        let Some((token, id)) = self.configured().await else {
            return Ok(SyncOutcome::skipped(SkipReason::NotConfigured));
        };
        if !self.begin().await {
            info!("Sync already in progress, skipping push");
            return Ok(SyncOutcome::skipped(SkipReason::InFlight));
        }

        self.set_status(SyncState::Pending, "Syncing to cloud...").await;
        let result = self.do_push(&token, &id, state).await;
        self.finish().await;

        self.report(result, "Synced to cloud").await
    }

    /// Merge the remote document into the local state.
    pub async fn pull(&self, state: &RwLock<ReaderState>) -> Result<SyncOutcome, SyncError> {
        let Some((token, id)) = self.configured().await else {
            return Ok(SyncOutcome::skipped(SkipReason::NotConfigured));
        };
        if !self.begin().await {
            info!("Sync already in progress, skipping pull");
            return Ok(SyncOutcome::skipped(SkipReason::InFlight));
        }

        let result = self.do_pull(&token, &id, state).await;
        self.finish().await;

        if let Ok(SyncOutcome::NothingToPull) = result {
            return result;
        }
        self.report(result, "Synced from cloud").await
    }

    async fn report(
        &self,
        result: Result<SyncOutcome, SyncError>,
        success: &str,
    ) -> Result<SyncOutcome, SyncError> {
        match result {
            Ok(outcome) => {
                match self.mark_synced().await {
                    Ok(true) => self.set_status(SyncState::Connected, success).await,
                    Ok(false) => info!("sync finished after disconnect, not recorded"),
                    Err(e) => {
                        warn!(error = %e, "failed to record sync time");
                        self.set_status(SyncState::Connected, success).await;
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "sync failed");
                self.set_status(SyncState::Error, format!("Sync error: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn do_push(
        &self,
        token: &str,
        id: &str,
        state: &RwLock<ReaderState>,
    ) -> Result<SyncOutcome, SyncError> {
        let document = state.read().await.export(Utc::now());
        let content = serde_json::to_string_pretty(&document)?;
        self.gist.update(token, id, &content).await?;
        Ok(SyncOutcome::Pushed)
    }

    async fn do_pull(
        &self,
        token: &str,
        id: &str,
        state: &RwLock<ReaderState>,
    ) -> Result<SyncOutcome, SyncError> {
        let gist = self.gist.get(token, id).await?;
        let Some(content) = self.gist.document_content(token, &gist).await? else {
            warn!(document = %id, "remote document has no config file");
            return Ok(SyncOutcome::NothingToPull);
        };
        // parse before touching local state so a bad document changes nothing
        let remote: SyncDocument = serde_json::from_str(&content)?;
        state.write().await.merge_remote(remote);
        Ok(SyncOutcome::Pulled)
    }

    /// Validate `token`, then adopt the existing remote document or create
    /// one from the local state. On failure the credential stays unset.
    pub async fn connect(
        &self,
        token: &str,
        state: &RwLock<ReaderState>,
    ) -> Result<SyncOutcome, SyncError> {
        if !self.begin().await {
            info!("Sync already in progress, skipping connect");
            return Ok(SyncOutcome::skipped(SkipReason::InFlight));
        }

        self.set_status(SyncState::Pending, "Connecting to GitHub...")
            .await;
        let discovered = self.discover(token, state).await;

        let result = match discovered {
            Ok((login, document_id, created)) => {
                let pulled = if created {
                    Ok(SyncOutcome::Pushed)
                } else {
                    self.do_pull(token, &document_id, state).await
                };
                let outcome = pulled.map(|_| SyncOutcome::Connected {
                    login,
                    document_id,
                    created,
                });
                self.finish().await;
                return self.report(outcome, "Cloud config synced").await;
            }
            Err(e) => e,
        };
        self.finish().await;

        error!(error = %result, "sync connect failed");
        {
            let mut credential = self.credential.write().await;
            *credential = SyncCredential::default();
            if let Err(e) = self.db.save_credential(&credential).await {
                warn!(error = %e, "failed to clear stored credential");
            }
        }
        self.set_status(SyncState::Error, format!("Connection failed: {}", result))
            .await;
        Err(result)
    }

    /// Authenticate and find or create the remote document; stores the
    /// credential once a document id is known.
    async fn discover(
        &self,
        token: &str,
        state: &RwLock<ReaderState>,
    ) -> Result<(String, String, bool), SyncError> {
        let login = self.gist.authenticate(token).await?;
        self.set_status(
            SyncState::Connected,
            format!("Logged in as {}. Finding config...", login),
        )
        .await;

        let gists = self.gist.list(token).await?;
        let (document_id, created) = match find_config_document(&gists) {
            Some(gist) => {
                info!(document = %gist.id, "found existing config document");
                (gist.id.clone(), false)
            }
            None => {
                self.set_status(SyncState::Pending, "Creating new config gist...")
                    .await;
                let document = state.read().await.export(Utc::now());
                let content = serde_json::to_string_pretty(&document)?;
                let gist = self.gist.create(token, &content).await?;
                (gist.id, true)
            }
        };

        {
            let mut credential = self.credential.write().await;
            credential.token = Some(token.to_string());
            credential.document_id = Some(document_id.clone());
            self.db.save_credential(&credential).await?;
        }

        Ok((login, document_id, created))
    }

    /// Forget the token and remote document.
    pub async fn disconnect(&self) -> Result<(), SyncError> {
        {
            let mut credential = self.credential.write().await;
            *credential = SyncCredential::default();
            self.db.save_credential(&credential).await?;
        }
        self.set_status(SyncState::Idle, "Disconnected").await;
        Ok(())
    }
}
