//! The owned application state and the closed set of mutations applied to it.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::FeedCache;
use crate::error::MutationError;
use crate::models::{slugify, Feed, Folder, Settings, ALL_FOLDERS};

/// Which folder the article view shows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FolderSelection {
    #[default]
    All,
    Folder(String),
}

impl From<String> for FolderSelection {
    fn from(key: String) -> Self {
        if key == ALL_FOLDERS || key.is_empty() {
            FolderSelection::All
        } else {
            FolderSelection::Folder(key)
        }
    }
}

impl From<FolderSelection> for String {
    fn from(selection: FolderSelection) -> Self {
        match selection {
            FolderSelection::All => ALL_FOLDERS.to_string(),
            FolderSelection::Folder(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct View {
    pub folder: FolderSelection,
    /// A single feed URL narrowing the view, if any.
    pub source: Option<String>,
}

/// Whether a mutation's effect must reach the remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    SyncWorthy,
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateFolder {
        name: String,
    },
    RenameFolder {
        id: String,
        name: String,
    },
    DeleteFolder {
        id: String,
    },
    AddFeed {
        folder_id: String,
        url: String,
        display_name: Option<String>,
    },
    RenameFeed {
        folder_id: String,
        url: String,
        display_name: Option<String>,
    },
    RemoveFeed {
        folder_id: String,
        url: String,
    },
    UpdateSettings(Map<String, Value>),
    MarkRead(Vec<String>),
    SelectFolder(FolderSelection),
    SelectSource(Option<String>),
    /// Folder and source together; a missing folder keeps the current one.
    /// Nothing changes unless both are valid.
    SelectView {
        folder: Option<FolderSelection>,
        source: Option<String>,
    },
    SetHideRead(bool),
}

impl Mutation {
    /// Everything that ends up in the synced document is sync-worthy; view
    /// selection and the hide-read toggle stay on this device.
    pub fn sync_policy(&self) -> SyncPolicy {
        match self {
            Mutation::CreateFolder { .. }
            | Mutation::RenameFolder { .. }
            | Mutation::DeleteFolder { .. }
            | Mutation::AddFeed { .. }
            | Mutation::RenameFeed { .. }
            | Mutation::RemoveFeed { .. }
            | Mutation::UpdateSettings(_)
            | Mutation::MarkRead(_) => SyncPolicy::SyncWorthy,
            Mutation::SelectFolder(_)
            | Mutation::SelectSource(_)
            | Mutation::SelectView { .. }
            | Mutation::SetHideRead(_) => SyncPolicy::LocalOnly,
        }
    }
}

/// The payload stored in the remote document.
///
/// Every field is optional on the way in so that partial documents written
/// by other clients still merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<Folder>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_articles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReaderState {
    pub folders: Vec<Folder>,
    pub view: View,
    pub read_articles: BTreeSet<String>,
    pub hide_read: bool,
    pub settings: Settings,
    pub feed_cache: FeedCache,
}

impl ReaderState {
    pub fn folder(&self, id: &str) -> Option<&Folder> {
        self.folders.iter().find(|folder| folder.id == id)
    }

    fn folder_mut(&mut self, id: &str) -> Result<&mut Folder, MutationError> {
        self.folders
            .iter_mut()
            .find(|folder| folder.id == id)
            .ok_or_else(|| MutationError::UnknownFolder(id.to_string()))
    }

    fn has_feed(&self, url: &str) -> bool {
        self.folders.iter().any(|folder| folder.contains_feed(url))
    }

    pub fn is_read(&self, identity: &str) -> bool {
        self.read_articles.contains(identity)
    }

    /// Feed URLs the current view covers, in folder order.
    pub fn view_feed_urls(&self) -> Vec<String> {
        if let Some(source) = &self.view.source {
            return vec![source.clone()];
        }
        match &self.view.folder {
            FolderSelection::All => self
                .folders
                .iter()
                .flat_map(|folder| folder.feeds.iter().map(|feed| feed.url.clone()))
                .collect(),
            FolderSelection::Folder(id) => self
                .folder(id)
                .map(|folder| folder.feeds.iter().map(|feed| feed.url.clone()).collect())
                .unwrap_or_default(),
        }
    }

    /// Apply one mutation. Returns whether anything changed.
    pub fn apply(&mut self, mutation: Mutation) -> Result<bool, MutationError> {
        match mutation {
            Mutation::CreateFolder { name } => {
                let name = name.trim();
                let id = slugify(name);
                if id.is_empty() {
                    return Err(MutationError::EmptyName);
                }
                if id == ALL_FOLDERS {
                    return Err(MutationError::ReservedFolder(id));
                }
                if self.folder(&id).is_some() {
                    return Err(MutationError::DuplicateFolder(id));
                }
                self.folders.push(Folder {
                    id,
                    name: name.to_string(),
                    feeds: Vec::new(),
                });
                Ok(true)
            }
            Mutation::RenameFolder { id, name } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(MutationError::EmptyName);
                }
                let folder = self.folder_mut(&id)?;
                if folder.name == name {
                    return Ok(false);
                }
                folder.name = name.to_string();
                Ok(true)
            }
            Mutation::DeleteFolder { id } => {
                let before = self.folders.len();
                self.folders.retain(|folder| folder.id != id);
                if self.folders.len() == before {
                    return Err(MutationError::UnknownFolder(id));
                }
                self.repair_view();
                Ok(true)
            }
            Mutation::AddFeed {
                folder_id,
                url,
                display_name,
            } => {
                let url = url.trim();
                if url.is_empty() {
                    return Err(MutationError::EmptyUrl);
                }
                let folder = self.folder_mut(&folder_id)?;
                if folder.contains_feed(url) {
                    return Ok(false);
                }
                folder.feeds.push(Feed::new(url, display_name));
                Ok(true)
            }
            Mutation::RenameFeed {
                folder_id,
                url,
                display_name,
            } => {
                let folder = self.folder_mut(&folder_id)?;
                let feed = folder
                    .feeds
                    .iter_mut()
                    .find(|feed| feed.url == url)
                    .ok_or_else(|| MutationError::UnknownFeed(url.clone()))?;
                let renamed = Feed::new(url.clone(), display_name);
                if *feed == renamed {
                    return Ok(false);
                }
                *feed = renamed;
                Ok(true)
            }
            Mutation::RemoveFeed { folder_id, url } => {
                let folder = self.folder_mut(&folder_id)?;
                let before = folder.feeds.len();
                folder.feeds.retain(|feed| feed.url != url);
                if folder.feeds.len() == before {
                    return Err(MutationError::UnknownFeed(url));
                }
                if self.view.source.as_deref() == Some(url.as_str()) {
                    self.view.source = None;
                }
                Ok(true)
            }
            Mutation::UpdateSettings(patch) => {
                let updated = self
                    .settings
                    .merged_with(&patch)
                    .map_err(|e| MutationError::InvalidSetting(e.to_string()))?;
                if updated == self.settings {
                    return Ok(false);
                }
                self.settings = updated;
                Ok(true)
            }
            Mutation::MarkRead(ids) => {
                let mut changed = false;
                for id in ids {
                    changed |= self.read_articles.insert(id);
                }
                Ok(changed)
            }
            Mutation::SelectFolder(selection) => self.select_view(View {
                folder: selection,
                source: None,
            }),
            Mutation::SelectSource(source) => {
                let folder = self.view.folder.clone();
                self.select_view(View { folder, source })
            }
            Mutation::SelectView { folder, source } => {
                let folder = folder.unwrap_or_else(|| self.view.folder.clone());
                self.select_view(View { folder, source })
            }
            Mutation::SetHideRead(hide) => {
                let changed = self.hide_read != hide;
                self.hide_read = hide;
                Ok(changed)
            }
        }
    }

    fn select_view(&mut self, view: View) -> Result<bool, MutationError> {
        if let FolderSelection::Folder(id) = &view.folder {
            if self.folder(id).is_none() {
                return Err(MutationError::UnknownFolder(id.clone()));
            }
        }
        if let Some(url) = &view.source {
            if !self.has_feed(url) {
                return Err(MutationError::UnknownFeed(url.clone()));
            }
        }
        if self.view == view {
            return Ok(false);
        }
        self.view = view;
        Ok(true)
    }

    /// Reset view parts that point at folders or feeds that no longer exist.
    fn repair_view(&mut self) {
        if let FolderSelection::Folder(id) = &self.view.folder {
            if self.folder(id).is_none() {
                self.view = View::default();
            }
        }
        if let Some(source) = &self.view.source {
            if !self.has_feed(source) {
                self.view.source = None;
            }
        }
    }

    /// Snapshot of the synced subset of the state.
    pub fn export(&self, now: DateTime<Utc>) -> SyncDocument {
        let settings = match serde_json::to_value(&self.settings) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        };
        SyncDocument {
            folders: Some(self.folders.clone()),
            settings,
            read_articles: Some(self.read_articles.iter().cloned().collect()),
            last_updated: Some(now.timestamp_millis()),
        }
    }

    /// Merge a remote document: folders are replaced, settings shallow-merged,
    /// read articles unioned.
    pub fn merge_remote(&mut self, remote: SyncDocument) {
        if let Some(folders) = remote.folders {
            self.folders = normalize_folders(folders);
        }
        if let Some(patch) = remote.settings {
            self.settings = self.settings.merged_per_key(&patch);
        }
        if let Some(read) = remote.read_articles {
            self.read_articles.extend(read);
        }
        self.repair_view();
    }
}

/// Enforce folder invariants on data coming from outside: the first folder
/// wins for a duplicated id, the first feed wins for a duplicated URL.
pub fn normalize_folders(folders: Vec<Folder>) -> Vec<Folder> {
    let mut seen_ids = HashSet::new();
    folders
        .into_iter()
        .filter(|folder| seen_ids.insert(folder.id.clone()))
        .map(|mut folder| {
            let mut seen_urls = HashSet::new();
            folder.feeds.retain(|feed| seen_urls.insert(feed.url.clone()));
            folder
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with_folder() -> ReaderState {
        let mut state = ReaderState::default();
        state
            .apply(Mutation::CreateFolder {
                name: "Tech News".to_string(),
            })
            .unwrap();
        state
            .apply(Mutation::AddFeed {
                folder_id: "tech-news".to_string(),
                url: "https://a.com/rss".to_string(),
                display_name: None,
            })
            .unwrap();
        state
    }

    mod folder_tests {
        use super::*;

        #[test]
        fn test_create_folder_derives_id() {
            let state = state_with_folder();
            assert_eq!(state.folders.len(), 1);
            assert_eq!(state.folders[0].id, "tech-news");
            assert_eq!(state.folders[0].name, "Tech News");
        }

        #[test]
        fn test_create_duplicate_folder_rejected() {
            let mut state = state_with_folder();
            let result = state.apply(Mutation::CreateFolder {
                name: "tech news".to_string(),
            });
            assert_eq!(
                result,
                Err(MutationError::DuplicateFolder("tech-news".to_string()))
            );
            assert_eq!(state.folders.len(), 1);
        }

        #[test]
        fn test_create_reserved_or_empty_folder_rejected() {
            let mut state = ReaderState::default();
            assert_eq!(
                state.apply(Mutation::CreateFolder {
                    name: "All".to_string()
                }),
                Err(MutationError::ReservedFolder("all".to_string()))
            );
            assert_eq!(
                state.apply(Mutation::CreateFolder {
                    name: "   ".to_string()
                }),
                Err(MutationError::EmptyName)
            );
        }

        #[test]
        fn test_rename_keeps_id_and_feeds() {
            let mut state = state_with_folder();
            let changed = state
                .apply(Mutation::RenameFolder {
                    id: "tech-news".to_string(),
                    name: "Technology".to_string(),
                })
                .unwrap();

            assert!(changed);
            let folder = state.folder("tech-news").unwrap();
            assert_eq!(folder.name, "Technology");
            assert!(folder.contains_feed("https://a.com/rss"));
        }

        #[test]
        fn test_rename_unknown_folder() {
            let mut state = ReaderState::default();
            let result = state.apply(Mutation::RenameFolder {
                id: "missing".to_string(),
                name: "X".to_string(),
            });
            assert_eq!(result, Err(MutationError::UnknownFolder("missing".to_string())));
        }

        #[test]
        fn test_delete_active_folder_resets_view() {
            let mut state = state_with_folder();
            state
                .apply(Mutation::SelectFolder(FolderSelection::Folder(
                    "tech-news".to_string(),
                )))
                .unwrap();
            state
                .apply(Mutation::SelectSource(Some("https://a.com/rss".to_string())))
                .unwrap();

            state
                .apply(Mutation::DeleteFolder {
                    id: "tech-news".to_string(),
                })
                .unwrap();

            assert!(state.folders.is_empty());
            assert_eq!(state.view, View::default());
        }
    }

    mod feed_tests {
        use super::*;

        #[test]
        fn test_duplicate_feed_is_silently_ignored() {
            let mut state = state_with_folder();
            let changed = state
                .apply(Mutation::AddFeed {
                    folder_id: "tech-news".to_string(),
                    url: "https://a.com/rss".to_string(),
                    display_name: Some("A again".to_string()),
                })
                .unwrap();

            assert!(!changed);
            assert_eq!(state.folder("tech-news").unwrap().feeds.len(), 1);
        }

        #[test]
        fn test_same_feed_allowed_in_other_folder() {
            let mut state = state_with_folder();
            state
                .apply(Mutation::CreateFolder {
                    name: "Other".to_string(),
                })
                .unwrap();
            let changed = state
                .apply(Mutation::AddFeed {
                    folder_id: "other".to_string(),
                    url: "https://a.com/rss".to_string(),
                    display_name: None,
                })
                .unwrap();
            assert!(changed);
        }

        #[test]
        fn test_add_feed_to_unknown_folder() {
            let mut state = ReaderState::default();
            let result = state.apply(Mutation::AddFeed {
                folder_id: "nope".to_string(),
                url: "https://a.com/rss".to_string(),
                display_name: None,
            });
            assert_eq!(result, Err(MutationError::UnknownFolder("nope".to_string())));
        }

        #[test]
        fn test_rename_feed() {
            let mut state = state_with_folder();
            state
                .apply(Mutation::RenameFeed {
                    folder_id: "tech-news".to_string(),
                    url: "https://a.com/rss".to_string(),
                    display_name: Some("Site A".to_string()),
                })
                .unwrap();
            let feed = &state.folder("tech-news").unwrap().feeds[0];
            assert_eq!(feed.label(), "Site A");
        }

        #[test]
        fn test_remove_active_source_clears_it() {
            let mut state = state_with_folder();
            state
                .apply(Mutation::SelectSource(Some("https://a.com/rss".to_string())))
                .unwrap();
            state
                .apply(Mutation::RemoveFeed {
                    folder_id: "tech-news".to_string(),
                    url: "https://a.com/rss".to_string(),
                })
                .unwrap();

            assert!(state.view.source.is_none());
            assert!(state.folder("tech-news").unwrap().feeds.is_empty());
        }

        #[test]
        fn test_select_unknown_source_rejected() {
            let mut state = state_with_folder();
            let result = state.apply(Mutation::SelectSource(Some("https://z.com".to_string())));
            assert_eq!(result, Err(MutationError::UnknownFeed("https://z.com".to_string())));
        }
    }

    mod view_tests {
        use super::*;

        fn two_folders() -> ReaderState {
            let mut state = state_with_folder();
            state
                .apply(Mutation::CreateFolder {
                    name: "Blogs".to_string(),
                })
                .unwrap();
            for url in ["https://b.com/rss", "https://a.com/rss"] {
                state
                    .apply(Mutation::AddFeed {
                        folder_id: "blogs".to_string(),
                        url: url.to_string(),
                        display_name: None,
                    })
                    .unwrap();
            }
            state
        }

        #[test]
        fn test_all_view_covers_every_folder() {
            let state = two_folders();
            assert_eq!(
                state.view_feed_urls(),
                vec!["https://a.com/rss", "https://b.com/rss", "https://a.com/rss"]
            );
        }

        #[test]
        fn test_folder_view() {
            let mut state = two_folders();
            state
                .apply(Mutation::SelectFolder(FolderSelection::Folder("blogs".to_string())))
                .unwrap();
            assert_eq!(
                state.view_feed_urls(),
                vec!["https://b.com/rss", "https://a.com/rss"]
            );
        }

        #[test]
        fn test_source_view_overrides_folder() {
            let mut state = two_folders();
            state
                .apply(Mutation::SelectSource(Some("https://b.com/rss".to_string())))
                .unwrap();
            assert_eq!(state.view_feed_urls(), vec!["https://b.com/rss"]);
        }

        #[test]
        fn test_selecting_folder_clears_source() {
            let mut state = two_folders();
            state
                .apply(Mutation::SelectSource(Some("https://b.com/rss".to_string())))
                .unwrap();
            state
                .apply(Mutation::SelectFolder(FolderSelection::All))
                .unwrap();
            assert!(state.view.source.is_none());
        }

        #[test]
        fn test_select_view_sets_folder_and_source() {
            let mut state = two_folders();
            let changed = state
                .apply(Mutation::SelectView {
                    folder: Some(FolderSelection::Folder("blogs".to_string())),
                    source: Some("https://b.com/rss".to_string()),
                })
                .unwrap();
            assert!(changed);
            assert_eq!(state.view.folder, FolderSelection::Folder("blogs".to_string()));
            assert_eq!(state.view_feed_urls(), vec!["https://b.com/rss"]);
        }

        #[test]
        fn test_select_view_with_unknown_source_changes_nothing() {
            let mut state = two_folders();
            let result = state.apply(Mutation::SelectView {
                folder: Some(FolderSelection::Folder("blogs".to_string())),
                source: Some("https://z.com".to_string()),
            });
            assert!(matches!(result, Err(MutationError::UnknownFeed(_))));
            assert_eq!(state.view, View::default());
        }

        #[test]
        fn test_select_view_without_folder_keeps_current() {
            let mut state = two_folders();
            state
                .apply(Mutation::SelectFolder(FolderSelection::Folder("blogs".to_string())))
                .unwrap();
            state
                .apply(Mutation::SelectView {
                    folder: None,
                    source: Some("https://a.com/rss".to_string()),
                })
                .unwrap();
            assert_eq!(state.view.folder, FolderSelection::Folder("blogs".to_string()));
            assert_eq!(state.view.source.as_deref(), Some("https://a.com/rss"));
        }

        #[test]
        fn test_folder_selection_serializes_as_key() {
            assert_eq!(serde_json::to_value(FolderSelection::All).unwrap(), json!("all"));
            let parsed: FolderSelection = serde_json::from_value(json!("blogs")).unwrap();
            assert_eq!(parsed, FolderSelection::Folder("blogs".to_string()));
        }
    }

    mod sync_policy_tests {
        use super::*;

        #[test]
        fn test_library_mutations_are_sync_worthy() {
            let worthy = [
                Mutation::CreateFolder { name: "x".into() },
                Mutation::DeleteFolder { id: "x".into() },
                Mutation::MarkRead(vec!["a".into()]),
                Mutation::UpdateSettings(Map::new()),
            ];
            for mutation in worthy {
                assert_eq!(mutation.sync_policy(), SyncPolicy::SyncWorthy);
            }
        }

        #[test]
        fn test_view_mutations_are_local() {
            let local = [
                Mutation::SelectFolder(FolderSelection::All),
                Mutation::SelectSource(None),
                Mutation::SelectView {
                    folder: None,
                    source: None,
                },
                Mutation::SetHideRead(true),
            ];
            for mutation in local {
                assert_eq!(mutation.sync_policy(), SyncPolicy::LocalOnly);
            }
        }
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn test_read_set_only_grows() {
            let mut state = state_with_folder();
            state
                .apply(Mutation::MarkRead(vec!["x".to_string()]))
                .unwrap();

            state.merge_remote(SyncDocument {
                read_articles: Some(vec!["y".to_string()]),
                ..SyncDocument::default()
            });

            assert!(state.is_read("x"));
            assert!(state.is_read("y"));
        }

        #[test]
        fn test_folders_replaced_and_settings_shallow_merged() {
            let mut state = state_with_folder();
            state.settings.accent_color = "#abcdef".to_string();

            let remote: SyncDocument = serde_json::from_value(json!({
                "folders": [{"id": "cinema", "name": "Cinéma", "feeds": ["https://c.com/feed"]}],
                "settings": {"fontSize": "22"},
                "lastUpdated": 1
            }))
            .unwrap();
            state.merge_remote(remote);

            assert_eq!(state.folders.len(), 1);
            assert_eq!(state.folders[0].id, "cinema");
            assert_eq!(state.settings.font_size, 22);
            assert_eq!(state.settings.accent_color, "#abcdef");
        }

        #[test]
        fn test_invalid_remote_setting_keeps_valid_siblings() {
            let mut state = ReaderState::default();
            let remote: SyncDocument = serde_json::from_value(json!({
                "settings": {"accentColor": "#ff0000", "fontSize": ""}
            }))
            .unwrap();
            state.merge_remote(remote);

            assert_eq!(state.settings.accent_color, "#ff0000");
            assert_eq!(state.settings.font_size, 18);
        }

        #[test]
        fn test_missing_fields_leave_local_untouched() {
            let mut state = state_with_folder();
            let before = state.clone();
            state.merge_remote(SyncDocument::default());
            assert_eq!(state, before);
        }

        #[test]
        fn test_vanished_active_folder_resets_view() {
            let mut state = state_with_folder();
            state
                .apply(Mutation::SelectFolder(FolderSelection::Folder(
                    "tech-news".to_string(),
                )))
                .unwrap();
            state.merge_remote(SyncDocument {
                folders: Some(Vec::new()),
                ..SyncDocument::default()
            });
            assert_eq!(state.view.folder, FolderSelection::All);
        }

        #[test]
        fn test_export_round_trips_through_merge() {
            let mut source = state_with_folder();
            source
                .apply(Mutation::MarkRead(vec!["g-1".to_string()]))
                .unwrap();
            let doc = source.export(Utc::now());

            let mut target = ReaderState::default();
            target.merge_remote(doc);

            assert_eq!(target.folders, source.folders);
            assert_eq!(target.settings, source.settings);
            assert!(target.is_read("g-1"));
        }

        #[test]
        fn test_normalize_drops_duplicates() {
            let folders = vec![
                Folder {
                    id: "a".into(),
                    name: "A".into(),
                    feeds: vec![Feed::new("https://x.com", None), Feed::new("https://x.com", None)],
                },
                Folder {
                    id: "a".into(),
                    name: "A2".into(),
                    feeds: Vec::new(),
                },
            ];
            let normalized = normalize_folders(folders);
            assert_eq!(normalized.len(), 1);
            assert_eq!(normalized[0].name, "A");
            assert_eq!(normalized[0].feeds.len(), 1);
        }
    }
}
