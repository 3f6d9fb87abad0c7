use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

/// Id of the virtual folder that aggregates every feed.
pub const ALL_FOLDERS: &str = "all";

/// A single feed subscription.
///
/// Older stores and remote documents may hold a bare URL string instead of
/// an object; both shapes deserialize into this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FeedRepr")]
pub struct Feed {
    pub url: String,
    #[serde(rename = "name")]
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedRepr {
    Url(String),
    Entry {
        url: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl From<FeedRepr> for Feed {
    fn from(repr: FeedRepr) -> Self {
        match repr {
            FeedRepr::Url(url) => Feed::new(url, None),
            FeedRepr::Entry { url, name } => Feed::new(url, name),
        }
    }
}

impl Feed {
    pub fn new(url: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            url: url.into(),
            display_name: display_name.filter(|name| !name.trim().is_empty()),
        }
    }

    /// Display name, or the host part of the URL when none was given.
    pub fn label(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        let without_scheme = self
            .url
            .strip_prefix("https://")
            .or_else(|| self.url.strip_prefix("http://"))
            .unwrap_or(&self.url);
        without_scheme
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub feeds: Vec<Feed>,
}

impl Folder {
    pub fn contains_feed(&self, url: &str) -> bool {
        self.feeds.iter().any(|feed| feed.url == url)
    }
}

/// Derive a folder id from its name: lowercase, whitespace runs become `-`,
/// accents are dropped.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let dashed = lowered.split_whitespace().collect::<Vec<_>>().join("-");
    dashed
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .collect()
}

/// One entry of a resolved feed, normalized to a common shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub guid: Option<String>,
    pub link: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
    pub thumbnail_url: Option<String>,
    pub content_html: String,
}

impl Article {
    /// Key used for read tracking: the guid when present, else the link.
    pub fn identity(&self) -> &str {
        match self.guid.as_deref() {
            Some(guid) if !guid.is_empty() => guid,
            _ => &self.link,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub accent_color: String,
    pub reader_width: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub font_size: u16,
    pub link_color: String,
    pub show_thumbnails: bool,
    pub show_images: bool,
    pub show_videos: bool,
    pub bg_color: String,
    /// Keys this version does not know about, kept so they survive a sync.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accent_color: "#00f2ff".to_string(),
            reader_width: "800px".to_string(),
            font_size: 18,
            link_color: "#00f2ff".to_string(),
            show_thumbnails: true,
            show_images: true,
            show_videos: true,
            bg_color: "#050505".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Shallow merge: every key of `patch` overwrites, keys absent from
    /// `patch` keep their current value.
    pub fn merged_with(&self, patch: &Map<String, Value>) -> Result<Settings, serde_json::Error> {
        let mut base = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            base.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(base))
    }

    /// Like [`Settings::merged_with`], but key by key: a value that does not
    /// fit its field is skipped and the remaining keys still apply.
    pub fn merged_per_key(&self, patch: &Map<String, Value>) -> Settings {
        let mut merged = self.clone();
        for (key, value) in patch {
            let mut single = Map::new();
            single.insert(key.clone(), value.clone());
            match merged.merged_with(&single) {
                Ok(settings) => merged = settings,
                Err(e) => warn!(key = %key, error = %e, "ignoring invalid setting"),
            }
        }
        merged
    }
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u16),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCredential {
    pub token: Option<String>,
    pub document_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncCredential {
    pub fn is_configured(&self) -> bool {
        self.token.is_some() && self.document_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod slugify_tests {
        use super::*;

        #[test]
        fn test_lowercases_and_dashes_whitespace() {
            assert_eq!(slugify("Tech  News Daily"), "tech-news-daily");
        }

        #[test]
        fn test_strips_accents() {
            assert_eq!(slugify("Cinéma Français"), "cinema-francais");
        }

        #[test]
        fn test_trims_surrounding_whitespace() {
            assert_eq!(slugify("  Blogs \t"), "blogs");
        }
    }

    mod feed_tests {
        use super::*;

        #[test]
        fn test_bare_string_normalizes_to_record() {
            let feed: Feed = serde_json::from_value(json!("https://example.com/rss")).unwrap();
            assert_eq!(feed, Feed::new("https://example.com/rss", None));
        }

        #[test]
        fn test_object_form_keeps_name() {
            let feed: Feed =
                serde_json::from_value(json!({"url": "https://example.com/rss", "name": "Ex"}))
                    .unwrap();
            assert_eq!(feed.display_name.as_deref(), Some("Ex"));
        }

        #[test]
        fn test_blank_name_becomes_none() {
            let feed: Feed =
                serde_json::from_value(json!({"url": "https://example.com/rss", "name": " "}))
                    .unwrap();
            assert!(feed.display_name.is_none());
        }

        #[test]
        fn test_serializes_with_name_key() {
            let value = serde_json::to_value(Feed::new("https://a.com", Some("A".into()))).unwrap();
            assert_eq!(value, json!({"url": "https://a.com", "name": "A"}));
        }

        #[test]
        fn test_mixed_folder_feeds() {
            let folder: Folder = serde_json::from_value(json!({
                "id": "cinema",
                "name": "Cinéma",
                "feeds": ["https://a.com/feed", {"url": "https://b.com/feed", "name": null}]
            }))
            .unwrap();
            assert_eq!(folder.feeds.len(), 2);
            assert!(folder.contains_feed("https://a.com/feed"));
            assert!(folder.contains_feed("https://b.com/feed"));
        }

        #[test]
        fn test_label_falls_back_to_host() {
            let feed = Feed::new("https://www.cineserie.com/feed/", None);
            assert_eq!(feed.label(), "www.cineserie.com");
        }

        #[test]
        fn test_label_prefers_display_name() {
            let feed = Feed::new("https://www.cineserie.com/feed/", Some("Cineserie".into()));
            assert_eq!(feed.label(), "Cineserie");
        }
    }

    mod article_tests {
        use super::*;

        fn article(guid: Option<&str>, link: &str) -> Article {
            Article {
                guid: guid.map(str::to_string),
                link: link.to_string(),
                title: "T".to_string(),
                published_at: Utc::now(),
                source_name: "S".to_string(),
                thumbnail_url: None,
                content_html: String::new(),
            }
        }

        #[test]
        fn test_identity_prefers_guid() {
            assert_eq!(article(Some("g-1"), "https://a.com/1").identity(), "g-1");
        }

        #[test]
        fn test_identity_falls_back_to_link() {
            assert_eq!(article(None, "https://a.com/1").identity(), "https://a.com/1");
            assert_eq!(article(Some(""), "https://a.com/1").identity(), "https://a.com/1");
        }
    }

    mod settings_tests {
        use super::*;

        #[test]
        fn test_font_size_accepts_numeric_string() {
            let settings: Settings = serde_json::from_value(json!({"fontSize": "21"})).unwrap();
            assert_eq!(settings.font_size, 21);
            assert!(settings.show_images);
        }

        #[test]
        fn test_merge_overwrites_present_keys_only() {
            let local = Settings {
                accent_color: "#ff0000".to_string(),
                ..Settings::default()
            };
            let patch = json!({"showImages": false, "fontSize": 14});
            let merged = local.merged_with(patch.as_object().unwrap()).unwrap();

            assert!(!merged.show_images);
            assert_eq!(merged.font_size, 14);
            assert_eq!(merged.accent_color, "#ff0000");
        }

        #[test]
        fn test_merge_rejects_wrong_type() {
            let patch = json!({"showVideos": "sometimes"});
            assert!(Settings::default().merged_with(patch.as_object().unwrap()).is_err());
        }

        #[test]
        fn test_merge_per_key_skips_only_invalid_keys() {
            let patch = json!({"accentColor": "#ff0000", "fontSize": "", "showVideos": false});
            let merged = Settings::default().merged_per_key(patch.as_object().unwrap());

            assert_eq!(merged.accent_color, "#ff0000");
            assert_eq!(merged.font_size, 18);
            assert!(!merged.show_videos);
        }

        #[test]
        fn test_unknown_keys_survive_round_trip() {
            let settings: Settings =
                serde_json::from_value(json!({"compactMode": true, "linkColor": "#123456"}))
                    .unwrap();
            assert_eq!(settings.extra.get("compactMode"), Some(&json!(true)));

            let value = serde_json::to_value(&settings).unwrap();
            assert_eq!(value["compactMode"], json!(true));
            assert_eq!(value["linkColor"], json!("#123456"));
        }
    }
}
