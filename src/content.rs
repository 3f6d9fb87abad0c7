//! Media filtering applied to article bodies before they reach the reader pane.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::Settings;

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<img[^>]*>").unwrap());

static VIDEO_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<video[^>]*>.*?</video>").unwrap());

static VIDEO_IFRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<iframe[^>]*src="[^"]*?(youtube|vimeo|dailymotion)[^"]*?"[^>]*></iframe>"#)
        .unwrap()
});

/// Strip images and embedded videos according to the reader settings.
pub fn filter_media(html: &str, settings: &Settings) -> String {
    let mut content = html.to_string();
    if !settings.show_images {
        content = IMG_TAG.replace_all(&content, "").into_owned();
    }
    if !settings.show_videos {
        content = VIDEO_BLOCK.replace_all(&content, "").into_owned();
        content = VIDEO_IFRAME.replace_all(&content, "").into_owned();
    }
    content
}
