//! Outbound images: artifacts produced by the agent, plus image paths the
//! agent mentions in its reply text.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use tether_core::agent::MediaArtifact;
use tracing::{debug, warn};

use crate::telegram::TelegramClient;

const SENDABLE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

fn image_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[~/\w\-./]+\.(?:png|jpg|jpeg|gif|bmp|webp)").expect("valid regex")
    })
}

/// Pulls candidate image file paths out of reply text, in order of first
/// mention and without duplicates.
pub(crate) fn extract_image_paths(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for m in image_path_regex().find_iter(text) {
        let path = m.as_str().trim_matches('`').to_string();
        if !found.contains(&path) {
            found.push(path);
        }
    }
    found
}

fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

fn is_sendable_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            SENDABLE_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Sends one mentioned image from disk. Missing or non-image paths are
/// skipped quietly; the mention might not be a real file.
pub(crate) async fn send_image_from_path(
    client: &TelegramClient,
    chat_id: i64,
    raw_path: &str,
) -> bool {
    let path = expand_user(raw_path);
    if !path.is_file() || !is_sendable_image(&path) {
        debug!(path = %path.display(), "skipping mentioned path");
        return false;
    }

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read image");
            return false;
        }
    };
    // Extension said image; make sure the content agrees.
    if infer::get(&bytes).is_none_or(|kind| !kind.mime_type().starts_with("image/")) {
        debug!(path = %path.display(), "content is not an image");
        return false;
    }

    let basename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image")
        .to_string();
    let caption = format!("📷 {basename}");

    let _ = client.send_chat_action(chat_id, "upload_photo").await;
    match client
        .send_photo_bytes(chat_id, &basename, bytes, Some(&caption))
        .await
    {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to send image");
            false
        }
    }
}

/// Sends artifacts the agent produced directly in its response.
pub(crate) async fn send_media_artifacts(
    client: &TelegramClient,
    chat_id: i64,
    media: &[MediaArtifact],
) {
    for artifact in media {
        let result = match artifact {
            MediaArtifact::Inline { mime_type, data } => match BASE64.decode(data) {
                Ok(bytes) => {
                    let extension = mime_type.rsplit('/').next().unwrap_or("png");
                    let filename = format!("image.{extension}");
                    client
                        .send_photo_bytes(chat_id, &filename, bytes, None)
                        .await
                }
                Err(err) => {
                    warn!(%err, "invalid base64 image from agent");
                    continue;
                }
            },
            MediaArtifact::Remote { url } => client.send_photo_url(chat_id, url).await,
        };
        if let Err(err) = result {
            warn!(chat_id, %err, "failed to send media artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_absolute_and_home_paths() {
        let text = "Saved the plot to /tmp/out/plot.png and a copy at ~/Pictures/photo.jpg.";
        let paths = extract_image_paths(text);
        assert_eq!(paths, vec!["/tmp/out/plot.png", "~/Pictures/photo.jpg"]);
    }

    #[test]
    fn extracts_backticked_paths() {
        let text = "See `./shots/screen.webp` for the capture.";
        let paths = extract_image_paths(text);
        assert_eq!(paths, vec!["./shots/screen.webp"]);
    }

    #[test]
    fn deduplicates_repeated_mentions() {
        let text = "/a/b.png twice: /a/b.png";
        assert_eq!(extract_image_paths(text), vec!["/a/b.png"]);
    }

    #[test]
    fn ignores_text_without_image_paths() {
        assert!(extract_image_paths("no images here, just main.rs").is_empty());
        assert!(extract_image_paths("archive.tar.gz is not an image").is_empty());
    }

    #[test]
    fn case_insensitive_extensions() {
        let paths = extract_image_paths("result at /tmp/SHOT.PNG");
        assert_eq!(paths, vec!["/tmp/SHOT.PNG"]);
    }

    #[test]
    fn sendable_extension_allowlist() {
        assert!(is_sendable_image(Path::new("/x/y.png")));
        assert!(is_sendable_image(Path::new("/x/y.JPEG")));
        assert!(!is_sendable_image(Path::new("/x/y.svg")));
        assert!(!is_sendable_image(Path::new("/x/y.txt")));
        assert!(!is_sendable_image(Path::new("/x/y")));
    }

    #[tokio::test]
    async fn mislabeled_file_is_not_sent() {
        let client = TelegramClient::new("test-token".to_string());
        let dir = tempfile::tempdir().unwrap();

        // Image extension, non-image content; the sniff rejects it before
        // any upload is attempted.
        let fake = dir.path().join("not-really.png");
        std::fs::write(&fake, b"just some text").unwrap();
        assert!(!send_image_from_path(&client, 1, &fake.to_string_lossy()).await);

        let missing = dir.path().join("absent.png");
        assert!(!send_image_from_path(&client, 1, &missing.to_string_lossy()).await);
    }

    #[test]
    fn expand_user_touches_only_home_prefixed_paths() {
        assert_eq!(expand_user("/abs/a.png"), PathBuf::from("/abs/a.png"));
        assert_eq!(expand_user("rel/a.png"), PathBuf::from("rel/a.png"));
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(
                expand_user("~/shots/a.png"),
                PathBuf::from(home).join("shots/a.png")
            );
        }
    }
}
