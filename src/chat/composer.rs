use std::path::Path;

use crate::network::BlobPayload;

pub const AUDIO_FILE_NAME: &str = "audio.webm";
pub const AUDIO_MIME_TYPE: &str = "audio/webm";

/// An image picked for the next message, with a local reference for previewing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub payload: BlobPayload,
    pub preview: String,
}

impl ImageAttachment {
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let content_type = guess_image_type(&file_name);

        Ok(Self {
            payload: BlobPayload::new(file_name, content_type, bytes),
            preview: path.display().to_string(),
        })
    }
}

fn guess_image_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// A finished microphone capture.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub payload: BlobPayload,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            payload: BlobPayload::new(AUDIO_FILE_NAME, AUDIO_MIME_TYPE, bytes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// The message being written: text, an optional image and optional recorded audio.
#[derive(Debug, Clone, Default)]
pub struct DraftComposer {
    text: String,
    image: Option<ImageAttachment>,
    audio: Option<AudioClip>,
}

impl DraftComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn push_emoji(&mut self, emoji: &str) {
        self.text.push_str(emoji);
    }

    pub fn image(&self) -> Option<&ImageAttachment> {
        self.image.as_ref()
    }

    pub fn attach_image(&mut self, image: ImageAttachment) {
        self.image = Some(image);
    }

    pub fn detach_image(&mut self) -> Option<ImageAttachment> {
        self.image.take()
    }

    pub fn audio(&self) -> Option<&AudioClip> {
        self.audio.as_ref()
    }

    pub fn attach_audio(&mut self, clip: AudioClip) {
        self.audio = Some(clip);
    }

    pub fn clear_audio(&mut self) {
        self.audio = None;
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn is_sendable(&self) -> bool {
        self.has_text() || self.image.is_some() || self.audio.is_some()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.image = None;
        self.audio = None;
    }
}
