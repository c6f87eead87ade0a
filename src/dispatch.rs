//! Routing of an edit request to the image or video generation path.

use serde::{Deserialize, Serialize};

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "webm", "mov", "avi"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classifies a media reference by its file-extension suffix.
    ///
    /// Query strings and fragments are ignored, so signed storage URLs
    /// classify the same as their bare paths.
    pub fn from_reference(reference: &str) -> Self {
        let path = reference
            .split(['?', '#'])
            .next()
            .unwrap_or(reference);
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.contains('/'));
        match extension {
            Some(ext) if VIDEO_EXTENSIONS.iter().any(|video| ext.eq_ignore_ascii_case(video)) => {
                MediaKind::Video
            }
            _ => MediaKind::Image,
        }
    }

    pub fn default_mime_type(self) -> &'static str {
        match self {
            MediaKind::Image => "image/png",
            MediaKind::Video => "video/mp4",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Resolved routing decision for one remix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditPlan {
    pub kind: MediaKind,
    pub source_ref: String,
    pub prompt: String,
}

/// Picks the reference to edit: whatever is on screen, original or derived.
pub fn select_source<'a>(source_ref: &'a str, displayed_ref: Option<&'a str>) -> &'a str {
    match displayed_ref {
        Some(displayed) if !displayed.trim().is_empty() && displayed != source_ref => displayed,
        _ => source_ref,
    }
}

pub fn plan_edit(prompt: &str, source_ref: &str, displayed_ref: Option<&str>) -> EditPlan {
    let source = select_source(source_ref, displayed_ref);
    EditPlan {
        kind: MediaKind::from_reference(source),
        source_ref: source.to_string(),
        prompt: prompt.trim().to_string(),
    }
}
