//! Extraction of generated media from vendor completion payloads whose
//! shape varies between model versions.
//!
//! Known shapes are tried first, in table order. When none match, the
//! payload is walked depth-first in document order and the first long
//! string that decodes as base64 is taken as the media payload.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;

use crate::error::{RemixError, Result};
use crate::image_processing;

/// Strings at or below this length are never treated as media by the fallback search.
pub const LONG_STRING_THRESHOLD: usize = 1000;

#[derive(Clone, Copy, Debug)]
pub enum PathSegment {
    Key(&'static str),
    Index(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    InlineBase64,
    StorageUri,
}

/// A historical response layout: where the payload lives and how to read it.
#[derive(Debug)]
pub struct ResultShape {
    pub name: &'static str,
    pub path: &'static [PathSegment],
    /// Sibling key declaring the media type, next to the value at `path`.
    pub mime_key: Option<&'static str>,
    pub kind: ShapeKind,
}

use PathSegment::{Index, Key};

pub const KNOWN_SHAPES: &[ResultShape] = &[
    ResultShape {
        name: "response.candidates[0].content.parts[0].inlineData.data",
        path: &[
            Key("response"),
            Key("candidates"),
            Index(0),
            Key("content"),
            Key("parts"),
            Index(0),
            Key("inlineData"),
            Key("data"),
        ],
        mime_key: Some("mimeType"),
        kind: ShapeKind::InlineBase64,
    },
    ResultShape {
        name: "response.videos[0].bytesBase64Encoded",
        path: &[Key("response"), Key("videos"), Index(0), Key("bytesBase64Encoded")],
        mime_key: Some("mimeType"),
        kind: ShapeKind::InlineBase64,
    },
    ResultShape {
        name: "response.predictions[0].bytesBase64Encoded",
        path: &[Key("response"), Key("predictions"), Index(0), Key("bytesBase64Encoded")],
        mime_key: Some("mimeType"),
        kind: ShapeKind::InlineBase64,
    },
    ResultShape {
        name: "response.videos[0].gcsUri",
        path: &[Key("response"), Key("videos"), Index(0), Key("gcsUri")],
        mime_key: Some("mimeType"),
        kind: ShapeKind::StorageUri,
    },
    ResultShape {
        name: "response.generatedSamples[0].video.uri",
        path: &[
            Key("response"),
            Key("generatedSamples"),
            Index(0),
            Key("video"),
            Key("uri"),
        ],
        mime_key: Some("mimeType"),
        kind: ShapeKind::StorageUri,
    },
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    Inline {
        bytes: Vec<u8>,
        mime_type: String,
        matched: &'static str,
    },
    StorageRef {
        uri: String,
        mime_type: Option<String>,
    },
}

pub fn resolve(payload: &Value, default_mime: &str) -> Result<Resolved> {
    resolve_with(KNOWN_SHAPES, payload, default_mime)
}

pub fn resolve_with(shapes: &[ResultShape], payload: &Value, default_mime: &str) -> Result<Resolved> {
    for shape in shapes {
        let Some((value, parent)) = lookup(payload, shape.path) else {
            continue;
        };
        let Some(text) = value.as_str().filter(|text| !text.trim().is_empty()) else {
            continue;
        };
        let declared_mime = shape
            .mime_key
            .and_then(|key| parent.and_then(|parent| parent.get(key)))
            .and_then(Value::as_str)
            .map(str::to_string);

        match shape.kind {
            ShapeKind::InlineBase64 => match decode_base64(text) {
                Some(bytes) => {
                    tracing::debug!(path = shape.name, bytes = bytes.len(), "resolved inline media");
                    let mime_type = pick_mime(declared_mime, &bytes, default_mime);
                    return Ok(Resolved::Inline { bytes, mime_type, matched: shape.name });
                }
                None => {
                    tracing::warn!(path = shape.name, "value at known path is not base64, skipping");
                }
            },
            ShapeKind::StorageUri => {
                tracing::debug!(path = shape.name, uri = text, "resolved storage reference");
                return Ok(Resolved::StorageRef { uri: text.to_string(), mime_type: declared_mime });
            }
        }
    }

    if let Some(bytes) = find_long_base64(payload) {
        tracing::info!(bytes = bytes.len(), "resolved media via recursive search");
        let mime_type = pick_mime(None, &bytes, default_mime);
        return Ok(Resolved::Inline { bytes, mime_type, matched: "recursive search" });
    }

    let keys = top_level_keys(payload);
    tracing::error!(?keys, "no media found in completion payload");
    Err(RemixError::ResultNotFound { keys })
}

pub fn top_level_keys(payload: &Value) -> Vec<String> {
    payload
        .as_object()
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default()
}

/// Follows `path`, returning the value and the object that directly contains it.
fn lookup<'a>(root: &'a Value, path: &[PathSegment]) -> Option<(&'a Value, Option<&'a Value>)> {
    let mut current = root;
    let mut parent = None;
    for segment in path {
        let next = match segment {
            PathSegment::Key(key) => current.get(*key)?,
            PathSegment::Index(index) => current.get(*index)?,
        };
        parent = Some(current);
        current = next;
    }
    if current.is_null() {
        return None;
    }
    Some((current, parent))
}

/// Depth-first, document order; only strings over the threshold that decode are accepted.
fn find_long_base64(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(text) if text.len() > LONG_STRING_THRESHOLD => decode_base64(text),
        Value::Array(items) => items.iter().find_map(find_long_base64),
        Value::Object(object) => object.values().find_map(find_long_base64),
        _ => None,
    }
}

/// Decodes standard base64, tolerating a `data:` URL prefix and line breaks.
pub fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let body = match text.split_once(";base64,") {
        Some((prefix, body)) if prefix.starts_with("data:") => body,
        _ => text,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    STANDARD.decode(compact.as_bytes()).ok()
}

fn pick_mime(declared: Option<String>, bytes: &[u8], default_mime: &str) -> String {
    declared
        .filter(|mime| !mime.trim().is_empty())
        .or_else(|| image_processing::detect_mime_type(bytes).map(str::to_string))
        .unwrap_or_else(|| default_mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn long_base64(fill: u8, decoded_len: usize) -> String {
        STANDARD.encode(vec![fill; decoded_len])
    }

    #[test]
    fn known_path_beats_unrelated_long_string() {
        let video = STANDARD.encode(b"\x00\x00\x00\x20ftypisom-video");
        let payload = json!({
            "analysis": long_base64(b'a', 2_000),
            "response": {
                "candidates": [{
                    "content": { "parts": [{ "inlineData": { "mimeType": "video/mp4", "data": video } }] }
                }]
            }
        });

        let resolved = resolve(&payload, "video/mp4").unwrap();
        match resolved {
            Resolved::Inline { bytes, mime_type, matched } => {
                assert_eq!(bytes, b"\x00\x00\x00\x20ftypisom-video");
                assert_eq!(mime_type, "video/mp4");
                assert_eq!(matched, "response.candidates[0].content.parts[0].inlineData.data");
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_long_string_three_levels_deep() {
        let encoded = long_base64(7, 900);
        assert!(encoded.len() > LONG_STRING_THRESHOLD);
        let payload = json!({
            "name": "operations/abc",
            "done": true,
            "result": { "outputs": { "clip": encoded } }
        });

        let resolved = resolve(&payload, "video/mp4").unwrap();
        assert_eq!(
            resolved,
            Resolved::Inline {
                bytes: vec![7; 900],
                mime_type: "video/mp4".to_string(),
                matched: "recursive search",
            }
        );
    }

    #[test]
    fn fallback_takes_first_long_string_in_document_order() {
        let payload = json!({
            "b": { "first": long_base64(1, 800) },
            "a": [ long_base64(2, 800) ]
        });
        match resolve(&payload, "video/mp4").unwrap() {
            Resolved::Inline { bytes, .. } => assert_eq!(bytes[0], 1),
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn long_prose_is_not_mistaken_for_media() {
        let prose = "This advertisement shows a bright sunny beach. ".repeat(40);
        let payload = json!({ "done": true, "response": { "summary": prose } });
        let err = resolve(&payload, "video/mp4").unwrap_err();
        assert!(matches!(err, RemixError::ResultNotFound { .. }));
    }

    #[test]
    fn nothing_long_enough_reports_top_level_keys() {
        let payload = json!({ "name": "operations/abc", "done": true, "response": { "short": "abc" } });
        match resolve(&payload, "video/mp4").unwrap_err() {
            RemixError::ResultNotFound { keys } => assert_eq!(keys, vec!["name", "done", "response"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn storage_reference_is_returned_when_no_inline_bytes() {
        let payload = json!({
            "response": { "videos": [{ "gcsUri": "gs://bucket/out/sample_0.mp4", "mimeType": "video/mp4" }] }
        });
        assert_eq!(
            resolve(&payload, "video/mp4").unwrap(),
            Resolved::StorageRef {
                uri: "gs://bucket/out/sample_0.mp4".to_string(),
                mime_type: Some("video/mp4".to_string()),
            }
        );
    }

    #[test]
    fn inline_bytes_in_videos_array_win_over_storage_reference() {
        let payload = json!({
            "response": { "videos": [{
                "gcsUri": "gs://bucket/out/sample_0.mp4",
                "bytesBase64Encoded": STANDARD.encode(b"clip"),
                "mimeType": "video/mp4"
            }] }
        });
        match resolve(&payload, "video/mp4").unwrap() {
            Resolved::Inline { bytes, matched, .. } => {
                assert_eq!(bytes, b"clip");
                assert_eq!(matched, "response.videos[0].bytesBase64Encoded");
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn decodes_data_urls_and_wrapped_lines() {
        assert_eq!(decode_base64("data:image/png;base64,aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_base64("aG\nk="), Some(b"hi".to_vec()));
        assert_eq!(decode_base64("not base64!"), None);
    }

    #[test]
    fn sniffed_type_is_used_when_undeclared() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let payload = json!({ "response": { "predictions": [{ "bytesBase64Encoded": STANDARD.encode(png) }] } });
        match resolve(&payload, "video/mp4").unwrap() {
            Resolved::Inline { mime_type, .. } => assert_eq!(mime_type, "image/png"),
            other => panic!("unexpected resolution: {other:?}"),
        }
    }
}
