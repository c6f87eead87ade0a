//! Still-frame sampling from a video, used to seed video synthesis.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::process::Command;
use uuid::Uuid;

use crate::error::{RemixError, Result};
use crate::image_processing::{self, FRAME_JPEG_QUALITY};

/// A playable video: a network reference or bytes held locally.
#[derive(Clone, Debug)]
pub enum VideoSource {
    Remote(String),
    Local { bytes: Vec<u8>, extension: String },
}

/// One captured frame, JPEG encoded.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl SampledFrame {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }
}

/// Decode backend: reports a video's duration and renders the frame at a timestamp.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    async fn probe_duration(&self, input: &str) -> anyhow::Result<f64>;

    /// Returns the frame at `timestamp` as an encoded still image (any format `image` reads).
    async fn capture_frame(&self, input: &str, timestamp: f64) -> anyhow::Result<Vec<u8>>;
}

/// Sample times for `count` frames over `duration` seconds.
///
/// Two frames sit at the quarter marks, skipping the first and last frames
/// that often render black. More frames are spread evenly inside `(0, duration)`.
#[derive(Clone, Debug)]
pub struct FrameTimestamps {
    duration: f64,
    count: usize,
    next: usize,
}

impl Iterator for FrameTimestamps {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        if self.count == 2 {
            return Some(if index == 0 { self.duration * 0.25 } else { self.duration * 0.75 });
        }
        Some((index + 1) as f64 * self.duration / (self.count + 1) as f64)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameTimestamps {}

pub fn frame_timestamps(duration: f64, count: usize) -> FrameTimestamps {
    FrameTimestamps { duration, count, next: 0 }
}

/// Temporary file backing a locally supplied video; removed on drop.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    async fn create(dir: &Path, extension: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let extension = extension.trim_start_matches('.');
        let scratch = Self {
            path: dir.join(format!("{}.{}", Uuid::new_v4().simple(), extension)),
        };
        tokio::fs::write(&scratch.path, bytes).await?;
        Ok(scratch)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove scratch video");
            }
        }
    }
}

#[derive(Clone)]
pub struct FrameSampler {
    decoder: Arc<dyn VideoDecoder>,
    scratch_dir: PathBuf,
}

impl FrameSampler {
    pub fn new(decoder: Arc<dyn VideoDecoder>, scratch_dir: PathBuf) -> Self {
        Self { decoder, scratch_dir }
    }

    /// Captures `count` frames from `source`. Fails as a whole if any frame fails.
    pub async fn sample(&self, source: &VideoSource, count: usize) -> Result<Vec<SampledFrame>> {
        if count < 2 {
            return Err(RemixError::MediaLoad(format!(
                "at least 2 frames are required, got {count}"
            )));
        }

        // Held until return so the staged file outlives every decoder call.
        let mut scratch: Option<ScratchFile> = None;
        let input = match source {
            VideoSource::Remote(reference) => reference.clone(),
            VideoSource::Local { bytes, extension } => {
                let file = ScratchFile::create(&self.scratch_dir, extension, bytes)
                    .await
                    .map_err(|err| RemixError::MediaLoad(format!("failed to stage local video: {err}")))?;
                let staged = scratch.insert(file);
                staged.path.to_string_lossy().into_owned()
            }
        };

        let duration = self
            .decoder
            .probe_duration(&input)
            .await
            .map_err(|err| RemixError::MediaLoad(err.to_string()))?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(RemixError::MediaLoad(format!(
                "video reports unusable duration {duration}"
            )));
        }

        let mut frames = Vec::with_capacity(count);
        for timestamp in frame_timestamps(duration, count) {
            let still = self
                .decoder
                .capture_frame(&input, timestamp)
                .await
                .map_err(|err| RemixError::FrameCapture { timestamp, reason: err.to_string() })?;
            let (jpeg, width, height) = image_processing::reencode_as_jpeg(&still, FRAME_JPEG_QUALITY)
                .map_err(|err| RemixError::FrameCapture { timestamp, reason: err.to_string() })?;
            tracing::debug!(
                index = frames.len() + 1,
                count,
                timestamp,
                bytes = jpeg.len(),
                "captured frame"
            );
            frames.push(SampledFrame { timestamp, width, height, jpeg });
        }
        Ok(frames)
    }
}

/// Decoder backed by the `ffprobe` and `ffmpeg` executables.
#[derive(Clone, Debug)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn probe_duration(&self, input: &str) -> anyhow::Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                input,
            ])
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to run ffprobe")?;
        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .with_context(|| format!("ffprobe returned no duration: {:?}", text.trim()))
    }

    async fn capture_frame(&self, input: &str, timestamp: f64) -> anyhow::Result<Vec<u8>> {
        let output = Command::new(&self.ffmpeg)
            .args([
                "-v",
                "error",
                "-ss",
                &format!("{timestamp:.3}"),
                "-i",
                input,
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "png",
                "pipe:1",
            ])
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to run ffmpeg")?;
        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if output.stdout.is_empty() {
            return Err(anyhow!("ffmpeg produced no frame"));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::sync::Mutex;

    fn png_frame() -> Vec<u8> {
        let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut output = Vec::new();
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
            .expect("encode png");
        output
    }

    struct FakeDecoder {
        duration: f64,
        fail_at_call: Option<usize>,
        inputs: Mutex<Vec<String>>,
        captured: Mutex<Vec<f64>>,
    }

    impl FakeDecoder {
        fn new(duration: f64, fail_at_call: Option<usize>) -> Self {
            Self {
                duration,
                fail_at_call,
                inputs: Mutex::new(Vec::new()),
                captured: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VideoDecoder for FakeDecoder {
        async fn probe_duration(&self, input: &str) -> anyhow::Result<f64> {
            self.inputs.lock().unwrap().push(input.to_string());
            Ok(self.duration)
        }

        async fn capture_frame(&self, input: &str, timestamp: f64) -> anyhow::Result<Vec<u8>> {
            assert!(Path::new(input).exists() || input.starts_with("http"));
            let mut captured = self.captured.lock().unwrap();
            captured.push(timestamp);
            if self.fail_at_call == Some(captured.len()) {
                return Err(anyhow!("seek produced no paintable frame"));
            }
            Ok(png_frame())
        }
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("konten-remix-frames-{}", Uuid::new_v4().simple()))
    }

    #[test]
    fn two_frames_sit_at_quarter_marks() {
        for duration in [0.1, 1.0, 7.3, 10.0, 3600.0] {
            let times: Vec<f64> = frame_timestamps(duration, 2).collect();
            assert_eq!(times, vec![0.25 * duration, 0.75 * duration]);
        }
    }

    #[test]
    fn many_frames_are_spread_inside_the_clip() {
        let times: Vec<f64> = frame_timestamps(8.0, 3).collect();
        assert_eq!(times, vec![2.0, 4.0, 6.0]);
        let times: Vec<f64> = frame_timestamps(12.0, 5).collect();
        assert_eq!(times.len(), 5);
        assert!(times.iter().all(|t| *t > 0.0 && *t < 12.0));
        assert!(times.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn samples_remote_video_at_quarter_marks() {
        let decoder = Arc::new(FakeDecoder::new(10.0, None));
        let sampler = FrameSampler::new(decoder.clone(), scratch_dir());
        let frames = sampler
            .sample(&VideoSource::Remote("https://cdn.example.com/ad.mp4".to_string()), 2)
            .await
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp, 2.5);
        assert_eq!(frames[1].timestamp, 7.5);
        assert_eq!(image_processing::detect_mime_type(&frames[0].jpeg), Some("image/jpeg"));
        assert!(!frames[1].to_base64().is_empty());
    }

    #[tokio::test]
    async fn one_failed_capture_fails_everything_and_cleans_up() {
        let dir = scratch_dir();
        let decoder = Arc::new(FakeDecoder::new(4.0, Some(2)));
        let sampler = FrameSampler::new(decoder.clone(), dir.clone());
        let source = VideoSource::Local { bytes: vec![1, 2, 3], extension: "mp4".to_string() };

        let err = sampler.sample(&source, 2).await.unwrap_err();
        assert!(matches!(err, RemixError::FrameCapture { timestamp, .. } if timestamp == 3.0));

        let staged = decoder.inputs.lock().unwrap()[0].clone();
        assert!(!Path::new(&staged).exists());
    }

    #[tokio::test]
    async fn local_video_is_removed_after_success() {
        let decoder = Arc::new(FakeDecoder::new(6.0, None));
        let sampler = FrameSampler::new(decoder.clone(), scratch_dir());
        let source = VideoSource::Local { bytes: vec![0; 16], extension: ".webm".to_string() };

        let frames = sampler.sample(&source, 3).await.unwrap();
        assert_eq!(frames.len(), 3);
        let staged = decoder.inputs.lock().unwrap()[0].clone();
        assert!(staged.ends_with(".webm"));
        assert!(!Path::new(&staged).exists());
    }

    #[tokio::test]
    async fn failed_scratch_write_leaves_nothing_behind() {
        let dir = scratch_dir();
        assert!(ScratchFile::create(&dir, "mp4/missing", &[1, 2, 3]).await.is_err());
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_duration_is_a_load_error() {
        let sampler = FrameSampler::new(Arc::new(FakeDecoder::new(0.0, None)), scratch_dir());
        let err = sampler
            .sample(&VideoSource::Remote("https://cdn.example.com/ad.mp4".to_string()), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, RemixError::MediaLoad(_)));
    }
}
