//! Transcoding pipeline: produce an asset satisfying hard constraints
//! (resolution, duration, byte size) from an arbitrary user image or video,
//! then hand it to an opaque upload sink.
//!
//! Orchestration policy: the byte ceiling is a precondition (reject before
//! any decode); video sources at or under the duration cap pass through
//! unmodified; longer ones go through the bounded re-encode first. A polled
//! cancellation flag is consulted between stages and inside the frame pump;
//! cancellation is silent, never an error shown to the user.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;

use crate::{
    error::{GlimpseError, GlimpseResult},
    model::MediaKind,
    probe::{self, VideoProbe},
    reencode,
    resample::{self, ResampledImage},
};

/// Cooperative cancellation: a flag polled at defined suspension points,
/// never a preemptive interrupt. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> GlimpseResult<()> {
        if self.is_cancelled() {
            Err(GlimpseError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Hard output constraints for one transcode.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscodeConstraints {
    pub max_width: u32,
    pub max_height: u32,
    /// Videos longer than this are cropped down to it.
    pub max_duration_secs: f64,
    /// Videos longer than this are rejected outright instead of cropped.
    pub reject_over_secs: Option<f64>,
    /// Raw inputs above this are rejected before any decode.
    pub max_bytes: u64,
    /// Lossy re-encode quality factor, 0..=1.
    pub quality: f32,
}

impl TranscodeConstraints {
    /// General story surface: crop anything down to 60 seconds.
    pub fn story() -> Self {
        Self {
            max_width: 1080,
            max_height: 1920,
            max_duration_secs: 60.0,
            reject_over_secs: None,
            max_bytes: 50 * 1024 * 1024,
            quality: 0.8,
        }
    }

    /// Short-form surface: 15-second output, and sources past a minute are
    /// refused rather than silently losing most of their content.
    pub fn short_form() -> Self {
        Self {
            max_duration_secs: 15.0,
            reject_over_secs: Some(60.0),
            ..Self::story()
        }
    }

    pub fn validate(&self) -> GlimpseResult<()> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(GlimpseError::validation("bounding box must be non-zero"));
        }
        if !(self.max_duration_secs > 0.0) {
            return Err(GlimpseError::validation("duration cap must be positive"));
        }
        if let Some(cap) = self.reject_over_secs {
            if cap < self.max_duration_secs {
                return Err(GlimpseError::validation(
                    "hard duration cap below the crop target",
                ));
            }
        }
        if self.max_bytes == 0 {
            return Err(GlimpseError::validation("byte ceiling must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(GlimpseError::validation("quality must be within 0..=1"));
        }
        Ok(())
    }
}

/// Opaque file-like handle from the picker/upload form.
#[derive(Clone, Debug)]
pub struct SourceAsset {
    pub file_name: String,
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
}

/// One single-use transcode; request/result pairs are never retried
/// automatically.
#[derive(Clone, Debug)]
pub struct TranscodeRequest {
    pub source: SourceAsset,
    pub constraints: TranscodeConstraints,
    /// Caption from the upload form, forwarded untouched to the upload sink.
    pub caption: Option<String>,
}

#[derive(Clone, Debug)]
pub enum TranscodeOutput {
    Image {
        data_uri: String,
        width: u32,
        height: u32,
    },
    Video {
        /// H.264/yuv420p MP4 with faststart.
        bytes: Vec<u8>,
        duration_secs: f64,
    },
}

/// A cropped video held in a self-deleting temp location. Dropping it on any
/// exit path releases the handle.
pub struct CroppedVideo {
    pub path: tempfile::TempPath,
    pub duration_secs: f64,
}

/// Seam over the media tooling, so orchestration policy is testable without
/// ffmpeg on the machine.
pub trait MediaBackend {
    fn probe(&self, source_path: &Path) -> GlimpseResult<VideoProbe>;

    fn crop_to_duration(
        &self,
        source_path: &Path,
        probe: &VideoProbe,
        max_duration_secs: f64,
        cancel: &CancelFlag,
    ) -> GlimpseResult<CroppedVideo>;

    fn resample_image(
        &self,
        bytes: &[u8],
        max_width: u32,
        max_height: u32,
        quality: f32,
    ) -> GlimpseResult<ResampledImage>;
}

/// Production backend over the system ffmpeg/ffprobe binaries.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn probe(&self, source_path: &Path) -> GlimpseResult<VideoProbe> {
        probe::probe_video(source_path)
    }

    fn crop_to_duration(
        &self,
        source_path: &Path,
        probe: &VideoProbe,
        max_duration_secs: f64,
        cancel: &CancelFlag,
    ) -> GlimpseResult<CroppedVideo> {
        let out = tempfile::Builder::new()
            .prefix("glimpse-crop-")
            .suffix(".mp4")
            .tempfile()
            .context("create temp file for cropped output")?
            .into_temp_path();
        let duration_secs =
            reencode::crop_to_duration(source_path, probe, max_duration_secs, &out, cancel)?;
        Ok(CroppedVideo {
            path: out,
            duration_secs,
        })
    }

    fn resample_image(
        &self,
        bytes: &[u8],
        max_width: u32,
        max_height: u32,
        quality: f32,
    ) -> GlimpseResult<ResampledImage> {
        resample::resample_image(bytes, max_width, max_height, quality)
    }
}

/// Remote locator returned by the upload layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLocator {
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct UploadMeta {
    pub file_name: String,
    pub kind: MediaKind,
    pub caption: Option<String>,
}

/// External collaborator taking the finished asset. Hand-off only: the
/// pipeline never retries upload failures.
pub trait UploadSink {
    fn upload(&mut self, output: &TranscodeOutput, meta: &UploadMeta) -> GlimpseResult<RemoteLocator>;
}

/// Orchestrates probe + crop (video) or resample (image) against one
/// backend. One invocation at a time: the offscreen surface and temp
/// locations are exclusively owned, so re-entrant runs are refused and the
/// triggering control stays disabled while a run is in flight.
pub struct TranscodePipeline<B: MediaBackend> {
    backend: B,
    in_flight: AtomicBool,
}

impl<B: MediaBackend> TranscodePipeline<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one transcode to completion, cancellation, or failure.
    pub fn run(&self, request: &TranscodeRequest, cancel: &CancelFlag) -> GlimpseResult<TranscodeOutput> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        request.constraints.validate()?;

        // Byte ceiling is a precondition: reject before any decode work.
        let size = request.source.bytes.len() as u64;
        if size > request.constraints.max_bytes {
            return Err(GlimpseError::input_rejected(format!(
                "'{}' is {size} bytes, over the {} byte limit",
                request.source.file_name, request.constraints.max_bytes
            )));
        }

        cancel.check()?;
        match request.source.kind {
            MediaKind::Image => self.run_image(request),
            MediaKind::Video => self.run_video(request, cancel),
        }
    }

    /// Run and hand the result to the upload sink. Cancellation yields
    /// `Ok(None)`: silent, distinguished from real failures so the caller
    /// never surfaces a spurious error message.
    pub fn run_and_upload<U: UploadSink>(
        &self,
        request: &TranscodeRequest,
        cancel: &CancelFlag,
        sink: &mut U,
    ) -> GlimpseResult<Option<RemoteLocator>> {
        let output = match self.run(request, cancel) {
            Ok(output) => output,
            Err(err) if err.is_cancelled() => {
                tracing::debug!(file = %request.source.file_name, "transcode cancelled before upload");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let meta = UploadMeta {
            file_name: request.source.file_name.clone(),
            kind: request.source.kind,
            caption: request.caption.clone(),
        };
        let locator = sink.upload(&output, &meta)?;
        Ok(Some(locator))
    }

    fn run_image(&self, request: &TranscodeRequest) -> GlimpseResult<TranscodeOutput> {
        let c = &request.constraints;
        let resampled =
            self.backend
                .resample_image(&request.source.bytes, c.max_width, c.max_height, c.quality)?;
        Ok(TranscodeOutput::Image {
            data_uri: resampled.to_data_uri(),
            width: resampled.width,
            height: resampled.height,
        })
    }

    fn run_video(&self, request: &TranscodeRequest, cancel: &CancelFlag) -> GlimpseResult<TranscodeOutput> {
        let c = &request.constraints;

        // ffprobe/ffmpeg work on paths; materialize the handle once and let
        // RAII release it on every exit.
        let source_path = write_source_temp(&request.source)?;

        let probe = self.backend.probe(&source_path)?;
        cancel.check()?;

        if let Some(cap) = c.reject_over_secs {
            if probe.duration_secs > cap {
                return Err(GlimpseError::input_rejected(format!(
                    "video is {:.1}s, over the {cap:.0}s limit for this surface",
                    probe.duration_secs
                )));
            }
        }

        if probe.duration_secs <= c.max_duration_secs {
            // Pass-through policy: already within the cap, hand the source
            // on unmodified.
            tracing::debug!(
                duration_secs = probe.duration_secs,
                cap = c.max_duration_secs,
                "video within duration cap, skipping crop"
            );
            return Ok(TranscodeOutput::Video {
                bytes: request.source.bytes.clone(),
                duration_secs: probe.duration_secs,
            });
        }

        let cropped = self
            .backend
            .crop_to_duration(&source_path, &probe, c.max_duration_secs, cancel)?;
        cancel.check()?;

        let bytes = std::fs::read(&cropped.path).context("read cropped output")?;
        Ok(TranscodeOutput::Video {
            bytes,
            duration_secs: cropped.duration_secs,
        })
    }
}

/// Exclusive-run guard; released on drop so a failed run does not wedge the
/// pipeline.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> GlimpseResult<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(GlimpseError::validation(
                "a transcode is already in flight",
            ));
        }
        Ok(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn write_source_temp(source: &SourceAsset) -> GlimpseResult<tempfile::TempPath> {
    let suffix = Path::new(&source.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix("glimpse-src-")
        .suffix(&suffix)
        .tempfile()
        .context("create temp file for source asset")?;
    file.write_all(&source.bytes)
        .context("write source asset to temp file")?;
    Ok(file.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_presets_validate() {
        TranscodeConstraints::story().validate().unwrap();
        TranscodeConstraints::short_form().validate().unwrap();
    }

    #[test]
    fn constraints_reject_inverted_duration_caps() {
        let mut c = TranscodeConstraints::short_form();
        c.reject_over_secs = Some(10.0); // below the 15s crop target
        assert!(c.validate().is_err());
    }

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());
        other.cancel();
        assert!(flag.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn in_flight_guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlightGuard::acquire(&flag).unwrap();
        assert!(InFlightGuard::acquire(&flag).is_err());
        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn source_temp_keeps_extension() {
        let source = SourceAsset {
            file_name: "clip.mp4".to_string(),
            kind: MediaKind::Video,
            bytes: vec![1, 2, 3],
        };
        let path = write_source_temp(&source).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }
}
