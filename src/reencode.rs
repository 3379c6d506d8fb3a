//! Bounded-duration, frame-sampled video re-encode.
//!
//! The source is decoded by one ffmpeg child emitting raw RGBA frames at a
//! fixed 30 Hz sample rate; each frame is drawn onto an offscreen surface and
//! the surface is captured into a second ffmpeg child encoding H.264/yuv420p
//! MP4. The pump stops at whichever comes first: the duration ceiling or
//! end-of-stream. The encoder is started before the first frame and stopped
//! exactly once; a stalled decoder trips a watchdog instead of hanging.

use std::{
    io::Read as _,
    path::Path,
    process::{Child, ChildStdin, Command, Stdio},
    sync::mpsc,
    time::Duration,
};

use crate::{
    error::{GlimpseError, GlimpseResult},
    probe::VideoProbe,
    transcode::CancelFlag,
};

/// Fixed frame sample rate of the re-encode pump.
pub const SAMPLE_FPS: u32 = 30;

/// Watchdog for a decoder that stops producing frames without signalling
/// end-of-stream.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(10);

// Backpressure on the reader thread; the decoder child blocks on its pipe
// once this fills.
const FRAME_CHANNEL_DEPTH: usize = 8;

/// Offscreen RGBA raster surface, sized to the source's native dimensions
/// and exclusively owned by one pipeline invocation.
pub struct FrameSurface {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameSurface {
    pub fn new(width: u32, height: u32) -> GlimpseResult<Self> {
        if width == 0 || height == 0 {
            return Err(GlimpseError::validation(
                "frame surface dimensions must be non-zero",
            ));
        }
        Ok(Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        })
    }

    pub fn frame_len(&self) -> usize {
        self.data.len()
    }

    /// Draw one decoded frame onto the surface.
    pub fn draw(&mut self, frame: &[u8]) -> GlimpseResult<()> {
        if frame.len() != self.data.len() {
            return Err(GlimpseError::encode(format!(
                "frame size mismatch: got {} bytes, surface is {}x{} rgba",
                frame.len(),
                self.width,
                self.height
            )));
        }
        self.data.copy_from_slice(frame);
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Encoder half: raw RGBA frames piped into an ffmpeg child producing
/// H.264/yuv420p MP4 with faststart.
struct SurfaceEncoder {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frame_len: usize,
}

impl SurfaceEncoder {
    fn start(width: u32, height: u32, out_path: &Path) -> GlimpseResult<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{width}x{height}"),
            "-r",
            &SAMPLE_FPS.to_string(),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            // Sources with odd dimensions are padded up to the even sizes
            // yuv420p requires.
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-movflags",
            "+faststart",
        ])
        .arg(out_path);

        let mut child = cmd.spawn().map_err(|e| {
            GlimpseError::encode(format!(
                "failed to spawn ffmpeg encoder (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GlimpseError::encode("failed to open ffmpeg encoder stdin"))?;

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            frame_len: width as usize * height as usize * 4,
        })
    }

    fn write_surface(&mut self, surface: &FrameSurface) -> GlimpseResult<()> {
        if surface.frame_len() != self.frame_len {
            return Err(GlimpseError::encode("surface does not match encoder size"));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(GlimpseError::encode("encoder is already finalized"));
        };
        use std::io::Write as _;
        stdin
            .write_all(surface.data())
            .map_err(|e| GlimpseError::encode(format!("failed to write frame to encoder: {e}")))
    }

    /// Flush and stop the encoder. Guarded: a second call is a no-op, so a
    /// duration-elapsed stop and an end-of-stream stop can never both run.
    fn finish(&mut self) -> GlimpseResult<()> {
        if self.stdin.take().is_none() {
            return Ok(());
        }
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child
            .wait_with_output()
            .map_err(|e| GlimpseError::encode(format!("failed to wait for encoder: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GlimpseError::encode(format!(
                "ffmpeg encoder exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for SurfaceEncoder {
    // Abandoned runs (cancellation, mid-run failure) must not leave an
    // encoder child behind; partial output is discarded by the temp-file
    // handling above this layer.
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Decoder half: an ffmpeg child resampling the source to 30 Hz raw RGBA,
/// drained by a reader thread into a bounded channel. The channel recv
/// doubles as the stall watchdog.
struct FrameReader {
    child: Child,
    rx: mpsc::Receiver<std::io::Result<Vec<u8>>>,
}

impl FrameReader {
    fn start(source_path: &Path, frame_len: usize) -> GlimpseResult<Self> {
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(source_path)
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "-r",
                &SAMPLE_FPS.to_string(),
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GlimpseError::decode(format!("failed to spawn ffmpeg decoder: {e}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| GlimpseError::decode("failed to open ffmpeg decoder stdout"))?;

        let (tx, rx) = mpsc::sync_channel(FRAME_CHANNEL_DEPTH);
        std::thread::spawn(move || {
            loop {
                let mut frame = vec![0u8; frame_len];
                match stdout.read_exact(&mut frame) {
                    Ok(()) => {
                        if tx.send(Ok(frame)).is_err() {
                            // Pump stopped early; stop draining.
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        });

        Ok(Self { child, rx })
    }

    /// Next decoded frame, `None` at end-of-stream. A decoder that neither
    /// produces a frame nor terminates within [`STALL_TIMEOUT`] fails the
    /// run.
    fn next_frame(&mut self) -> GlimpseResult<Option<Vec<u8>>> {
        match self.rx.recv_timeout(STALL_TIMEOUT) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(GlimpseError::decode(format!(
                "ffmpeg decoder read failed: {e}"
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(None),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(GlimpseError::encode("decoder stalled, aborting re-encode"))
            }
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        // Early stops leave the decoder mid-stream; reap it so repeated
        // invocations cannot accumulate children.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Re-encode `source_path` into `out_path`, sampling frames at 30 Hz until
/// the duration ceiling or end-of-stream, whichever comes first. Returns the
/// wall-clock duration of the produced output. Sources shorter than the
/// ceiling come out at their own length; no padding.
pub fn crop_to_duration(
    source_path: &Path,
    probe: &VideoProbe,
    max_duration_secs: f64,
    out_path: &Path,
    cancel: &CancelFlag,
) -> GlimpseResult<f64> {
    if !(max_duration_secs > 0.0) {
        return Err(GlimpseError::validation(
            "maximum duration must be positive",
        ));
    }

    let mut surface = FrameSurface::new(probe.width, probe.height)?;
    let max_frames = (max_duration_secs * f64::from(SAMPLE_FPS)).floor() as u64;

    // Encoder first: start must precede the first captured frame.
    let mut encoder = SurfaceEncoder::start(probe.width, probe.height, out_path)?;
    let mut reader = FrameReader::start(source_path, surface.frame_len())?;

    let mut frames_written: u64 = 0;
    while frames_written < max_frames {
        // Cooperative cancel: the frame already in flight has completed,
        // nothing is torn down mid-write.
        cancel.check()?;
        let Some(frame) = reader.next_frame()? else {
            break;
        };
        surface.draw(&frame)?;
        encoder.write_surface(&surface)?;
        frames_written += 1;
    }

    if frames_written == 0 {
        return Err(GlimpseError::decode(
            "decoder produced no frames (corrupt or unsupported source)",
        ));
    }

    drop(reader);
    encoder.finish()?;

    let duration = frames_written as f64 / f64::from(SAMPLE_FPS);
    tracing::info!(
        src = %source_path.display(),
        out = %out_path.display(),
        frames = frames_written,
        duration_secs = duration,
        "bounded re-encode finished"
    );
    Ok(duration)
}
