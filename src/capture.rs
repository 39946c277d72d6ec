//! Layered-fallback capture of the live feed: video element first, nested
//! frames next, full page last.

use std::error::Error;
use std::fmt;
use std::io::Cursor;
use std::thread;
use std::time::Duration;

use image::{imageops::FilterType, ImageFormat};

/// Width every stored snapshot is normalized to.
pub const CANONICAL_WIDTH: u32 = 1920;
/// Height every stored snapshot is normalized to.
pub const CANONICAL_HEIGHT: u32 = 940;

/// Browser-session failure raised by a [`PageSession`] implementation.
#[derive(Debug)]
pub enum SessionError {
    /// The driver transport failed or the session is gone; further tiers are pointless.
    Lost(String),
    /// An element or script interaction failed inside an otherwise live session.
    Interaction(String),
}

impl SessionError {
    /// A session-ending failure.
    pub fn lost(message: impl Into<String>) -> Self {
        SessionError::Lost(message.into())
    }

    /// A recoverable interaction failure.
    pub fn interaction(message: impl Into<String>) -> Self {
        SessionError::Interaction(message.into())
    }

    /// Whether the failure ends the session (and therefore the chain).
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Lost(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Lost(message) => write!(f, "session lost: {message}"),
            SessionError::Interaction(message) => write!(f, "interaction failed: {message}"),
        }
    }
}

impl Error for SessionError {}

/// Failure of the capture chain as a whole.
#[derive(Debug)]
pub enum CaptureError {
    /// The underlying browser session failed hard mid-chain.
    Session(SessionError),
    /// The chain produced a zero-byte artifact.
    EmptyArtifact,
    /// The captured bytes could not be decoded or re-encoded as PNG.
    Image(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Session(err) => write!(f, "browser session failed: {err}"),
            CaptureError::EmptyArtifact => write!(f, "capture produced an empty image"),
            CaptureError::Image(message) => write!(f, "image normalization failed: {message}"),
        }
    }
}

impl Error for CaptureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CaptureError::Session(err) => Some(err),
            _ => None,
        }
    }
}

/// The narrow surface the capture chain needs from a browser automation driver.
///
/// Implementations map driver errors onto [`SessionError`]: transport-level
/// failures are `Lost`, element- and script-level failures are `Interaction`
/// (or a soft `Ok(None)` where the signature allows it).
pub trait PageSession {
    /// Navigates to `url` and blocks until the document reports readiness,
    /// up to `ready_timeout`.
    fn goto(&mut self, url: &str, ready_timeout: Duration) -> Result<(), SessionError>;

    /// Waits up to `wait` for a live-video element in the current browsing
    /// context and screenshots that element. `Ok(None)` means no usable
    /// element turned up.
    fn screenshot_video(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, SessionError>;

    /// Number of nested browsing contexts in document order.
    fn iframe_count(&mut self) -> Result<usize, SessionError>;

    /// Switches into the nested context at `index`.
    fn enter_iframe(&mut self, index: usize) -> Result<(), SessionError>;

    /// Restores the top-level browsing context.
    fn leave_iframes(&mut self) -> Result<(), SessionError>;

    /// Full scrollable height of the page in CSS pixels.
    fn page_height(&mut self) -> Result<u32, SessionError>;

    /// Resizes the capture surface.
    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<(), SessionError>;

    /// Screenshots the entire composited page.
    fn screenshot_page(&mut self) -> Result<Vec<u8>, SessionError>;
}

/// Timing and sizing knobs for the capture chain.
#[derive(Clone, Copy, Debug)]
pub struct CaptureTuning {
    /// Upper bound on waiting for document readiness.
    pub ready_timeout: Duration,
    /// Fixed pause after readiness so media players can hydrate.
    pub settle: Duration,
    /// Wait for a video element in the top-level context.
    pub video_wait: Duration,
    /// Wait for a video element inside each nested context.
    pub frame_video_wait: Duration,
    /// Minimum height enforced for the full-page fallback surface.
    pub height_floor: u32,
    /// Width of the full-page fallback surface.
    pub viewport_width: u32,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            settle: Duration::from_secs(5),
            video_wait: Duration::from_secs(10),
            frame_video_wait: Duration::from_secs(10),
            height_floor: 1080,
            viewport_width: 1920,
        }
    }
}

/// Runs the full fallback chain against an open session and returns a
/// normalized PNG.
///
/// Tier misses advance silently; only a hard session failure or a broken
/// artifact surfaces as an error. The caller owns persisting the bytes.
pub fn capture<S: PageSession>(
    session: &mut S,
    url: &str,
    tuning: &CaptureTuning,
) -> Result<Vec<u8>, CaptureError> {
    session.goto(url, tuning.ready_timeout).map_err(CaptureError::Session)?;
    thread::sleep(tuning.settle);

    if let Some(shot) = probe_tier(session.screenshot_video(tuning.video_wait))? {
        return normalize_png(shot, CANONICAL_WIDTH, CANONICAL_HEIGHT);
    }
    if let Some(shot) = framed_video_tier(session, tuning)? {
        return normalize_png(shot, CANONICAL_WIDTH, CANONICAL_HEIGHT);
    }
    let shot = full_page_tier(session, tuning)?;
    normalize_png(shot, CANONICAL_WIDTH, CANONICAL_HEIGHT)
}

/// Interprets one tier attempt: artifact, soft miss, or chain-ending failure.
fn probe_tier(
    result: Result<Option<Vec<u8>>, SessionError>,
) -> Result<Option<Vec<u8>>, CaptureError> {
    match result {
        Ok(shot) => Ok(shot),
        Err(err) if err.is_fatal() => Err(CaptureError::Session(err)),
        Err(err) => {
            crate::debug_log!("capture tier skipped: {err}");
            Ok(None)
        }
    }
}

fn framed_video_tier<S: PageSession>(
    session: &mut S,
    tuning: &CaptureTuning,
) -> Result<Option<Vec<u8>>, CaptureError> {
    let frames = match session.iframe_count() {
        Ok(count) => count,
        Err(err) if err.is_fatal() => return Err(CaptureError::Session(err)),
        Err(err) => {
            crate::debug_log!("iframe enumeration failed: {err}");
            0
        }
    };
    for index in 0..frames {
        restore_top(session)?;
        match session.enter_iframe(index) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(CaptureError::Session(err)),
            Err(err) => {
                crate::debug_log!("skipping iframe {index}: {err}");
                continue;
            }
        }
        let shot = session.screenshot_video(tuning.frame_video_wait);
        // The context is restored before the probe result is even examined so
        // an early return can never leave the session inside a frame.
        restore_top(session)?;
        if let Some(png) = probe_tier(shot)? {
            return Ok(Some(png));
        }
    }
    restore_top(session)?;
    Ok(None)
}

fn full_page_tier<S: PageSession>(
    session: &mut S,
    tuning: &CaptureTuning,
) -> Result<Vec<u8>, CaptureError> {
    match session.page_height() {
        Ok(height) => {
            let target = height.max(tuning.height_floor);
            if let Err(err) = session.resize_viewport(tuning.viewport_width, target) {
                if err.is_fatal() {
                    return Err(CaptureError::Session(err));
                }
                crate::debug_log!("viewport resize skipped: {err}");
            }
        }
        Err(err) if err.is_fatal() => return Err(CaptureError::Session(err)),
        Err(err) => {
            crate::debug_log!("page height probe failed: {err}");
        }
    }
    session.screenshot_page().map_err(CaptureError::Session)
}

fn restore_top<S: PageSession>(session: &mut S) -> Result<(), CaptureError> {
    session.leave_iframes().map_err(CaptureError::Session)
}

/// Decodes `bytes` as PNG and resizes to exactly `width` x `height` unless the
/// image already matches, in which case the original bytes pass through
/// untouched.
pub fn normalize_png(bytes: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
    if bytes.is_empty() {
        return Err(CaptureError::EmptyArtifact);
    }
    let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .map_err(|err| CaptureError::Image(err.to_string()))?;
    if decoded.width() == width && decoded.height() == height {
        return Ok(bytes);
    }
    let resized = decoded.resize_exact(width, height, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::with_capacity(bytes.len()));
    resized
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| CaptureError::Image(err.to_string()))?;
    Ok(out.into_inner())
}
