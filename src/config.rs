//! Runtime configuration resolved once at startup and passed down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use url::Url;

/// Page hosting the live camera feed.
pub const DEFAULT_URL: &str = "https://coollab.ucsd.edu/pierviz/";
/// WebDriver endpoint the capture session connects to.
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

const DEFAULT_ORACLE_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_ORACLE_MODEL: &str = "gpt-5.1";

/// Inclusive hour range during which capture runs; hours outside it are purged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureWindow {
    start_hour: u32,
    end_hour: u32,
}

impl CaptureWindow {
    /// Builds a window from inclusive start and end hours.
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// First hour (inclusive) of the window.
    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    /// Last hour (inclusive) of the window.
    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    /// Whether the given hour falls inside the window.
    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour <= self.end_hour
    }
}

impl Default for CaptureWindow {
    fn default() -> Self {
        Self::new(6, 19)
    }
}

/// Settings that govern a single capture run, resolved once from the CLI.
#[derive(Clone, Debug)]
pub struct CaptureControls {
    url: Url,
    window: CaptureWindow,
    headless: bool,
    webdriver_url: String,
}

impl CaptureControls {
    /// Constructs capture controls, validating the target page URL.
    pub fn new(
        url: &str,
        window: CaptureWindow,
        headless: bool,
        webdriver_url: String,
    ) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid page URL {url:?}"))?;
        Ok(Self {
            url,
            window,
            headless,
            webdriver_url,
        })
    }

    /// Page to open.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Hour window during which capture is attempted.
    pub fn window(&self) -> &CaptureWindow {
        &self.window
    }

    /// Whether the browser runs headless.
    pub fn headless(&self) -> bool {
        self.headless
    }

    /// WebDriver endpoint to connect to.
    pub fn webdriver_url(&self) -> &str {
        &self.webdriver_url
    }
}

/// On-disk layout of the data directory shared by every binary.
#[derive(Clone, Debug)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Roots the layout at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the hourly snapshot corpus.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Directory holding derived manifests and the visibility log.
    pub fn docs_dir(&self) -> PathBuf {
        self.root.join("docs")
    }

    /// Append-only visibility CSV.
    pub fn ledger_path(&self) -> PathBuf {
        self.docs_dir().join("visibility.csv")
    }

    /// Gallery directory for the rolling week of snapshots.
    pub fn last7_dir(&self) -> PathBuf {
        self.docs_dir().join("last7days")
    }

    /// Months-present manifest file.
    pub fn months_path(&self) -> PathBuf {
        self.docs_dir().join("months.json")
    }

    /// Directory holding calibration reference images for the oracle.
    pub fn reference_dir(&self) -> PathBuf {
        self.root.join("reference")
    }
}

/// Interprets a permissive boolean flag; only "0", "false", and "no" disable.
pub fn parse_headless(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no"
    )
}

/// Seeds missing environment variables from `./.env`.
///
/// Explicit environment always wins; a missing file is not an error.
pub fn seed_env_defaults() {
    let _ = dotenvy::dotenv();
}

/// CLI arguments shared by every binary that talks to the vision oracle.
#[derive(Args, Clone, Debug)]
pub struct OracleArgs {
    /// API key for the vision oracle; absence degrades every call to the sentinel
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL for the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE", default_value = DEFAULT_ORACLE_BASE)]
    pub openai_base_url: String,

    /// Vision model identifier
    #[arg(long, env = "PIERWATCH_MODEL", default_value = DEFAULT_ORACLE_MODEL)]
    pub oracle_model: String,

    /// Max seconds to wait for each oracle request
    #[arg(long, env = "PIERWATCH_ORACLE_TIMEOUT_SECS", default_value_t = 120)]
    pub oracle_timeout_secs: u64,

    /// Maximum attempts when the oracle reports rate limiting
    #[arg(long, env = "PIERWATCH_ORACLE_RETRIES", default_value_t = 5)]
    pub oracle_retries: usize,
}

impl OracleArgs {
    /// Resolves the parsed arguments into an oracle configuration.
    pub fn to_config(&self, layout: &DataLayout) -> OracleConfig {
        OracleConfig {
            api_key: self
                .openai_api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            base_url: self.openai_base_url.clone(),
            model: self.oracle_model.clone(),
            timeout: Duration::from_secs(self.oracle_timeout_secs.max(1)),
            max_retries: self.oracle_retries.max(1),
            reference_dir: layout.reference_dir(),
        }
    }
}

/// Resolved oracle client configuration.
#[derive(Clone, Debug)]
pub struct OracleConfig {
    /// API key; `None` means every call degrades to the sentinel.
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Vision model identifier.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum attempts under rate limiting.
    pub max_retries: usize,
    /// Directory searched for calibration reference images.
    pub reference_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let window = CaptureWindow::new(6, 19);
        assert!(!window.contains(5));
        assert!(window.contains(6));
        assert!(window.contains(12));
        assert!(window.contains(19));
        assert!(!window.contains(20));
    }

    #[test]
    fn headless_flag_only_disabled_by_explicit_negatives() {
        assert!(!parse_headless("false"));
        assert!(!parse_headless("0"));
        assert!(!parse_headless("No"));
        assert!(!parse_headless(" FALSE "));
        assert!(parse_headless("true"));
        assert!(parse_headless("1"));
        assert!(parse_headless(""));
        assert!(parse_headless("anything"));
    }

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = DataLayout::new("/data");
        assert_eq!(layout.snapshots_dir(), PathBuf::from("/data/snapshots"));
        assert_eq!(
            layout.ledger_path(),
            PathBuf::from("/data/docs/visibility.csv")
        );
        assert_eq!(layout.last7_dir(), PathBuf::from("/data/docs/last7days"));
        assert_eq!(layout.months_path(), PathBuf::from("/data/docs/months.json"));
        assert_eq!(layout.reference_dir(), PathBuf::from("/data/reference"));
    }

    #[test]
    fn controls_reject_garbage_urls() {
        let result = CaptureControls::new(
            "not a url",
            CaptureWindow::default(),
            true,
            DEFAULT_WEBDRIVER_URL.to_string(),
        );
        assert!(result.is_err());
    }
}
