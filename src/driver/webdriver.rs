//! WebDriver-backed page session bridging `thirtyfour` to the sync chain.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thirtyfour::prelude::*;
use tokio::runtime::{Builder, Runtime};

use crate::capture::{PageSession, SessionError};

/// Browser window size requested at session start.
pub const DEFAULT_WINDOW: (u32, u32) = (1920, 1080);

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const SCROLL_SETTLE: Duration = Duration::from_millis(300);

/// A live Chrome session driven over the WebDriver protocol.
///
/// Owns a current-thread tokio runtime so the capture chain and the binaries
/// stay synchronous; every trait method blocks on the underlying async call.
pub struct WebDriverSession {
    rt: Runtime,
    driver: Option<WebDriver>,
}

impl WebDriverSession {
    /// Opens a new session against a WebDriver endpoint (e.g. chromedriver).
    pub fn connect(server_url: &str, headless: bool) -> Result<Self> {
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build driver runtime")?;
        let driver = rt
            .block_on(async {
                let mut caps = DesiredCapabilities::chrome();
                if headless {
                    caps.add_arg("--headless=new")?;
                }
                caps.add_arg(&format!(
                    "--window-size={},{}",
                    DEFAULT_WINDOW.0, DEFAULT_WINDOW.1
                ))?;
                caps.add_arg("--no-sandbox")?;
                caps.add_arg("--disable-gpu")?;
                caps.add_arg("--disable-dev-shm-usage")?;
                caps.add_arg("--hide-scrollbars")?;
                WebDriver::new(server_url, caps).await
            })
            .with_context(|| format!("failed to open WebDriver session at {server_url}"))?;
        Ok(Self {
            rt,
            driver: Some(driver),
        })
    }

    /// Closes the browser session; failures are reported but not raised.
    pub fn quit(mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(err) = self.rt.block_on(driver.quit()) {
                eprintln!("failed to close WebDriver session: {err}");
            }
        }
    }

    fn driver(&self) -> &WebDriver {
        self.driver.as_ref().expect("webdriver session already closed")
    }
}

impl PageSession for WebDriverSession {
    fn goto(&mut self, url: &str, ready_timeout: Duration) -> Result<(), SessionError> {
        let driver = self.driver();
        self.rt.block_on(async {
            driver.goto(url).await.map_err(lost)?;
            let deadline = Instant::now() + ready_timeout;
            loop {
                let state: String = driver
                    .execute("return document.readyState;", Vec::new())
                    .await
                    .map_err(lost)?
                    .convert()
                    .map_err(lost)?;
                if state == "complete" {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(SessionError::lost("page never reached readyState complete"));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
    }

    fn screenshot_video(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, SessionError> {
        let driver = self.driver();
        self.rt.block_on(async {
            let deadline = Instant::now() + wait;
            let video = loop {
                match driver.find_all(By::Tag("video")).await {
                    Ok(mut found) if !found.is_empty() => break found.remove(0),
                    // Probe errors inside the wait loop get the benefit of the
                    // doubt until the deadline passes.
                    Ok(_) | Err(_) => {}
                }
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            };
            if let Err(err) = video.scroll_into_view().await {
                crate::debug_log!("scroll into view failed: {err}");
            }
            tokio::time::sleep(SCROLL_SETTLE).await;
            match video.screenshot_as_png().await {
                Ok(png) => Ok(Some(png)),
                Err(err) => {
                    crate::debug_log!("video screenshot failed: {err}");
                    Ok(None)
                }
            }
        })
    }

    fn iframe_count(&mut self) -> Result<usize, SessionError> {
        let driver = self.driver();
        self.rt
            .block_on(driver.find_all(By::Tag("iframe")))
            .map(|frames| frames.len())
            .map_err(soft)
    }

    fn enter_iframe(&mut self, index: usize) -> Result<(), SessionError> {
        let driver = self.driver();
        self.rt.block_on(async {
            let mut frames = driver.find_all(By::Tag("iframe")).await.map_err(soft)?;
            if index >= frames.len() {
                return Err(SessionError::interaction(format!(
                    "iframe {index} disappeared"
                )));
            }
            frames.remove(index).enter_frame().await.map_err(soft)
        })
    }

    fn leave_iframes(&mut self) -> Result<(), SessionError> {
        let driver = self.driver();
        self.rt.block_on(driver.enter_default_frame()).map_err(lost)
    }

    fn page_height(&mut self) -> Result<u32, SessionError> {
        let driver = self.driver();
        let height: f64 = self
            .rt
            .block_on(driver.execute(
                "return Math.max(document.body.scrollHeight, document.documentElement.scrollHeight);",
                Vec::new(),
            ))
            .map_err(soft)?
            .convert()
            .map_err(soft)?;
        Ok(height.max(0.0) as u32)
    }

    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<(), SessionError> {
        let driver = self.driver();
        self.rt
            .block_on(driver.set_window_rect(0, 0, width, height))
            .map_err(soft)
    }

    fn screenshot_page(&mut self) -> Result<Vec<u8>, SessionError> {
        let driver = self.driver();
        self.rt.block_on(driver.screenshot_as_png()).map_err(lost)
    }
}

fn lost<E: fmt::Display>(err: E) -> SessionError {
    SessionError::lost(err.to_string())
}

fn soft<E: fmt::Display>(err: E) -> SessionError {
    SessionError::interaction(err.to_string())
}
