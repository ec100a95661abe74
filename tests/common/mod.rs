//! Shared fixtures: a scripted browser and image bytes for mock servers.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use country_image_harvester::browser::{BrowserLauncher, BrowserSession};
use country_image_harvester::models::{BrowserEngine, SessionConfig};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type MarkupFn = dyn Fn(&str) -> String + Send + Sync;

/// Counters shared between a [`FakeLauncher`] and the sessions it creates.
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub launch_attempts: AtomicU32,
    pub launched: AtomicU32,
    pub closed: AtomicU32,
    pub navigations: AtomicU32,
    pub clicks: AtomicU32,
    pub scrolls: AtomicU32,
}

impl BrowserLog {
    pub fn launch_attempts(&self) -> u32 {
        self.launch_attempts.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> u32 {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> u32 {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn clicks(&self) -> u32 {
        self.clicks.load(Ordering::SeqCst)
    }

    pub fn scrolls(&self) -> u32 {
        self.scrolls.load(Ordering::SeqCst)
    }
}

/// Side length the preview panel reports for every full-size image.
pub const PREVIEW_SIZE: u32 = 1600;

/// Scripted answers for the page's interactive parts.
#[derive(Debug, Default, Clone)]
struct Dom {
    /// Full-size image shown after clicking the thumbnail at each index.
    previews: Vec<String>,
    /// Document height reported by successive "load more" scrolls. The last
    /// value repeats once the list runs out.
    scroll_heights: Vec<u64>,
}

/// Launcher whose pages render caller-supplied markup for each URL.
pub struct FakeLauncher {
    log: Arc<BrowserLog>,
    failures_left: AtomicU32,
    crashes_left: Arc<AtomicU32>,
    hangs_left: Arc<AtomicU32>,
    markup: Arc<MarkupFn>,
    dom: Arc<Dom>,
}

impl FakeLauncher {
    pub fn new(markup: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            log: Arc::default(),
            failures_left: AtomicU32::new(0),
            crashes_left: Arc::default(),
            hangs_left: Arc::default(),
            markup: Arc::new(markup),
            dom: Arc::default(),
        }
    }

    /// Clicking thumbnail `i` opens a preview of `urls[i]`; there are only
    /// `urls.len()` clickable thumbnails.
    pub fn with_previews(mut self, urls: Vec<String>) -> Self {
        Arc::make_mut(&mut self.dom).previews = urls;
        self
    }

    /// Heights reported by successive "load more" scrolls.
    pub fn with_scroll_heights(mut self, heights: Vec<u64>) -> Self {
        Arc::make_mut(&mut self.dom).scroll_heights = heights;
        self
    }

    /// Make the next `count` navigations fail as if the browser died.
    pub fn crashing_first(self, count: u32) -> Self {
        self.crashes_left.store(count, Ordering::SeqCst);
        self
    }

    /// Make the next `count` navigations never finish.
    pub fn hanging_first(self, count: u32) -> Self {
        self.hangs_left.store(count, Ordering::SeqCst);
        self
    }

    /// Make the next `count` launches fail.
    pub fn failing_first(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn log(&self) -> Arc<BrowserLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    fn engine(&self) -> BrowserEngine {
        BrowserEngine::Chromium
    }

    async fn launch(&self, _config: &SessionConfig) -> Result<Box<dyn BrowserSession>> {
        self.log.launch_attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures_left) {
            bail!("browser binary not found");
        }
        self.log.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            log: Arc::clone(&self.log),
            crashes_left: Arc::clone(&self.crashes_left),
            hangs_left: Arc::clone(&self.hangs_left),
            markup: Arc::clone(&self.markup),
            dom: Arc::clone(&self.dom),
            open_preview: AtomicUsize::new(NO_PREVIEW),
            scroll_calls: AtomicUsize::new(0),
            url: None,
            closed: false,
        }))
    }
}

struct FakeSession {
    log: Arc<BrowserLog>,
    crashes_left: Arc<AtomicU32>,
    hangs_left: Arc<AtomicU32>,
    markup: Arc<MarkupFn>,
    dom: Arc<Dom>,
    open_preview: AtomicUsize,
    scroll_calls: AtomicUsize,
    url: Option<String>,
    closed: bool,
}

const NO_PREVIEW: usize = usize::MAX;

/// Index in a `thumbs[<n>]` expression of a click script.
fn clicked_index(script: &str) -> Option<usize> {
    let rest = &script[script.find("thumbs[")? + "thumbs[".len()..];
    rest[..rest.find(']')?].parse().ok()
}

impl FakeSession {
    fn click(&self, index: usize) -> Value {
        if index >= self.dom.previews.len() {
            return Value::Bool(false);
        }
        self.log.clicks.fetch_add(1, Ordering::SeqCst);
        self.open_preview.store(index, Ordering::SeqCst);
        Value::Bool(true)
    }

    fn preview(&self) -> Value {
        match self.dom.previews.get(self.open_preview.load(Ordering::SeqCst)) {
            Some(src) => json!([{ "src": src, "width": PREVIEW_SIZE, "height": PREVIEW_SIZE }]),
            None => json!([]),
        }
    }

    fn load_more(&self) -> Value {
        self.log.scrolls.fetch_add(1, Ordering::SeqCst);
        let call = self.scroll_calls.fetch_add(1, Ordering::SeqCst);
        let heights = &self.dom.scroll_heights;
        let height = heights
            .get(call)
            .or_else(|| heights.last())
            .copied()
            .unwrap_or(1000);
        json!(height)
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.log.navigations.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.crashes_left) {
            bail!("target closed");
        }
        if take_one(&self.hangs_left) {
            std::future::pending::<()>().await;
        }
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn markup(&self) -> Result<String> {
        match &self.url {
            Some(url) => Ok((self.markup)(url)),
            None => bail!("no page loaded"),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        if script.contains("querySelector('img')") {
            return Ok(Value::Bool(true));
        }
        if let Some(index) = clicked_index(script) {
            return Ok(self.click(index));
        }
        if script.contains("naturalWidth") {
            return Ok(self.preview());
        }
        if script.contains("mye4qd") {
            return Ok(self.load_more());
        }
        if script.contains("Close") {
            self.open_preview.store(NO_PREVIEW, Ordering::SeqCst);
        }
        Ok(Value::Null)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A PNG of the given size whose content varies with `seed`.
pub fn png_bytes(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        let v = match seed % 4 {
            0 => x * 255 / width,
            1 => y * 255 / height,
            2 => 255 - x * 255 / width,
            _ => 255 - y * 255 / height,
        } as u8;
        Rgb([v, v.wrapping_add(seed as u8), v])
    }));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// Serve `bytes` as a PNG at `route`.
pub async fn mount_png(server: &MockServer, route: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(bytes),
        )
        .mount(server)
        .await;
}

/// Results-grid markup listing `urls` as thumbnails.
pub fn results_page(urls: &[String]) -> String {
    let images: String = urls
        .iter()
        .map(|url| format!(r#"<img class="rg_i Q4LuWd" src="{url}" width="640" height="480">"#))
        .collect();
    format!("<html><body><div id=\"islrg\">{images}</div></body></html>")
}
