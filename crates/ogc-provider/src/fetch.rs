//! The fetch coordinator: concurrent HTTP dispatch, response
//! classification, retry, and composition into the cached render.
//!
//! Every dispatched request carries opaque [`TileAttributes`] stamped with
//! the generation of the draw call that issued it. Responses are matched
//! by value, not identity: on arrival the coordinator dispatches on the
//! attributes and the current generation, so replies from superseded draw
//! calls are consumed (keeping the connection reusable and the HTTP cache
//! warm) but never composited.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use reqwest::header;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ogc_capabilities::parse_service_exception_report;
use ogc_common::{BoundingBox, OgcError, OgcResult};

use crate::cache::{CacheLoadControl, HttpTileCache};
use crate::render::CachedRender;

/// How long a draw call waits synchronously before returning the partial
/// image and letting the remaining responses land asynchronously.
pub const WMS_THRESHOLD: Duration = Duration::from_millis(200);

/// Default retry cap per logical tile request.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// After this many request errors in a session, further error logs are
/// suppressed.
pub const MAX_LOGGED_ERRORS: u64 = 100;

/// Events surfaced to the provider's consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// A late response refined the cached raster.
    DataChanged,
    /// A progress or error line.
    Status(String),
}

/// Opaque per-request metadata, carried through redirects and retries.
#[derive(Debug, Clone)]
pub struct TileAttributes {
    pub generation: u64,
    pub tile_index: usize,
    pub map_rect: BoundingBox,
    pub retry_count: u32,
}

/// Credentials injected into request headers.
#[derive(Debug, Clone, Default)]
pub struct RequestAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub referer: Option<String>,
}

impl RequestAuth {
    fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_some() || self.password.is_some() {
            request = request.basic_auth(
                self.username.as_deref().unwrap_or(""),
                self.password.as_deref(),
            );
        }
        if let Some(referer) = &self.referer {
            request = request.header(header::REFERER, referer.clone());
        }
        request
    }
}

/// Tracks one draw call's outstanding tile requests.
#[derive(Clone)]
pub struct DrawBatch {
    remaining: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl DrawBatch {
    pub fn outstanding(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}

struct Shared {
    client: reqwest::Client,
    cache: Arc<HttpTileCache>,
    render: Mutex<Option<CachedRender>>,
    generation: AtomicU64,
    errors: AtomicU64,
    /// While set, completions do not emit DataChanged (the draw call is
    /// still pumping synchronously and will return the image itself).
    waiting: AtomicBool,
    events: mpsc::Sender<ProviderEvent>,
    auth: RequestAuth,
    max_retry: u32,
    smooth: bool,
}

enum CompositeOutcome {
    Done,
    Stale,
    Flawed,
}

impl Shared {
    fn send(&self, url: &str) -> reqwest::RequestBuilder {
        self.auth.apply(self.client.get(url))
    }

    /// Coalescing event emission: at most one event is pending between the
    /// coordinator and its consumer; an event that finds the slot full is
    /// dropped.
    fn emit(&self, event: ProviderEvent) {
        let _ = self.events.try_send(event);
    }

    fn count_error(&self) -> u64 {
        let count = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count == MAX_LOGGED_ERRORS {
            warn!("not logging more than {} request errors", MAX_LOGGED_ERRORS);
        }
        count
    }

    fn may_log(&self) -> bool {
        self.errors.load(Ordering::SeqCst) < MAX_LOGGED_ERRORS
    }

    /// Advance the retry counter; `false` means the retry budget is spent
    /// and the request must be dropped.
    fn bump_retry(&self, attrs: &mut TileAttributes, url: &str) -> bool {
        attrs.retry_count += 1;
        if attrs.retry_count > self.max_retry {
            if self.may_log() {
                warn!(
                    max_retry = self.max_retry,
                    tile = attrs.tile_index,
                    generation = attrs.generation,
                    url,
                    "tile request exceeded retry budget"
                );
            }
            return false;
        }
        if self.may_log() {
            info!(
                tile = attrs.tile_index,
                retry = attrs.retry_count,
                generation = attrs.generation,
                "repeating tile request"
            );
        }
        true
    }

    /// Composite a tile body if its generation is still current.
    async fn composite_tile(&self, attrs: &TileAttributes, body: &[u8]) -> CompositeOutcome {
        let mut render = self.render.lock().await;
        let Some(render) = render.as_mut() else {
            return CompositeOutcome::Stale;
        };
        if render.generation != attrs.generation {
            debug!(
                generation = attrs.generation,
                current = render.generation,
                "tile reply too late, discarded"
            );
            return CompositeOutcome::Stale;
        }
        match render.composite_tile(&attrs.map_rect, body, self.smooth) {
            Ok(()) => CompositeOutcome::Done,
            Err(err) => {
                if self.may_log() {
                    warn!(%err, tile = attrs.tile_index, "tile body could not be decoded");
                }
                CompositeOutcome::Flawed
            }
        }
    }

    async fn composite_full(&self, generation: u64, body: &[u8]) -> CompositeOutcome {
        let mut render = self.render.lock().await;
        let Some(render) = render.as_mut() else {
            return CompositeOutcome::Stale;
        };
        if render.generation != generation {
            return CompositeOutcome::Stale;
        }
        match render.composite_full(body) {
            Ok(()) => CompositeOutcome::Done,
            Err(err) => {
                if self.may_log() {
                    warn!(%err, "map body could not be decoded");
                }
                CompositeOutcome::Flawed
            }
        }
    }

    fn notify_data_changed(&self) {
        if !self.waiting.load(Ordering::SeqCst) {
            self.emit(ProviderEvent::DataChanged);
        }
    }
}

/// Dispatches HTTP work and owns the cached render.
pub struct FetchCoordinator {
    shared: Arc<Shared>,
    map_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    tile_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl FetchCoordinator {
    pub fn new(
        cache: Arc<HttpTileCache>,
        auth: RequestAuth,
        smooth: bool,
        max_retry: u32,
    ) -> OgcResult<(Self, mpsc::Receiver<ProviderEvent>)> {
        // redirects are handled by the coordinator so attributes and
        // generation stamps survive the re-issue
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OgcError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let (events, receiver) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            client,
            cache,
            render: Mutex::new(None),
            generation: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            waiting: AtomicBool::new(false),
            events,
            auth,
            max_retry,
            smooth,
        });

        Ok((
            Self {
                shared,
                map_task: std::sync::Mutex::new(None),
                tile_tasks: std::sync::Mutex::new(Vec::new()),
            },
            receiver,
        ))
    }

    pub fn current_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Bump the generation for a draw call that dispatches fresh work.
    pub fn next_generation(&self) -> u64 {
        self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn error_count(&self) -> u64 {
        self.shared.errors.load(Ordering::SeqCst)
    }

    /// Whether the current render already shows exactly this view.
    pub async fn render_matches(&self, extent: &BoundingBox, width: u32, height: u32) -> bool {
        self.shared
            .render
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.matches_view(extent, width, height))
    }

    /// Install a fresh destination raster and cancel the previous
    /// non-tiled map request. Tile requests of earlier generations keep
    /// running (they still populate the HTTP cache); their bodies are
    /// dropped on arrival by the generation check.
    pub async fn begin_render(&self, extent: BoundingBox, width: u32, height: u32, generation: u64) {
        if let Some(task) = self.map_task.lock().unwrap().take() {
            task.abort();
        }
        *self.shared.render.lock().await = Some(CachedRender::new(extent, width, height, generation));
    }

    /// A copy of the cached raster as it currently stands.
    pub async fn snapshot(&self) -> Option<RgbaImage> {
        self.shared
            .render
            .lock()
            .await
            .as_ref()
            .map(|r| r.image.clone())
    }

    /// Dispatch one generation's tile requests concurrently.
    pub fn dispatch_tiles(&self, requests: Vec<(String, TileAttributes)>) -> DrawBatch {
        let batch = DrawBatch {
            remaining: Arc::new(AtomicUsize::new(requests.len())),
            notify: Arc::new(Notify::new()),
        };

        let mut tasks = self.tile_tasks.lock().unwrap();
        tasks.retain(|t| !t.is_finished());

        for (url, attrs) in requests {
            let shared = Arc::clone(&self.shared);
            let remaining = Arc::clone(&batch.remaining);
            let notify = Arc::clone(&batch.notify);
            tasks.push(tokio::spawn(async move {
                run_tile_request(&shared, url, attrs).await;
                remaining.fetch_sub(1, Ordering::SeqCst);
                notify.notify_waiters();
                shared.notify_data_changed();
            }));
        }

        batch
    }

    /// Dispatch a non-tiled GetMap request for `generation`.
    pub fn dispatch_map(&self, url: String, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            run_map_request(&shared, url, generation).await;
            shared.notify_data_changed();
        });
        if let Some(previous) = self.map_task.lock().unwrap().replace(task) {
            previous.abort();
        }
    }

    /// Pump the batch for up to [`WMS_THRESHOLD`], then return; whatever
    /// has not arrived keeps completing asynchronously and emits
    /// [`ProviderEvent::DataChanged`].
    pub async fn wait_for_batch(&self, batch: &DrawBatch, threshold: Duration) {
        self.shared.waiting.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + threshold;
        while batch.remaining.load(Ordering::SeqCst) > 0 {
            if tokio::time::timeout_at(deadline, batch.notify.notified())
                .await
                .is_err()
            {
                break;
            }
        }
        self.shared.waiting.store(false, Ordering::SeqCst);
    }

    /// Wait for the current non-tiled map request with the same threshold
    /// semantics as [`wait_for_batch`].
    pub async fn wait_for_map(&self, threshold: Duration) {
        self.shared.waiting.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + threshold;
        loop {
            let finished = self
                .map_task
                .lock()
                .unwrap()
                .as_ref()
                .map(|t| t.is_finished())
                .unwrap_or(true);
            if finished || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.shared.waiting.store(false, Ordering::SeqCst);
    }

    /// Retrieve a capabilities document: always from the network, stored
    /// into the shared cache afterwards.
    pub async fn fetch_capabilities(&self, url: &str) -> OgcResult<Bytes> {
        let (_, body) = self.fetch_raw(url, CacheLoadControl::PreferNetwork).await?;
        if body.is_empty() {
            return Err(OgcError::Capabilities(format!(
                "empty capabilities document received from {}",
                url
            )));
        }
        Ok(body)
    }

    /// One-shot fetch with manual redirect handling, used for
    /// capabilities, identify, and legend requests.
    pub async fn fetch_raw(
        &self,
        url: &str,
        load: CacheLoadControl,
    ) -> OgcResult<(String, Bytes)> {
        if load == CacheLoadControl::PreferCache {
            if let Some(hit) = self.shared.cache.get(url).await {
                return Ok((hit.content_type, hit.body));
            }
        }

        let mut current = url.to_string();
        let mut previous: Option<String> = None;

        loop {
            let response = self
                .shared
                .send(&current)
                .send()
                .await
                .map_err(|e| OgcError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_redirection() {
                let target = redirect_target(&response, &current).ok_or_else(|| {
                    OgcError::Transport(format!("redirect from {} without location", current))
                })?;
                if previous.as_deref() == Some(target.as_str()) || target == current {
                    return Err(OgcError::Transport(format!(
                        "redirect loop detected: {}",
                        target
                    )));
                }
                previous = Some(std::mem::replace(&mut current, target));
                continue;
            }

            if status.as_u16() >= 400 {
                return Err(OgcError::HttpStatus {
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or("").to_string(),
                });
            }

            let content_type = mime_of(&response);
            let cache_control = header_string(&response, header::CACHE_CONTROL);
            let expires = expires_of(&response);
            let body = response
                .bytes()
                .await
                .map_err(|e| OgcError::Transport(e.to_string()))?;

            self.shared
                .cache
                .store(url, body.clone(), &content_type, cache_control.as_deref(), expires)
                .await;

            return Ok((content_type, body));
        }
    }

    /// Abort everything in flight. Called on teardown.
    pub async fn shutdown(&self) {
        if let Some(task) = self.map_task.lock().unwrap().take() {
            task.abort();
        }
        for task in self.tile_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        *self.shared.render.lock().await = None;
    }
}

/// One logical tile request: cache probe, then network with redirect,
/// retry, and classification, ending in composition or a drop.
async fn run_tile_request(shared: &Shared, mut url: String, mut attrs: TileAttributes) {
    // tiles prefer the cache
    if let Some(hit) = shared.cache.get(&url).await {
        if is_image_content(&hit.content_type) {
            match shared.composite_tile(&attrs, &hit.body).await {
                CompositeOutcome::Done | CompositeOutcome::Stale => return,
                // a rotten cache entry falls through to the network
                CompositeOutcome::Flawed => {}
            }
        }
    }

    let mut previous: Option<String> = None;

    loop {
        let response = match shared.send(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                shared.count_error();
                if shared.may_log() {
                    warn!(%err, url = %url, "tile request failed");
                }
                if !shared.bump_retry(&mut attrs, &url) {
                    return;
                }
                continue;
            }
        };

        let status = response.status();

        if status.is_redirection() {
            let Some(target) = redirect_target(&response, &url) else {
                if shared.may_log() {
                    warn!(url = %url, "redirect without location header");
                }
                return;
            };
            if previous.as_deref() == Some(target.as_str()) || target == url {
                if shared.may_log() {
                    warn!(url = %target, "redirect loop detected");
                }
                return;
            }
            debug!(from = %url, to = %target, "redirected tile request");
            previous = Some(std::mem::replace(&mut url, target));
            // a redirect restarts the retry budget but keeps the stamp
            attrs.retry_count = 0;
            continue;
        }

        if status.as_u16() >= 400 {
            shared.count_error();
            if shared.may_log() {
                warn!(status = status.as_u16(), url = %url, "tile request error");
            }
            shared.emit(ProviderEvent::Status(format!(
                "Tile request error: status {} for {}",
                status, url
            )));
            return;
        }

        let content_type = mime_of(&response);
        let cache_control = header_string(&response, header::CACHE_CONTROL);
        let expires = expires_of(&response);

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                shared.count_error();
                if shared.may_log() {
                    warn!(%err, url = %url, "tile body read failed");
                }
                if !shared.bump_retry(&mut attrs, &url) {
                    return;
                }
                continue;
            }
        };

        if is_image_content(&content_type) {
            shared
                .cache
                .store(&url, body.clone(), &content_type, cache_control.as_deref(), expires)
                .await;

            match shared.composite_tile(&attrs, &body).await {
                CompositeOutcome::Done | CompositeOutcome::Stale => return,
                CompositeOutcome::Flawed => {
                    shared.count_error();
                    if !shared.bump_retry(&mut attrs, &url) {
                        return;
                    }
                    continue;
                }
            }
        }

        if content_type.eq_ignore_ascii_case("text/xml") {
            match parse_service_exception_report(&body) {
                Ok(exceptions) => {
                    for exception in exceptions {
                        let error = exception.into_error();
                        if shared.may_log() {
                            warn!(%error, url = %url, "tile request rejected by server");
                        }
                        shared.emit(ProviderEvent::Status(error.to_string()));
                    }
                }
                Err(_) => {
                    if shared.may_log() {
                        warn!(
                            content_type = %content_type,
                            length = body.len(),
                            url = %url,
                            "tile request returned unrecognised XML"
                        );
                    }
                }
            }
            return;
        }

        if shared.may_log() {
            warn!(
                content_type = %content_type,
                length = body.len(),
                url = %url,
                "tile request returned unexpected content"
            );
        }
        return;
    }
}

/// The non-tiled GetMap request: no retry, aborted outright by the next
/// draw call.
async fn run_map_request(shared: &Shared, url: String, generation: u64) {
    let mut current = url;
    let mut previous: Option<String> = None;

    loop {
        let response = match shared.send(&current).send().await {
            Ok(response) => response,
            Err(err) => {
                let count = shared.count_error();
                if count < MAX_LOGGED_ERRORS {
                    warn!(%err, url = %current, "map request failed");
                }
                return;
            }
        };

        let status = response.status();
        if status.is_redirection() {
            let Some(target) = redirect_target(&response, &current) else {
                return;
            };
            if previous.as_deref() == Some(target.as_str()) || target == current {
                if shared.may_log() {
                    warn!(url = %target, "redirect loop detected");
                }
                return;
            }
            debug!(from = %current, to = %target, "redirected map request");
            previous = Some(std::mem::replace(&mut current, target));
            continue;
        }

        if status.as_u16() >= 400 {
            shared.count_error();
            if shared.may_log() {
                warn!(status = status.as_u16(), url = %current, "map request error");
            }
            shared.emit(ProviderEvent::Status(format!(
                "Map request error: status {} for {}",
                status, current
            )));
            return;
        }

        let content_type = mime_of(&response);
        let cache_control = header_string(&response, header::CACHE_CONTROL);
        let expires = expires_of(&response);
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                shared.count_error();
                if shared.may_log() {
                    warn!(%err, url = %current, "map body read failed");
                }
                return;
            }
        };

        if is_image_content(&content_type) {
            shared
                .cache
                .store(&current, body.clone(), &content_type, cache_control.as_deref(), expires)
                .await;
            match shared.composite_full(generation, &body).await {
                CompositeOutcome::Done | CompositeOutcome::Stale => {}
                CompositeOutcome::Flawed => {
                    shared.count_error();
                }
            }
            return;
        }

        if content_type.eq_ignore_ascii_case("text/xml") {
            match parse_service_exception_report(&body) {
                Ok(exceptions) => {
                    for exception in exceptions {
                        let error = exception.into_error();
                        if shared.may_log() {
                            warn!(%error, url = %current, "map request rejected by server");
                        }
                        shared.emit(ProviderEvent::Status(error.to_string()));
                    }
                }
                Err(_) => {
                    if shared.may_log() {
                        warn!(
                            content_type = %content_type,
                            url = %current,
                            "map request returned unrecognised XML"
                        );
                    }
                }
            }
            return;
        }

        if shared.may_log() {
            warn!(content_type = %content_type, url = %current, "map request returned unexpected content");
        }
        return;
    }
}

fn is_image_content(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with("image/") || lower == "application/octet-stream"
}

/// The media type of a response, without parameters.
fn mime_of(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
        .unwrap_or_default()
}

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn expires_of(response: &reqwest::Response) -> Option<DateTime<Utc>> {
    header_string(response, header::EXPIRES)
        .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Absolute redirect target, resolving relative Location headers against
/// the request URL.
fn redirect_target(response: &reqwest::Response, base: &str) -> Option<String> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())?;
    match url::Url::parse(base) {
        Ok(base_url) => base_url
            .join(location)
            .map(|u| u.to_string())
            .ok()
            .or_else(|| Some(location.to_string())),
        Err(_) => Some(location.to_string()),
    }
}
