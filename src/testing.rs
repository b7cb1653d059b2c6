//! Test doubles shared by the unit tests.

use crate::auth::{Clock, Credential, CredentialManager, IdentityProvider};
use crate::billing::{CheckoutCustomer, CheckoutItem, CheckoutWidget};
use crate::config::{AuthConfig, ClientConfig};
use crate::gateway::{
    ChunkSource, HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestGateway,
    StreamResponse,
};
use crate::util::lock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_BASE_URL: &str = "http://api.test";

pub fn test_config() -> ClientConfig {
    ClientConfig {
        api_base_url: TEST_BASE_URL.to_string(),
        ..ClientConfig::default()
    }
}

/// 2026-01-01T00:00:00Z
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: chrono::Duration) {
        *lock(&self.now) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ---------------------------------------------------------------------------
// Identity provider
// ---------------------------------------------------------------------------

/// One queued provider answer, returned after `delay`.
pub struct ScriptedAnswer {
    pub delay: Duration,
    pub result: Result<Option<Credential>, String>,
}

struct ProviderState {
    signed_in: bool,
    offline: bool,
    current: Option<Credential>,
    minted: u32,
    scripted: VecDeque<ScriptedAnswer>,
}

/// Provider that mints `token-N` credentials valid for `lifetime` from the
/// manual clock's current time.
pub struct MockIdentityProvider {
    clock: Arc<ManualClock>,
    lifetime: chrono::Duration,
    state: Mutex<ProviderState>,
    calls: AtomicUsize,
    forced_calls: AtomicUsize,
}

impl MockIdentityProvider {
    pub fn new(clock: Arc<ManualClock>, lifetime: chrono::Duration) -> Arc<Self> {
        Arc::new(Self {
            clock,
            lifetime,
            state: Mutex::new(ProviderState {
                signed_in: true,
                offline: false,
                current: None,
                minted: 0,
                scripted: VecDeque::new(),
            }),
            calls: AtomicUsize::new(0),
            forced_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    pub fn set_signed_in(&self, signed_in: bool) {
        lock(&self.state).signed_in = signed_in;
    }

    /// Replaces the provider's own cached token.
    pub fn set_current(&self, credential: Credential) {
        lock(&self.state).current = Some(credential);
    }

    pub fn push_answer(&self, delay: Duration, result: Result<Option<Credential>, String>) {
        lock(&self.state)
            .scripted
            .push_back(ScriptedAnswer { delay, result });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn forced_calls(&self) -> usize {
        self.forced_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn id_token_result(&self, force_refresh: bool) -> anyhow::Result<Option<Credential>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if force_refresh {
            self.forced_calls.fetch_add(1, Ordering::SeqCst);
        }

        let scripted = lock(&self.state).scripted.pop_front();
        if let Some(answer) = scripted {
            tokio::time::sleep(answer.delay).await;
            return answer.result.map_err(anyhow::Error::msg);
        }

        let mut state = lock(&self.state);
        if state.offline {
            anyhow::bail!("identity provider unreachable");
        }
        if !state.signed_in {
            return Ok(None);
        }

        let now = self.clock.now();
        let stale = state.current.as_ref().is_none_or(|c| c.is_expired_at(now));
        if force_refresh || stale {
            state.minted += 1;
            let token = format!("token-{}", state.minted);
            state.current = Some(Credential::new(token, now + self.lifetime));
        }
        Ok(state.current.clone())
    }
}

pub fn credential_manager(
    provider: Arc<MockIdentityProvider>,
    clock: Arc<ManualClock>,
) -> CredentialManager {
    CredentialManager::new(provider, clock, AuthConfig::default())
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockReply {
    Json(u16, Value),
    Raw(u16, &'static str, Vec<u8>),
    NetworkError,
}

#[derive(Debug, Clone)]
pub enum ChunkStep {
    Data(Vec<u8>),
    Error(String),
    /// Never resolves, like an idle open connection.
    Hang,
}

#[derive(Debug, Clone)]
pub enum MockStream {
    Open { status: u16, steps: Vec<ChunkStep> },
    NetworkError,
}

struct Route {
    method: HttpMethod,
    path: String,
    replies: VecDeque<MockReply>,
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    streams: Mutex<VecDeque<MockStream>>,
    requests: Mutex<Vec<HttpRequest>>,
    stream_close_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers replies for a route. The last reply repeats.
    pub fn on(&self, method: HttpMethod, path: &str, replies: Vec<MockReply>) {
        lock(&self.routes).push(Route {
            method,
            path: path.to_string(),
            replies: replies.into(),
        });
    }

    pub fn on_json(&self, method: HttpMethod, path: &str, status: u16, body: Value) {
        self.on(method, path, vec![MockReply::Json(status, body)]);
    }

    pub fn push_stream(&self, stream: MockStream) {
        lock(&self.streams).push_back(stream);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Requests whose path (query excluded) equals `path`.
    pub fn count(&self, path: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| path_of(&r.url).split('?').next() == Some(path))
            .count()
    }

    /// One flag per opened stream, set once it is closed.
    pub fn stream_close_flags(&self) -> Vec<Arc<AtomicBool>> {
        lock(&self.stream_close_flags).clone()
    }
}

fn path_of(url: &str) -> &str {
    url.strip_prefix(TEST_BASE_URL).unwrap_or(url)
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        let path = path_of(&request.url).to_string();
        let method = request.method;
        lock(&self.requests).push(request);

        let reply = {
            let mut routes = lock(&self.routes);
            let route = routes.iter_mut().find(|r| {
                r.method == method && (r.path == path || path.split('?').next() == Some(r.path.as_str()))
            });
            match route {
                Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
                Some(route) => route.replies.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(MockReply::Json(status, body)) => Ok(HttpResponse {
                status,
                status_text: String::new(),
                body: serde_json::to_vec(&body)?,
            }),
            Some(MockReply::Raw(status, status_text, body)) => Ok(HttpResponse {
                status,
                status_text: status_text.to_string(),
                body,
            }),
            Some(MockReply::NetworkError) => anyhow::bail!("connection refused"),
            None => Ok(HttpResponse {
                status: 404,
                status_text: "Not Found".to_string(),
                body: Vec::new(),
            }),
        }
    }

    async fn open_stream(&self, request: HttpRequest) -> anyhow::Result<StreamResponse> {
        lock(&self.requests).push(request);
        let stream = lock(&self.streams).pop_front();
        match stream {
            Some(MockStream::Open { status, steps }) => {
                let chunks = ScriptedChunks::new(steps);
                lock(&self.stream_close_flags).push(chunks.close_flag());
                Ok(StreamResponse {
                    status,
                    status_text: String::new(),
                    chunks: Box::new(chunks),
                })
            }
            Some(MockStream::NetworkError) | None => anyhow::bail!("connection refused"),
        }
    }
}

/// Chunk source replaying a fixed script.
pub struct ScriptedChunks {
    steps: VecDeque<ChunkStep>,
    closed: Arc<AtomicBool>,
}

impl ScriptedChunks {
    pub fn new(steps: Vec<ChunkStep>) -> Self {
        Self {
            steps: steps.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn close_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl ChunkSource for ScriptedChunks {
    async fn next_chunk(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.steps.pop_front() {
            Some(ChunkStep::Data(bytes)) => Ok(Some(bytes)),
            Some(ChunkStep::Error(message)) => Err(anyhow::Error::msg(message)),
            Some(ChunkStep::Hang) => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Gateway over a mock transport with a signed-in mock provider.
pub fn mock_gateway(transport: Arc<MockTransport>) -> Arc<RequestGateway> {
    let clock = ManualClock::new(start_time());
    let provider = MockIdentityProvider::new(Arc::clone(&clock), chrono::Duration::hours(1));
    let credentials = Arc::new(credential_manager(provider, clock));
    Arc::new(RequestGateway::new(TEST_BASE_URL, transport, credentials))
}

// ---------------------------------------------------------------------------
// Checkout widget
// ---------------------------------------------------------------------------

pub struct OpenedOverlay {
    pub items: Vec<CheckoutItem>,
    pub customer: CheckoutCustomer,
    pub metadata: Map<String, Value>,
}

#[derive(Default)]
pub struct MockWidget {
    fail_init: AtomicBool,
    fail_open: AtomicBool,
    init_calls: AtomicUsize,
    opened: Mutex<Vec<OpenedOverlay>>,
}

impl MockWidget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn opened_count(&self) -> usize {
        lock(&self.opened).len()
    }

    pub fn last_opened<R>(&self, f: impl FnOnce(&OpenedOverlay) -> R) -> Option<R> {
        lock(&self.opened).last().map(f)
    }
}

#[async_trait]
impl CheckoutWidget for MockWidget {
    async fn load_and_initialize(&self) -> anyhow::Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            anyhow::bail!("script failed to load");
        }
        Ok(())
    }

    async fn open_checkout_overlay(
        &self,
        items: Vec<CheckoutItem>,
        customer: CheckoutCustomer,
        metadata: Map<String, Value>,
    ) -> anyhow::Result<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            anyhow::bail!("overlay blocked");
        }
        lock(&self.opened).push(OpenedOverlay {
            items,
            customer,
            metadata,
        });
        Ok(())
    }
}
