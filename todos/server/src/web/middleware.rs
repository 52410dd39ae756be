use axum::http::{HeaderMap, Method, Request};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

const STATIC_EXTENSIONS: [&str; 9] = [
    ".ico", ".png", ".jpg", ".jpeg", ".svg", ".gif", ".webp", ".css", ".js",
];

/// Per-IP request counts for one tracking window.
#[derive(Debug)]
struct Visitor {
    last_seen: Instant,
    pages: HashMap<String, u64>,
    total: u64,
}

impl Visitor {
    fn new(now: Instant) -> Self {
        Self {
            last_seen: now,
            pages: HashMap::new(),
            total: 0,
        }
    }
}

/// Counts recorded for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitCount {
    /// Requests from this IP to this path
    pub page: u64,
    /// Requests from this IP to any path
    pub total: u64,
}

impl VisitCount {
    pub fn is_new_visitor(&self) -> bool {
        self.total == 1
    }
}

/// In-memory visit counter keyed by client IP.
///
/// Memory is bounded two ways: visitors idle longer than `window` are
/// forgotten, and at most `max_visitors` IPs are tracked at once (the least
/// recently seen one is dropped to make room).
#[derive(Debug)]
pub struct VisitTracker {
    visitors: DashMap<String, Visitor>,
    window: Duration,
    max_visitors: usize,
}

impl VisitTracker {
    pub fn new(window: Duration, max_visitors: usize) -> Self {
        Self {
            visitors: DashMap::new(),
            window,
            max_visitors: max_visitors.max(1),
        }
    }

    /// Records a request and returns the updated counts.
    pub fn record(&self, ip: &str, path: &str) -> VisitCount {
        self.record_at(ip, path, Instant::now())
    }

    fn record_at(&self, ip: &str, path: &str, now: Instant) -> VisitCount {
        if !self.visitors.contains_key(ip) && self.visitors.len() >= self.max_visitors {
            self.evict_least_recent();
        }

        let mut visitor = self
            .visitors
            .entry(ip.to_string())
            .or_insert_with(|| Visitor::new(now));
        if now.duration_since(visitor.last_seen) > self.window {
            *visitor = Visitor::new(now);
        }
        visitor.last_seen = now;
        visitor.total += 1;
        let page = {
            let page = visitor.pages.entry(path.to_string()).or_insert(0);
            *page += 1;
            *page
        };

        VisitCount {
            page,
            total: visitor.total,
        }
    }

    /// Drops visitors idle longer than the window.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let window = self.window;
        self.visitors
            .retain(|_, visitor| now.duration_since(visitor.last_seen) <= window);
    }

    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .visitors
            .iter()
            .min_by_key(|entry| entry.value().last_seen)
            .map(|entry| entry.key().clone());
        if let Some(ip) = oldest {
            self.visitors.remove(&ip);
        }
    }

    /// Spawns a task sweeping expired visitors once per window. The task ends
    /// when the tracker is dropped.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let period = self.window.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                tracker.sweep();
            }
        })
    }
}

/// Client IP from proxy headers, or `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };
    forwarded
        .or_else(real_ip)
        .unwrap_or("unknown")
        .to_string()
}

/// Browser family guessed from the `User-Agent` header.
pub fn browser_family(headers: &HeaderMap) -> &'static str {
    let user_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if user_agent.contains("Edg/") || user_agent.contains("Edge/") {
        "Edge"
    } else if user_agent.contains("Chrome") {
        "Chrome"
    } else if user_agent.contains("Firefox") {
        "Firefox"
    } else if user_agent.contains("Safari") {
        "Safari"
    } else {
        "Browser"
    }
}

pub fn action_for(method: &Method) -> &'static str {
    match *method {
        Method::GET => "READ",
        Method::POST => "CREATE",
        Method::PUT | Method::PATCH => "UPDATE",
        Method::DELETE => "DELETE",
        _ => "ACTION",
    }
}

/// Static assets and framework internals are neither counted nor logged.
pub fn is_tracked_path(path: &str) -> bool {
    let lowercase = path.to_ascii_lowercase();
    !lowercase.starts_with("/_next")
        && !lowercase.starts_with("/static/")
        && !STATIC_EXTENSIONS
            .iter()
            .any(|extension| lowercase.ends_with(extension))
}

/// Layer that writes one access log line per request and counts visits.
#[derive(Clone)]
pub struct AccessLogLayer {
    tracker: Arc<VisitTracker>,
}

impl AccessLogLayer {
    pub fn new(tracker: Arc<VisitTracker>) -> Self {
        Self { tracker }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            tracker: self.tracker.clone(),
        }
    }
}

/// Service that records the visit before handing the request on.
#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    tracker: Arc<VisitTracker>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AccessLogService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let path = request.uri().path();
        if is_tracked_path(path) {
            let headers = request.headers();
            let ip = client_ip(headers);
            let count = self.tracker.record(&ip, path);
            let badge = if count.is_new_visitor() { "NEW" } else { "RETURNING" };
            tracing::info!(
                target: "access",
                "[{}] {} | {} | {} {} | IP: {} | {} | {}x page, {}x total",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                badge,
                action_for(request.method()),
                request.method(),
                path,
                ip,
                browser_family(headers),
                count.page,
                count.total
            );
        }
        self.inner.call(request)
    }
}
