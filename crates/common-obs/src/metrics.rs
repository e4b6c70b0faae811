use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use once_cell::sync::{Lazy, OnceCell};

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];

const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_SHA: &str = match option_env!("BUILD_SHA") {
    Some(value) => value,
    None => "dev",
};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);
static SERVICE_NAME: OnceCell<&'static str> = OnceCell::new();
static PROCESS_START: OnceCell<Instant> = OnceCell::new();

static BUILD_INFO: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge(
        "build_info",
        "Build metadata for the running service",
        &["service", "version", "build_sha"],
    )
});
static UPTIME: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge(
        "process_uptime_seconds",
        "Service uptime in seconds",
        &["service"],
    )
});
static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter(
        "http_requests_total",
        "HTTP requests handled, by route and status code",
        &["service", "route", "code"],
    )
});
static HTTP_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram(
        "http_handler_latency_seconds",
        "HTTP handler latency in seconds",
        &["service", "route"],
        DEFAULT_BUCKETS,
    )
});
static HTTP_INFLIGHT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge(
        "http_requests_inflight",
        "HTTP requests currently being handled",
        &["service"],
    )
});
static LOGIN_ATTEMPTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter(
        "auth_login_attempts_total",
        "Login attempts by outcome",
        &["service", "outcome"],
    )
});

/// Record the service name and process start. Only the first call counts.
pub(crate) fn init(service: &str) {
    if SERVICE_NAME.get().is_some() {
        return;
    }
    let leaked: &'static str = Box::leak(service.to_string().into_boxed_str());
    if SERVICE_NAME.set(leaked).is_err() {
        return;
    }
    PROCESS_START.get_or_init(Instant::now);
    BUILD_INFO.set(&[leaked, PACKAGE_VERSION, BUILD_SHA], 1.0);
    HTTP_INFLIGHT.set(&[leaked], 0.0);
}

pub fn service_name() -> Option<&'static str> {
    SERVICE_NAME.get().copied()
}

pub fn http_requests_total() -> &'static CounterVec {
    &HTTP_REQUESTS
}

pub fn handler_latency_seconds() -> &'static HistogramVec {
    &HTTP_LATENCY
}

pub fn http_requests_inflight() -> &'static GaugeVec {
    &HTTP_INFLIGHT
}

pub fn auth_login_attempts_total() -> &'static CounterVec {
    &LOGIN_ATTEMPTS
}

/// Count a finished request and its latency under the current service.
pub fn observe_http_request(route: &str, code: u16, seconds: f64) {
    let service = service_name().unwrap_or("unknown");
    let code = code.to_string();
    HTTP_REQUESTS.inc(&[service, route, &code], 1);
    HTTP_LATENCY.observe(&[service, route], seconds);
}

enum Kind {
    Counter,
    Gauge,
    Histogram(&'static [f64]),
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
            Kind::Histogram(_) => "histogram",
        }
    }
}

enum Series {
    Counter(u64),
    Gauge(f64),
    Histogram {
        buckets: Vec<u64>,
        sum: f64,
        count: u64,
    },
}

struct Family {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    kind: Kind,
    series: Mutex<BTreeMap<Vec<String>, Series>>,
}

impl Family {
    fn update(&self, labels: &[&str], apply: impl FnOnce(&mut Series)) {
        if labels.len() != self.label_names.len() {
            tracing::warn!(
                metric = self.name,
                expected = self.label_names.len(),
                got = labels.len(),
                "metric label count mismatch; sample dropped"
            );
            return;
        }
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = series.entry(key).or_insert_with(|| match self.kind {
            Kind::Counter => Series::Counter(0),
            Kind::Gauge => Series::Gauge(0.0),
            Kind::Histogram(bounds) => Series::Histogram {
                buckets: vec![0; bounds.len()],
                sum: 0.0,
                count: 0,
            },
        });
        apply(entry);
    }

    fn encode(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, self.kind.as_str());

        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        for (labels, sample) in series.iter() {
            match sample {
                Series::Counter(value) => {
                    let rendered = render_labels(self.label_names, labels, None);
                    let _ = writeln!(out, "{}{} {}", self.name, rendered, value);
                }
                Series::Gauge(value) => {
                    let rendered = render_labels(self.label_names, labels, None);
                    let _ = writeln!(out, "{}{} {}", self.name, rendered, value);
                }
                Series::Histogram {
                    buckets,
                    sum,
                    count,
                } => {
                    let bounds: &[f64] = match self.kind {
                        Kind::Histogram(bounds) => bounds,
                        _ => &[],
                    };
                    let mut cumulative = 0;
                    for (bound, hits) in bounds.iter().zip(buckets) {
                        cumulative += hits;
                        let le = bound.to_string();
                        let _ = writeln!(
                            out,
                            "{}_bucket{} {}",
                            self.name,
                            render_labels(self.label_names, labels, Some(&le)),
                            cumulative
                        );
                    }
                    let _ = writeln!(
                        out,
                        "{}_bucket{} {}",
                        self.name,
                        render_labels(self.label_names, labels, Some("+Inf")),
                        count
                    );
                    let plain = render_labels(self.label_names, labels, None);
                    let _ = writeln!(out, "{}_sum{} {}", self.name, plain, sum);
                    let _ = writeln!(out, "{}_count{} {}", self.name, plain, count);
                }
            }
        }
    }
}

fn render_labels(names: &[&str], values: &[String], le: Option<&str>) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label(value)))
        .collect();
    if let Some(le) = le {
        pairs.push(format!("le=\"{le}\""));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[derive(Default)]
struct Registry {
    families: RwLock<Vec<Arc<Family>>>,
}

impl Registry {
    fn register(&self, family: Family) -> Arc<Family> {
        let mut families = self.families.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = families.iter().find(|existing| existing.name == family.name) {
            return existing.clone();
        }
        let family = Arc::new(family);
        families.push(family.clone());
        family
    }

    fn encode(&self) -> String {
        let families = self.families.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        for family in families.iter() {
            family.encode(&mut out);
        }
        out
    }
}

#[derive(Clone)]
pub struct CounterVec(Arc<Family>);

impl CounterVec {
    pub fn inc(&self, labels: &[&str], amount: u64) {
        self.0.update(labels, |series| {
            if let Series::Counter(value) = series {
                *value += amount;
            }
        });
    }

    pub fn get(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        let series = self.0.series.lock().unwrap_or_else(PoisonError::into_inner);
        match series.get(&key) {
            Some(Series::Counter(value)) => *value,
            _ => 0,
        }
    }
}

#[derive(Clone)]
pub struct GaugeVec(Arc<Family>);

impl GaugeVec {
    pub fn set(&self, labels: &[&str], value: f64) {
        self.0.update(labels, |series| {
            if let Series::Gauge(current) = series {
                *current = value;
            }
        });
    }

    pub fn add(&self, labels: &[&str], delta: f64) {
        self.0.update(labels, |series| {
            if let Series::Gauge(current) = series {
                *current += delta;
            }
        });
    }
}

#[derive(Clone)]
pub struct HistogramVec(Arc<Family>);

impl HistogramVec {
    pub fn observe(&self, labels: &[&str], value: f64) {
        let bounds = match self.0.kind {
            Kind::Histogram(bounds) => bounds,
            _ => return,
        };
        self.0.update(labels, |series| {
            if let Series::Histogram {
                buckets,
                sum,
                count,
            } = series
            {
                for (bound, hits) in bounds.iter().zip(buckets.iter_mut()) {
                    if value <= *bound {
                        *hits += 1;
                        break;
                    }
                }
                *sum += value;
                *count += 1;
            }
        });
    }
}

pub fn register_counter(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> CounterVec {
    CounterVec(REGISTRY.register(family(name, help, label_names, Kind::Counter)))
}

pub fn register_gauge(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> GaugeVec {
    GaugeVec(REGISTRY.register(family(name, help, label_names, Kind::Gauge)))
}

pub fn register_histogram(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    buckets: &'static [f64],
) -> HistogramVec {
    HistogramVec(REGISTRY.register(family(name, help, label_names, Kind::Histogram(buckets))))
}

fn family(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    kind: Kind,
) -> Family {
    Family {
        name,
        help,
        label_names,
        kind,
        series: Mutex::new(BTreeMap::new()),
    }
}

/// Render every registered family in Prometheus text format.
pub fn encode_prometheus() -> String {
    if let (Some(service), Some(start)) = (service_name(), PROCESS_START.get()) {
        UPTIME.set(&[service], start.elapsed().as_secs_f64());
    }
    REGISTRY.encode()
}
