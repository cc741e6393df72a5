//! A high-level StatsD metric client built on cadence.
//!
//! ## Defining Metrics
//!
//! Metrics are defined by implementing one of the metric traits on a custom enum. The available
//! types are `counter`, `timer`, `gauge` and `distribution`. The traits only provide a type safe
//! metric name, which ensures that a counter cannot be recorded as a timer.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case, invoking
//! [`with_client`] or the [`metric!`] macro is a noop.
//!
//! To initialize the client, either use [`set_client`] to pass a custom client, or use [`init`]
//! to report to a statsd server over UDP:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! use reel_statsd::MetricsClientConfig;
//!
//! reel_statsd::init(MetricsClientConfig {
//!     prefix: "reel",
//!     host: "localhost:8125",
//!     default_tags: BTreeMap::new(),
//!     default_sample_rate: 1.0.into(),
//!     buffering: true,
//! })
//! .unwrap();
//! ```
//!
//! ## Macro Usage
//!
//! ```
//! use reel_statsd::{metric, CounterMetric};
//!
//! struct SessionsStarted;
//!
//! impl CounterMetric for SessionsStarted {
//!     fn name(&self) -> &'static str {
//!         "session.started"
//!     }
//! }
//!
//! metric!(counter(SessionsStarted) += 1, platform = "web");
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, MetricError, QueuingMetricSink, StatsdClient,
    UdpMetricSink,
};
use parking_lot::RwLock;
use rand::Rng;
use rand::distr::StandardUniform;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// Probability that a metric is sent, clamped to `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate(f64);

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }
}

impl From<SampleRate> for f64 {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate.
    pub default_sample_rate: SampleRate,
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Host of the metrics upstream.
    pub host: A,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Default sample rate for metrics, between 0.0 (= 0%) and 1.0 (= 100%).
    pub default_sample_rate: SampleRate,
    /// If metrics should be buffered into larger datagrams before they are sent.
    pub buffering: bool,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        let sample_rate = self.default_sample_rate.0;
        if !Self::should_send(sample_rate) {
            return;
        }

        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if sample_rate < 1.0 {
            metric = metric.with_sampling_rate(sample_rate);
        }

        if let Err(error) = metric.try_send() {
            reel_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }

    fn should_send(sample_rate: f64) -> bool {
        if sample_rate <= 0.0 {
            false
        } else if sample_rate >= 1.0 {
            true
        } else {
            let s: f64 = rand::rng().sample(StandardUniform);
            s <= sample_rate
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> = METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
        default_sample_rate: 1.0.into(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Tell the metrics system to report to statsd.
///
/// Metrics are sent from a background thread through a bounded queue, so recording a metric never
/// blocks on the network.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<'_, A>) -> Result<(), MetricError> {
    let addrs: Vec<_> = config.host.to_socket_addrs()?.collect();
    if let Some(addr) = addrs.first() {
        reel_log::info!("reporting metrics to statsd at {addr}");
    }

    let sample_rate: f64 = config.default_sample_rate.into();
    reel_log::debug!(
        "metrics sample rate is set to {sample_rate}{}",
        if sample_rate == 0.0 {
            ", no metrics will be reported"
        } else {
            ""
        }
    );

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let statsd_client = if config.buffering {
        let udp_sink = BufferedUdpMetricSink::from(&addrs[..], socket)?;
        let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);
        StatsdClient::from_sink(config.prefix, queuing_sink)
    } else {
        let udp_sink = UdpMetricSink::from(&addrs[..], socket)?;
        let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);
        StatsdClient::from_sink(config.prefix, queuing_sink)
    };

    set_client(MetricsClient {
        statsd_client,
        default_tags: config.default_tags,
        default_sample_rate: config.default_sample_rate,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked.  For the most part
/// the [`metric!`] macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time. They are reported
/// as distributions.
///
/// ## Example
///
/// ```
/// use reel_statsd::{metric, TimerMetric};
///
/// struct RequestDuration;
///
/// impl TimerMetric for RequestDuration {
///     fn name(&self) -> &'static str {
///         "requests.duration"
///     }
/// }
///
/// # use std::time::Instant;
/// let start_time = Instant::now();
/// metric!(timer(RequestDuration) = start_time.elapsed(), route = "web_start");
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client, such as the number of
/// sessions started.
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing distributions.
///
/// Distributions are a more general form of timers, for instance to record body sizes.
pub trait DistributionMetric {
    /// Returns the distribution metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement, such as the number of entries in a table.
///
/// ## Example
///
/// ```
/// use reel_statsd::{metric, GaugeMetric};
///
/// struct TableSize;
///
/// impl GaugeMetric for TableSize {
///     fn name(&self) -> &'static str {
///         "negotiation.size"
///     }
/// }
///
/// metric!(gauge(TableSize) = 42);
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // distribution
    (distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(&$crate::DistributionMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value, reported in milliseconds
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };
}
