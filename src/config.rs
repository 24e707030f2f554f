//! Tunables for the routing core.

use tokio::time::Duration;

/// Maximum peers per bucket.
pub const DEFAULT_BUCKET_CAPACITY: usize = 128;

/// Number of periods of the latency moving average.
pub const DEFAULT_LATENCY_EMA_PERIODS: f64 = 5.0;

/// Latency assumed for a peer admitted without a measurement.
pub const DEFAULT_LATENCY: Duration = Duration::from_secs(60);

/// Deadline for a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(55);

/// Deadline for a single remote closest-peers query.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(180);

/// Result count used when a seek asks for zero peers.
pub const DEFAULT_SEEK_COUNT: usize = 25;

/// Concurrent dials admitted per debounce window.
pub const DEFAULT_FAST_LANE_PERMITS: usize = 5;

/// Concurrent in-flight remote queries per seek.
pub const DEFAULT_SLOW_LANE_PERMITS: usize = 5;

/// How long a fast-lane permit stays taken after a dial starts.
pub const DEFAULT_FAST_LANE_DEBOUNCE: Duration = Duration::from_millis(100);

/// How often every bucket is refreshed.
pub const DEFAULT_FILL_INTERVAL: Duration = Duration::from_secs(15);

/// Deadline for the seek behind one bucket refresh.
pub const DEFAULT_FILL_TIMEOUT: Duration = Duration::from_secs(15);

/// Peers requested by one bucket refresh.
pub const DEFAULT_FILL_COUNT: usize = 25;

/// How often the pinger sweeps the table.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Window the probes of one sweep are spread across.
pub const DEFAULT_PING_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
/// Routing core configuration.
pub struct Config {
    /// Maximum peers per bucket.
    ///
    /// Defaults to [DEFAULT_BUCKET_CAPACITY]
    pub bucket_capacity: usize,
    /// Periods of the latency moving average; α = 2 / (periods + 1).
    ///
    /// Defaults to [DEFAULT_LATENCY_EMA_PERIODS]
    pub latency_ema_periods: f64,
    /// Latency assumed for a peer admitted without a measurement.
    ///
    /// Defaults to [DEFAULT_LATENCY]
    pub default_latency: Duration,
    /// Deadline for one liveness probe.
    ///
    /// Defaults to [DEFAULT_PROBE_TIMEOUT]
    pub probe_timeout: Duration,
    /// Deadline for one remote closest-peers query.
    ///
    /// Defaults to [DEFAULT_LOOKUP_TIMEOUT]
    pub lookup_timeout: Duration,
    /// Result count used when a seek asks for zero peers.
    ///
    /// Defaults to [DEFAULT_SEEK_COUNT]
    pub default_seek_count: usize,
    /// Fast-lane limiter capacity, bounding the burst rate of new dials.
    ///
    /// Defaults to [DEFAULT_FAST_LANE_PERMITS]
    pub fast_lane_permits: usize,
    /// Slow-lane limiter capacity, bounding in-flight remote queries.
    ///
    /// Defaults to [DEFAULT_SLOW_LANE_PERMITS]
    pub slow_lane_permits: usize,
    /// How long a fast-lane permit is held after it is taken.
    ///
    /// Defaults to [DEFAULT_FAST_LANE_DEBOUNCE]
    pub fast_lane_debounce: Duration,
    /// Period of the bucket filler.
    ///
    /// Defaults to [DEFAULT_FILL_INTERVAL]
    pub fill_interval: Duration,
    /// Deadline of the seek behind one bucket refresh.
    ///
    /// Defaults to [DEFAULT_FILL_TIMEOUT]
    pub fill_timeout: Duration,
    /// Peers requested by one bucket refresh.
    ///
    /// Defaults to [DEFAULT_FILL_COUNT]
    pub fill_count: usize,
    /// Period of the pinger.
    ///
    /// Defaults to [DEFAULT_PING_INTERVAL]
    pub ping_interval: Duration,
    /// Window one pinger sweep spreads its probes across.
    ///
    /// Defaults to [DEFAULT_PING_WINDOW]
    pub ping_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            latency_ema_periods: DEFAULT_LATENCY_EMA_PERIODS,
            default_latency: DEFAULT_LATENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            default_seek_count: DEFAULT_SEEK_COUNT,
            fast_lane_permits: DEFAULT_FAST_LANE_PERMITS,
            slow_lane_permits: DEFAULT_SLOW_LANE_PERMITS,
            fast_lane_debounce: DEFAULT_FAST_LANE_DEBOUNCE,
            fill_interval: DEFAULT_FILL_INTERVAL,
            fill_timeout: DEFAULT_FILL_TIMEOUT,
            fill_count: DEFAULT_FILL_COUNT,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_window: DEFAULT_PING_WINDOW,
        }
    }
}

impl Config {
    /// Smoothing factor of the latency moving average, clamped to [0, 1].
    pub fn latency_ema_alpha(&self) -> f64 {
        (2.0 / (1.0 + self.latency_ema_periods)).clamp(0.0, 1.0)
    }
}
