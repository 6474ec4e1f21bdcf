use chrono::{DateTime, FixedOffset, Offset, SubsecRound, Utc};

const DEFAULT_TCP_PORT: &str = "DEFAULT_TCP_PORT";

const DEFAULT_PORT: u16 = 8899;

pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

/// Probe port, taken from `DEFAULT_TCP_PORT` when it parses.
pub fn get_port() -> Option<u16> {
    let port_from_env = std::env::var(DEFAULT_TCP_PORT);
    port_from_env.ok().and_then(|res| res.parse().ok())
}

const LEGACY_API_URL: &str = "LEGACY_API_URL";

pub fn get_legacy_api_url() -> Option<String> {
    std::env::var(LEGACY_API_URL).ok().filter(|url| !url.is_empty())
}

const LEGACY_API_TOKEN: &str = "LEGACY_API_TOKEN";

pub fn get_legacy_api_token() -> Option<String> {
    std::env::var(LEGACY_API_TOKEN)
        .ok()
        .filter(|token| !token.is_empty())
}

/// Round to two decimals, ties toward positive infinity.
pub fn round_half_up_2(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

/// Round to two decimals, ties away from zero.
pub fn round_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Wall clock pinned to the site's UTC offset.
///
/// Probes carry no clock of their own, so every timestamp in the engine comes
/// from here at the moment of ingestion.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: FixedOffset,
}

impl LocalClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Builds a clock from whole hours east of UTC, falling back to UTC for
    /// out-of-range values.
    pub fn from_hours(hours: i32) -> Self {
        let offset = hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current local time truncated to microseconds, the storage precision.
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.localize(Utc::now()).trunc_subsecs(6)
    }

    pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::from_hours(0)
    }
}
