//! Request admission throttling.
//!
//! The limiter hands out evenly spaced admission slots: the `n`-th request of a
//! burst is admitted no earlier than `(n - 1) * interval / rate` after the first.
//! Slots are reserved under a short lock and the caller sleeps outside it, so
//! concurrent workers queue up behind one another without holding the lock
//! across an await point.
//!
//! With `adaptive` enabled, every `429 Too Many Requests` divides the current
//! rate by `1 + adaptive_increase`. The rate is never raised automatically; use
//! [`RateLimitInterceptor::reset_rate`] for that.

use crate::error::{DriverError, Result};
use crate::interceptor::{Interceptor, InterceptorAction};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const DEFAULT_ADAPTIVE_INCREASE: f64 = 0.10;
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3600);

/// The window a configured rate is expressed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePeriod {
    Second,
    Minute,
}

impl RatePeriod {
    pub fn interval(self) -> Duration {
        match self {
            RatePeriod::Second => Duration::from_secs(1),
            RatePeriod::Minute => Duration::from_secs(60),
        }
    }
}

/// Limiter settings. Exactly one of the two rates must be given.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: Option<f64>,
    pub requests_per_minute: Option<f64>,
    /// Slow down on `429` responses.
    pub adaptive: bool,
    /// Fractional slowdown applied per `429`.
    pub adaptive_increase: f64,
    /// Longest a request may be queued before admission fails. Seconds in JSON.
    #[serde(deserialize_with = "duration_from_secs")]
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: None,
            requests_per_minute: None,
            adaptive: true,
            adaptive_increase: DEFAULT_ADAPTIVE_INCREASE,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl RateLimitConfig {
    pub fn per_second(rate: f64) -> Self {
        Self {
            requests_per_second: Some(rate),
            ..Self::default()
        }
    }

    pub fn per_minute(rate: f64) -> Self {
        Self {
            requests_per_minute: Some(rate),
            ..Self::default()
        }
    }

    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_adaptive_increase(mut self, increase: f64) -> Self {
        self.adaptive_increase = increase;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn validate(&self) -> Result<(f64, RatePeriod)> {
        let (rate, period) = match (self.requests_per_second, self.requests_per_minute) {
            (Some(rate), None) => (rate, RatePeriod::Second),
            (None, Some(rate)) => (rate, RatePeriod::Minute),
            (None, None) => {
                return Err(DriverError::configuration(
                    "rate limit requires requests_per_second or requests_per_minute",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(DriverError::configuration(
                    "rate limit accepts only one of requests_per_second and requests_per_minute",
                ));
            }
        };
        check_rate(rate)?;
        if !self.adaptive_increase.is_finite() || self.adaptive_increase < 0.0 {
            return Err(DriverError::configuration(format!(
                "adaptive_increase must be a finite value >= 0, got {}",
                self.adaptive_increase
            )));
        }
        Ok((rate, period))
    }
}

fn check_rate(rate: f64) -> Result<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(DriverError::configuration(format!(
            "rate must be a finite value > 0, got {}",
            rate
        )))
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Snapshot of a limiter's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub total_wait: Duration,
    pub average_wait: Duration,
    pub current_rate: f64,
    pub per: RatePeriod,
    pub adaptive_reductions: u64,
}

#[derive(Debug)]
struct LimiterState {
    rate: f64,
    next_slot: Option<Instant>,
    total_requests: u64,
    total_wait: Duration,
    adaptive_reductions: u64,
}

impl LimiterState {
    fn spacing(&self, interval: Duration) -> Duration {
        // Rounded up so spacing never undershoots the configured rate.
        Duration::from_nanos((interval.as_nanos() as f64 / self.rate).ceil() as u64)
    }
}

#[derive(Debug)]
pub struct RateLimitInterceptor {
    period: RatePeriod,
    adaptive: bool,
    adaptive_increase: f64,
    max_wait: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimitInterceptor {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        let (rate, period) = config.validate()?;
        debug!(
            "Rate limiter configured at {} requests per {:?} (adaptive: {})",
            rate, period, config.adaptive
        );
        Ok(Self {
            period,
            adaptive: config.adaptive,
            adaptive_increase: config.adaptive_increase,
            max_wait: config.max_wait,
            state: Mutex::new(LimiterState {
                rate,
                next_slot: None,
                total_requests: 0,
                total_wait: Duration::ZERO,
                adaptive_reductions: 0,
            }),
        })
    }

    pub fn current_rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Replaces the current rate. Reservations already handed out keep their slot.
    pub fn reset_rate(&self, rate: f64) -> Result<()> {
        check_rate(rate)?;
        self.state.lock().rate = rate;
        debug!("Rate limiter reset to {} requests per {:?}", rate, self.period);
        Ok(())
    }

    pub fn stats(&self) -> RateLimitStats {
        let state = self.state.lock();
        let average_wait = if state.total_requests == 0 {
            Duration::ZERO
        } else {
            state.total_wait.div_f64(state.total_requests as f64)
        };
        RateLimitStats {
            total_requests: state.total_requests,
            total_wait: state.total_wait,
            average_wait,
            current_rate: state.rate,
            per: self.period,
            adaptive_reductions: state.adaptive_reductions,
        }
    }

    /// Claims the next admission slot, returning the instant to wait for.
    fn reserve(&self) -> Result<Instant> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let slot = match state.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        let waited = slot - now;
        if waited > self.max_wait {
            return Err(DriverError::RateLimitExceeded {
                waited,
                max_wait: self.max_wait,
            });
        }
        let spacing = state.spacing(self.period.interval());
        state.next_slot = Some(slot + spacing);
        state.total_requests += 1;
        state.total_wait += waited;
        Ok(slot)
    }

    fn slow_down(&self) {
        let mut state = self.state.lock();
        let previous = state.rate;
        state.rate = previous / (1.0 + self.adaptive_increase);
        state.adaptive_reductions += 1;
        warn!(
            "Received 429, reducing rate from {:.3} to {:.3} requests per {:?}",
            previous, state.rate, self.period
        );
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn modify_request(&self, request: Request) -> Result<InterceptorAction> {
        let slot = self.reserve()?;
        tokio::time::sleep_until(slot).await;
        Ok(InterceptorAction::Continue(request))
    }

    async fn modify_response(&self, response: Response, _request: &Request) -> Result<Response> {
        if self.adaptive && response.status() == StatusCode::TOO_MANY_REQUESTS {
            self.slow_down();
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request::get("https://example.com/").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_are_evenly_spaced() {
        let limiter = RateLimitInterceptor::new(RateLimitConfig::per_second(10.0)).unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.modify_request(request()).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(400));

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.per, RatePeriod::Second);
        assert!(stats.total_wait >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_schedule() {
        let limiter = std::sync::Arc::new(
            RateLimitInterceptor::new(RateLimitConfig::per_minute(120.0)).unwrap(),
        );
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = std::sync::Arc::clone(&limiter);
                tokio::spawn(async move { limiter.modify_request(request()).await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn each_429_divides_the_rate() {
        let limiter = RateLimitInterceptor::new(RateLimitConfig::per_second(10.0)).unwrap();
        let busy = Response::canned("https://example.com/", "slow down")
            .unwrap()
            .with_status(StatusCode::TOO_MANY_REQUESTS);
        for _ in 0..3 {
            limiter.modify_response(busy.clone(), &request()).await.unwrap();
        }
        let ok = Response::canned("https://example.com/", "fine").unwrap();
        limiter.modify_response(ok, &request()).await.unwrap();

        let expected = 10.0 / 1.1f64.powi(3);
        assert!((limiter.current_rate() - expected).abs() < 1e-9);
        assert_eq!(limiter.stats().adaptive_reductions, 3);

        limiter.reset_rate(10.0).unwrap();
        assert_eq!(limiter.current_rate(), 10.0);
        assert!(limiter.reset_rate(0.0).is_err());
    }

    #[tokio::test]
    async fn non_adaptive_limiter_ignores_429() {
        let limiter =
            RateLimitInterceptor::new(RateLimitConfig::per_second(5.0).with_adaptive(false)).unwrap();
        let busy = Response::canned("https://example.com/", "")
            .unwrap()
            .with_status(StatusCode::TOO_MANY_REQUESTS);
        limiter.modify_response(busy, &request()).await.unwrap();
        assert_eq!(limiter.current_rate(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_beyond_the_ceiling_fail_fast() {
        let limiter = RateLimitInterceptor::new(
            RateLimitConfig::per_second(1.0).with_max_wait(Duration::from_millis(500)),
        )
        .unwrap();
        limiter.modify_request(request()).await.unwrap();
        let err = limiter.modify_request(request()).await.unwrap_err();
        assert!(matches!(err, DriverError::RateLimitExceeded { .. }));
        assert_eq!(limiter.stats().total_requests, 1);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(RateLimitInterceptor::new(RateLimitConfig::default()).is_err());
        let both = RateLimitConfig {
            requests_per_second: Some(1.0),
            requests_per_minute: Some(60.0),
            ..RateLimitConfig::default()
        };
        assert!(RateLimitInterceptor::new(both).is_err());
        assert!(RateLimitInterceptor::new(RateLimitConfig::per_second(0.0)).is_err());
        assert!(RateLimitInterceptor::new(RateLimitConfig::per_second(f64::NAN)).is_err());
        assert!(RateLimitInterceptor::new(RateLimitConfig::per_minute(-3.0)).is_err());
        assert!(RateLimitInterceptor::new(
            RateLimitConfig::per_second(1.0).with_adaptive_increase(-0.5)
        )
        .is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"requests_per_minute": 30, "max_wait": 2.5}"#).unwrap();
        assert_eq!(config.requests_per_minute, Some(30.0));
        assert!(config.adaptive);
        assert_eq!(config.adaptive_increase, 0.10);
        assert_eq!(config.max_wait, Duration::from_millis(2500));

        let stats = RateLimitInterceptor::new(config).unwrap().stats();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["per"], "minute");
        assert_eq!(json["current_rate"], 30.0);
    }
}
