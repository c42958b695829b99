//! Load-adaptive choice between a fast path and a safe fallback.
//!
//! The router keeps an exponential moving average of fast-path latency as a
//! load factor in `[0, 1]`. The fast path is taken with probability
//! `max(floor, 1 - load / threshold)`, so a slow fast path is tried less often
//! but never abandoned. Any fast-path error or panic falls back to the safe
//! path. State is process-local.

use core_config::RouterSettings;
use futures::FutureExt;
use metrics::{counter, gauge};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RouteError;

type Rng = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterStats {
    pub total: u64,
    pub fast_successes: u64,
    pub fast_failures: u64,
    pub load_factor: f64,
    pub fast_path_probability: f64,
}

pub struct AdaptiveRouter {
    name: String,
    settings: RouterSettings,
    load_bits: AtomicU64,
    total: AtomicU64,
    fast_successes: AtomicU64,
    fast_failures: AtomicU64,
    rng: Rng,
}

impl Default for AdaptiveRouter {
    fn default() -> Self {
        Self::new("default", RouterSettings::default())
    }
}

impl AdaptiveRouter {
    /// Out-of-range settings are replaced by their defaults, and the floor is
    /// clamped into `[0, 1]`.
    pub fn new(name: impl Into<String>, settings: RouterSettings) -> Self {
        let name = name.into();
        let settings = sanitize(&name, settings);
        Self {
            name,
            settings,
            load_bits: AtomicU64::new(0f64.to_bits()),
            total: AtomicU64::new(0),
            fast_successes: AtomicU64::new(0),
            fast_failures: AtomicU64::new(0),
            rng: Arc::new(rand::random::<f64>),
        }
    }

    /// Replace the uniform `[0, 1)` source used for path selection.
    pub fn with_rng(mut self, rng: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.rng = Arc::new(rng);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn load_factor(&self) -> f64 {
        f64::from_bits(self.load_bits.load(Ordering::Acquire))
    }

    pub fn fast_path_probability(&self) -> f64 {
        let p = 1.0 - self.load_factor() / self.settings.threshold;
        p.max(self.settings.fast_path_floor).min(1.0)
    }

    pub fn should_use_fast_path(&self) -> bool {
        (self.rng)() < self.fast_path_probability()
    }

    /// Fold one fast-path latency sample into the load factor.
    pub fn record_latency(&self, latency_ms: f64) {
        let sample = (latency_ms / self.settings.latency_scale_ms).clamp(0.0, 1.0);
        let alpha = self.settings.alpha;

        let mut current = self.load_bits.load(Ordering::Acquire);
        loop {
            let next = alpha * sample + (1.0 - alpha) * f64::from_bits(current);
            match self.load_bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    gauge!("router_load_factor", "router" => self.name.clone()).set(next);
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            total: self.total.load(Ordering::Relaxed),
            fast_successes: self.fast_successes.load(Ordering::Relaxed),
            fast_failures: self.fast_failures.load(Ordering::Relaxed),
            load_factor: self.load_factor(),
            fast_path_probability: self.fast_path_probability(),
        }
    }

    /// Run `fast` when selected, falling back to `safe` on error or panic.
    /// When the fast path is not selected `safe` runs alone and its result
    /// is returned unchanged.
    pub async fn route<T, E, F, FFut, S, SFut>(&self, fast: F, safe: S) -> Result<T, E>
    where
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        S: FnOnce() -> SFut,
        SFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.total.fetch_add(1, Ordering::Relaxed);

        if !self.should_use_fast_path() {
            counter!("router_requests_total", "router" => self.name.clone(), "path" => "safe")
                .increment(1);
            return safe().await;
        }

        counter!("router_requests_total", "router" => self.name.clone(), "path" => "fast")
            .increment(1);
        let start = Instant::now();
        let outcome = AssertUnwindSafe(async move { fast().await }).catch_unwind().await;

        let reason = match outcome {
            Ok(Ok(value)) => {
                self.fast_successes.fetch_add(1, Ordering::Relaxed);
                self.record_latency(start.elapsed().as_secs_f64() * 1000.0);
                debug!(
                    router = %self.name,
                    load_factor = self.load_factor(),
                    "Fast path succeeded"
                );
                return Ok(value);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "fast path panicked".to_string(),
        };

        self.fast_failures.fetch_add(1, Ordering::Relaxed);
        counter!("router_fast_failures_total", "router" => self.name.clone()).increment(1);
        warn!(router = %self.name, error = %reason, "Fast path failed, using safe path");
        safe().await
    }

    /// [`route`](Self::route), abandoned with `RouteError::Cancelled` when
    /// `cancel` fires.
    pub async fn route_cancellable<T, E, F, FFut, S, SFut>(
        &self,
        fast: F,
        safe: S,
        cancel: &CancellationToken,
    ) -> Result<T, RouteError<E>>
    where
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        S: FnOnce() -> SFut,
        SFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RouteError::Cancelled),
            result = self.route(fast, safe) => result.map_err(RouteError::Failed),
        }
    }
}

fn sanitize(name: &str, settings: RouterSettings) -> RouterSettings {
    let defaults = RouterSettings::default();
    let in_unit = |v: f64| v > 0.0 && v <= 1.0;

    let threshold = if in_unit(settings.threshold) {
        settings.threshold
    } else {
        warn!(
            router = %name,
            threshold = settings.threshold,
            "Invalid router threshold, using default"
        );
        defaults.threshold
    };
    let alpha = if in_unit(settings.alpha) {
        settings.alpha
    } else {
        warn!(router = %name, alpha = settings.alpha, "Invalid router alpha, using default");
        defaults.alpha
    };
    let scale = settings.latency_scale_ms;
    let latency_scale_ms = if scale > 0.0 && scale.is_finite() {
        scale
    } else {
        warn!(
            router = %name,
            latency_scale_ms = scale,
            "Invalid router latency scale, using default"
        );
        defaults.latency_scale_ms
    };
    let fast_path_floor = if settings.fast_path_floor.is_nan() {
        defaults.fast_path_floor
    } else {
        settings.fast_path_floor.clamp(0.0, 1.0)
    };

    RouterSettings {
        threshold,
        alpha,
        latency_scale_ms,
        fast_path_floor,
    }
}
