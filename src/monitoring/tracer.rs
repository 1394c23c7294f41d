/*!
 * Structured Tracing
 * Subscriber setup and timed spans around collective operations
 */

use crate::core::types::{TeamId, UnitId};
use std::time::Instant;
use tracing::{debug, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Collectives slower than this are reported as warnings
const SLOW_COLLECTIVE_MS: u128 = 100;

/// Install the global subscriber
///
/// - `RUST_LOG` sets the filter (default: info)
/// - `json` switches to JSON lines with span context
///
/// Returns `false` if a subscriber was already installed, which happens when
/// several units or tests share one process.
pub fn init_tracing(json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        debug!(json, "Structured tracing initialized");
    }
    installed
}

/// Span covering one collective call of one unit
pub struct CollectiveSpan {
    span: tracing::Span,
    start: Instant,
    operation: &'static str,
}

impl CollectiveSpan {
    pub fn new(operation: &'static str, unit: UnitId, team: TeamId) -> Self {
        let span = span!(
            Level::DEBUG,
            "collective",
            operation,
            unit = %unit,
            team = %team,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            operation,
        }
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "error" });
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for CollectiveSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration.as_millis() > SLOW_COLLECTIVE_MS {
            warn!(
                operation = self.operation,
                duration_ms = duration.as_millis(),
                slow = true,
                "Slow collective, a member may be late"
            );
        }
    }
}

/// Time a collective call of `unit` on `team`
#[inline]
pub fn span_collective(operation: &'static str, unit: UnitId, team: TeamId) -> CollectiveSpan {
    CollectiveSpan::new(operation, unit, team)
}
