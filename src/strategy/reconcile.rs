//! Cancel-then-open order reconciliation for one instrument.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::error::HostFault;
use crate::exchange::{InstrumentInfo, OpenOrderOutcome, OrderRequest, OrderSide, TradingHost};
use crate::utils::decimal::round_down_to_grid;

/// Fixed-delay retry bound for host requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(100),
        }
    }
}

impl From<&ExecutionConfig> for RetryPolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Result of a retried host request.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Completed(T),
    ExhaustedRetries { attempts: u32, last_fault: HostFault },
}

impl<T> RetryOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, RetryOutcome::Completed(_))
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Sleeps `policy.delay` between failed attempts, never after the last one.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HostFault>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return RetryOutcome::Completed(value),
            Err(fault) if attempt >= max_attempts => {
                error!(attempts = attempt, error = %fault, "Host request failed, giving up");
                return RetryOutcome::ExhaustedRetries {
                    attempts: attempt,
                    last_fault: fault,
                };
            }
            Err(fault) => {
                warn!(attempt, max_attempts, error = %fault, "Host request failed, retrying");
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// What the cancel phase did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelSummary {
    pub requested: usize,
    /// Orders still resting after all attempts, with the last fault
    pub failed: Vec<(String, HostFault)>,
}

impl CancelSummary {
    pub fn cancelled(&self) -> usize {
        self.requested - self.failed.len()
    }
}

/// Cancel every open order on `instrument` that carries `tag`, concurrently.
///
/// Failures are collected, never propagated.
pub async fn cancel_phase<H: TradingHost + ?Sized>(
    host: &H,
    instrument: &str,
    tag: &str,
    policy: &RetryPolicy,
) -> CancelSummary {
    let orders: Vec<_> = host
        .list_open_orders(instrument)
        .await
        .into_iter()
        .filter(|order| order.is_tagged(tag))
        .collect();

    if orders.is_empty() {
        return CancelSummary::default();
    }

    let cancels = orders.iter().map(|order| {
        let order_id = order.id.as_str();
        async move {
            let outcome = with_retries(policy, move || host.cancel_order(order_id)).await;
            (order_id, outcome)
        }
    });

    let failed: Vec<_> = join_all(cancels)
        .await
        .into_iter()
        .filter_map(|(order_id, outcome)| match outcome {
            RetryOutcome::Completed(()) => None,
            RetryOutcome::ExhaustedRetries { last_fault, .. } => {
                Some((order_id.to_string(), last_fault))
            }
        })
        .collect();

    if !failed.is_empty() {
        warn!(%instrument, failed = failed.len(), "Some orders could not be cancelled");
    }
    debug!(%instrument, requested = orders.len(), "Cancel phase finished");

    CancelSummary {
        requested: orders.len(),
        failed,
    }
}

/// Parameters of one open phase.
#[derive(Debug, Clone)]
pub struct OpenRequest<'a> {
    pub info: &'a InstrumentInfo,
    pub side: OrderSide,
    pub volume: Decimal,
    pub price: Decimal,
    pub tag: &'a str,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What the open phase did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenSummary {
    pub requested: Decimal,
    pub placed: Decimal,
    pub order_ids: Vec<String>,
    /// Set when a chunk ran out of retries and the phase was abandoned
    pub exhausted: Option<HostFault>,
}

impl OpenSummary {
    /// Volume left unplaced because retries ran out.
    pub fn shortfall(&self) -> Decimal {
        if self.exhausted.is_some() {
            self.requested - self.placed
        } else {
            Decimal::ZERO
        }
    }
}

/// A completed open that committed nothing is not progress.
fn require_fill(outcome: OpenOrderOutcome) -> Result<OpenOrderOutcome, HostFault> {
    if outcome.filled_volume <= Decimal::ZERO {
        Err(HostFault::EmptyFill)
    } else {
        Ok(outcome)
    }
}

/// Place `request.volume` in chunks no larger than the instrument maximum.
///
/// Each chunk is retried under `policy`. The running total is reduced by
/// the volume the host actually filled, so a partial fill makes the next
/// chunk carry the rest.
pub async fn open_phase<H: TradingHost + ?Sized>(
    host: &H,
    request: OpenRequest<'_>,
    policy: &RetryPolicy,
) -> OpenSummary {
    let info = request.info;
    let mut summary = OpenSummary {
        requested: request.volume,
        ..Default::default()
    };
    let mut remaining = request.volume;

    while remaining >= info.min_trade_volume && remaining > Decimal::ZERO {
        let chunk = round_down_to_grid(
            remaining.min(info.max_trade_volume),
            info.min_trade_volume,
            info.volume_step,
        );
        if chunk < info.min_trade_volume {
            break;
        }

        let order = OrderRequest {
            instrument: info.key.clone(),
            side: request.side,
            volume: chunk,
            price: request.price,
            tag: request.tag.to_string(),
            expires_at: request.expires_at,
        };
        let order = &order;

        let outcome = with_retries(policy, move || async move {
            host.open_order(order).await.and_then(require_fill)
        })
        .await;

        match outcome {
            RetryOutcome::Completed(result) => {
                let filled = result.filled_volume.min(chunk);
                remaining -= filled;
                summary.placed += filled;
                summary.order_ids.push(result.order_id.clone());

                info!(
                    instrument = %info.key,
                    side = %request.side,
                    %chunk,
                    %filled,
                    %remaining,
                    order_id = %result.order_id,
                    "Chunk placed"
                );
            }
            RetryOutcome::ExhaustedRetries { attempts, last_fault } => {
                error!(
                    instrument = %info.key,
                    %chunk,
                    %remaining,
                    attempts,
                    error = %last_fault,
                    "Open phase abandoned"
                );
                summary.exhausted = Some(last_fault);
                break;
            }
        }
    }

    summary
}
