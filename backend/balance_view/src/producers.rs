//! Background producers that feed the composer's slots.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::composer::{RateUpdate, SlotSink, SlotUpdate};
use crate::ticker::ExchangeRateFetcher;

/// A source of values for one slot.
///
/// `run` is spawned once per activation and should return when `sink` is
/// cancelled; the composer also stops awaiting it at that point.
#[async_trait]
pub trait Producer<T: Send + 'static>: Send + Sync {
    async fn run(&self, sink: SlotSink<T>);
}

/// Polls the quote service on a fixed cadence.
pub struct RatePoller {
    fetcher: ExchangeRateFetcher,
    interval: Duration,
}

impl RatePoller {
    pub fn new(fetcher: ExchangeRateFetcher, interval: Duration) -> Self {
        Self { fetcher, interval }
    }
}

#[async_trait]
impl Producer<RateUpdate> for RatePoller {
    async fn run(&self, sink: SlotSink<RateUpdate>) {
        let market = self.fetcher.endpoint().market();
        info!(%market, interval_secs = self.interval.as_secs(), "Rate poller starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sink.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = sink.cancelled() => break,
                result = self.fetcher.fetch() => result,
            };

            match &result {
                Ok(rate) => debug!(%market, rate = %rate.rate, "Exchange rate updated"),
                Err(e) => warn!(%market, error = %e, "Exchange rate fetch failed"),
            }

            if !sink.publish(result) {
                break;
            }
        }

        debug!(%market, "Rate poller stopped");
    }
}

/// Forwards values pushed by an external collaborator into a slot.
///
/// The current value, if any, is delivered as soon as the producer starts.
pub struct WatchProducer<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T> WatchProducer<T> {
    pub fn new(rx: watch::Receiver<Option<T>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl<T> Producer<T> for WatchProducer<T>
where
    T: Clone + Send + Sync + Into<SlotUpdate> + 'static,
{
    async fn run(&self, sink: SlotSink<T>) {
        let mut rx = self.rx.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                if !sink.publish(value) {
                    break;
                }
            }

            tokio::select! {
                _ = sink.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        debug!("Input channel closed");
                        break;
                    }
                }
            }
        }
    }
}
