//! Output side of the composer: renderers and the clock they are composed against.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::info;

use crate::composer::ViewState;

/// Receives every composed view, including repeats of an unchanged one.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &ViewState);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Keeps the latest view for the API and logs each change.
pub struct ViewPublisher {
    tx: watch::Sender<Option<ViewState>>,
}

impl ViewPublisher {
    pub fn new() -> (Self, watch::Receiver<Option<ViewState>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl Renderer for ViewPublisher {
    fn render(&self, view: &ViewState) {
        let changed = self.tx.send_if_modified(|latest| {
            if latest.as_ref() == Some(view) {
                return false;
            }
            *latest = Some(view.clone());
            true
        });
        if !changed {
            return;
        }

        if view.show_progress {
            info!(progress = %view.progress, "Blockchain catching up");
            return;
        }

        match (view.balance, view.converted_balance) {
            (Some(balance), Some(converted)) => info!(
                %balance,
                %converted,
                quote = view.quote_currency.as_deref().unwrap_or_default(),
                too_much = view.balance_too_much,
                "Balance"
            ),
            (Some(balance), None) => info!(%balance, too_much = view.balance_too_much, "Balance"),
            (None, _) => info!(progress = %view.progress, "Balance not loaded yet"),
        }
    }
}
