//! Composes the balance view from three independently updated inputs.
//!
//! The composer holds the last known balance, exchange rate and sync state.
//! Every update swaps exactly one slot and recomposes the whole [`ViewState`]
//! under a single lock, so no composition ever sees a half-applied update and
//! renders arrive in the order their updates were applied.
//!
//! Producers are started by [`ViewStateComposer::activate`] and receive a
//! [`SlotSink`] bound to that activation. Once the composer is deactivated,
//! values published through older sinks are dropped.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::balance::{classify_threshold, convert, Balance};
use crate::errors::FetchError;
use crate::producers::Producer;
use crate::render::{Clock, Renderer};
use crate::sync::{classify, ProgressClassification, SyncState};
use crate::ticker::ExchangeRate;

/// Outcome of one exchange-rate fetch as delivered by the rate producer.
pub type RateUpdate = Result<ExchangeRate, FetchError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RateSlot {
    /// No fetch has completed yet.
    #[default]
    Pending,
    Available(ExchangeRate),
    /// The latest fetch failed.
    Unavailable,
}

/// Latest known value of each input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slots {
    pub balance: Option<Balance>,
    pub rate: RateSlot,
    pub sync: Option<SyncState>,
}

/// A replacement value for exactly one slot.
#[derive(Debug)]
pub enum SlotUpdate {
    Balance(Balance),
    Rate(RateSlot),
    Sync(SyncState),
}

impl From<Balance> for SlotUpdate {
    fn from(balance: Balance) -> Self {
        SlotUpdate::Balance(balance)
    }
}

impl From<SyncState> for SlotUpdate {
    fn from(state: SyncState) -> Self {
        SlotUpdate::Sync(state)
    }
}

impl From<RateUpdate> for SlotUpdate {
    fn from(update: RateUpdate) -> Self {
        match update {
            Ok(rate) => SlotUpdate::Rate(RateSlot::Available(rate)),
            Err(_) => SlotUpdate::Rate(RateSlot::Unavailable),
        }
    }
}

impl Slots {
    fn apply(&mut self, update: SlotUpdate) {
        match update {
            SlotUpdate::Balance(balance) => self.balance = Some(balance),
            SlotUpdate::Rate(rate) => self.rate = rate,
            SlotUpdate::Sync(state) => self.sync = Some(state),
        }
    }
}

/// Everything a renderer needs to draw the balance area.
///
/// While `show_progress` is set only `progress` (and `has_some_balance`) carry
/// meaning; balance fields are left empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub show_progress: bool,
    pub progress: ProgressClassification,
    pub balance: Option<Balance>,
    pub converted_balance: Option<Balance>,
    /// Currency of `converted_balance`.
    pub quote_currency: Option<String>,
    pub balance_too_much: bool,
    pub has_some_balance: bool,
    pub conversion_available: bool,
}

/// Compose a view from one slot snapshot. Pure in `slots` and `now`.
pub fn compose(slots: &Slots, now: DateTime<Utc>) -> ViewState {
    let progress = slots
        .sync
        .as_ref()
        .map_or(ProgressClassification::Unknown, |state| classify(state, now));
    let show_progress = progress.is_catching_up();

    let mut view = ViewState {
        show_progress,
        progress,
        balance: None,
        converted_balance: None,
        quote_currency: None,
        balance_too_much: false,
        has_some_balance: slots
            .balance
            .is_some_and(|balance| classify_threshold(balance).above_some),
        conversion_available: false,
    };

    if show_progress {
        return view;
    }

    if let Some(balance) = slots.balance {
        view.balance = Some(balance);
        view.balance_too_much = classify_threshold(balance).above_too_much;

        if let RateSlot::Available(rate) = &slots.rate {
            view.converted_balance = Some(convert(balance, rate.rate));
            view.quote_currency = Some(rate.quote_currency.clone());
            view.conversion_available = true;
        }
    }

    view
}

// ─────────────────────────────────────────────────────────
// Composer
// ─────────────────────────────────────────────────────────

/// The producers started on each activation.
pub struct Producers {
    pub balance: Arc<dyn Producer<Balance>>,
    /// `None` when local-currency display is switched off.
    pub rate: Option<Arc<dyn Producer<RateUpdate>>>,
    pub sync: Arc<dyn Producer<SyncState>>,
}

struct ComposerState {
    slots: Slots,
    /// Bumped on every activation and deactivation.
    generation: u64,
    activation: Option<CancellationToken>,
}

struct Shared {
    state: Mutex<ComposerState>,
    renderer: Arc<dyn Renderer>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ComposerState> {
        // Slots are only ever replaced wholesale, so a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(&self, state: &ComposerState) -> ViewState {
        let view = compose(&state.slots, self.clock.now());
        self.renderer.render(&view);
        view
    }

    fn apply(&self, update: SlotUpdate) -> ViewState {
        let mut state = self.lock();
        state.slots.apply(update);
        self.render(&state)
    }

    fn apply_from(&self, generation: u64, update: SlotUpdate) -> bool {
        let mut state = self.lock();
        if state.activation.is_none() || state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                ?update,
                "Dropping update from inactive producer"
            );
            return false;
        }
        state.slots.apply(update);
        self.render(&state);
        true
    }
}

/// Handle through which one producer feeds one slot during one activation.
pub struct SlotSink<T> {
    shared: Arc<Shared>,
    generation: u64,
    token: CancellationToken,
    _slot: PhantomData<fn(T)>,
}

impl<T> Clone for SlotSink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            generation: self.generation,
            token: self.token.clone(),
            _slot: PhantomData,
        }
    }
}

impl<T: Into<SlotUpdate>> SlotSink<T> {
    /// Replace the slot and recompose.
    ///
    /// Returns `false` (and discards `value`) once the activation this sink
    /// belongs to has ended.
    pub fn publish(&self, value: T) -> bool {
        self.shared.apply_from(self.generation, value.into())
    }
}

impl<T> SlotSink<T> {
    /// Resolves when the owning activation ends.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct ViewStateComposer {
    shared: Arc<Shared>,
    producers: Producers,
}

impl ViewStateComposer {
    pub fn new(producers: Producers, renderer: Arc<dyn Renderer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ComposerState {
                    slots: Slots::default(),
                    generation: 0,
                    activation: None,
                }),
                renderer,
                clock,
            }),
            producers,
        }
    }

    /// Start all producers and render the current snapshot.
    ///
    /// Must be called from within a tokio runtime. Activating an already
    /// active composer does nothing.
    pub fn activate(&self) {
        let mut state = self.shared.lock();
        if state.activation.is_some() {
            debug!(generation = state.generation, "Composer already active");
            return;
        }

        state.generation += 1;
        let token = CancellationToken::new();
        let generation = state.generation;

        self.spawn(&self.producers.balance, generation, &token);
        self.spawn(&self.producers.sync, generation, &token);
        if let Some(rate) = &self.producers.rate {
            self.spawn(rate, generation, &token);
        }

        state.activation = Some(token);
        info!(generation, "Composer activated");
        self.shared.render(&state);
    }

    /// Stop all producers. Slot values are kept.
    pub fn deactivate(&self) {
        let mut state = self.shared.lock();
        Self::stop(&mut state);
    }

    /// Stop all producers and forget every slot value.
    pub fn teardown(&self) {
        let mut state = self.shared.lock();
        Self::stop(&mut state);
        state.slots = Slots::default();
        info!("Composer torn down");
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().activation.is_some()
    }

    pub fn on_balance_update(&self, balance: Balance) -> ViewState {
        self.shared.apply(SlotUpdate::Balance(balance))
    }

    pub fn on_rate_update(&self, update: RateUpdate) -> ViewState {
        self.shared.apply(update.into())
    }

    pub fn on_sync_update(&self, state: SyncState) -> ViewState {
        self.shared.apply(SlotUpdate::Sync(state))
    }

    /// Recompose from the current snapshot and render it.
    pub fn recompute(&self) -> ViewState {
        let state = self.shared.lock();
        self.shared.render(&state)
    }

    pub fn slots(&self) -> Slots {
        self.shared.lock().slots.clone()
    }

    fn spawn<T>(&self, producer: &Arc<dyn Producer<T>>, generation: u64, token: &CancellationToken)
    where
        T: Send + 'static,
    {
        let producer = Arc::clone(producer);
        let sink = SlotSink {
            shared: Arc::clone(&self.shared),
            generation,
            token: token.clone(),
            _slot: PhantomData,
        };
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = producer.run(sink) => {}
            }
        });
    }

    fn stop(state: &mut ComposerState) {
        if let Some(token) = state.activation.take() {
            state.generation += 1;
            token.cancel();
            info!(generation = state.generation, "Composer deactivated");
        }
    }
}

impl Drop for ViewStateComposer {
    fn drop(&mut self) {
        // Producer tasks hold the shared state; stop them with the composer.
        Self::stop(&mut self.shared.lock());
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use chrono::TimeZone;
    use tokio::sync::mpsc;

    use super::*;
    use crate::balance::{FixedRate, COIN};
    use crate::render::testing::{idle, FixedClock, RecordingRenderer};
    use crate::sync::{Impediment, Magnitude};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn up_to_date() -> SyncState {
        SyncState {
            best_chain_date: Some(now() - chrono::Duration::minutes(5)),
            impediments: BTreeSet::new(),
            replaying: false,
        }
    }

    fn behind(lag: chrono::Duration) -> SyncState {
        SyncState {
            best_chain_date: Some(now() - lag),
            impediments: BTreeSet::new(),
            replaying: true,
        }
    }

    fn btc_rate() -> ExchangeRate {
        ExchangeRate {
            quote_currency: "BTC".to_string(),
            rate: FixedRate::parse_decimal("0.00315893").unwrap(),
            fetched_at: now(),
        }
    }

    fn idle_producers() -> Producers {
        Producers {
            balance: idle(),
            rate: Some(idle()),
            sync: idle(),
        }
    }

    fn composer_with(producers: Producers) -> (ViewStateComposer, Arc<RecordingRenderer>) {
        let renderer = Arc::new(RecordingRenderer::default());
        let composer = ViewStateComposer::new(
            producers,
            renderer.clone(),
            Arc::new(FixedClock(now())),
        );
        (composer, renderer)
    }

    /// Hands every sink it is given to the test.
    struct CapturingProducer<T> {
        sinks: mpsc::UnboundedSender<SlotSink<T>>,
    }

    #[async_trait::async_trait]
    impl<T: Send + 'static> Producer<T> for CapturingProducer<T> {
        async fn run(&self, sink: SlotSink<T>) {
            let _ = self.sinks.send(sink.clone());
            sink.cancelled().await;
        }
    }

    fn capturing<T: Send + 'static>() -> (Arc<CapturingProducer<T>>, mpsc::UnboundedReceiver<SlotSink<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(CapturingProducer { sinks: tx }), rx)
    }

    #[test]
    fn empty_slots_compose_an_empty_view() {
        let view = compose(&Slots::default(), now());
        assert!(!view.show_progress);
        assert_eq!(view.progress, ProgressClassification::Unknown);
        assert_eq!(view.balance, None);
        assert!(!view.conversion_available);
    }

    #[test]
    fn balance_without_rate_hides_conversion() {
        let slots = Slots {
            balance: Some(Balance::coins(5)),
            rate: RateSlot::Unavailable,
            sync: Some(up_to_date()),
        };
        let view = compose(&slots, now());
        assert_eq!(
            view,
            ViewState {
                show_progress: false,
                progress: ProgressClassification::UpToDate,
                balance: Some(Balance::from_base_units(5_00000000)),
                converted_balance: None,
                quote_currency: None,
                balance_too_much: false,
                has_some_balance: false,
                conversion_available: false,
            }
        );
    }

    #[test]
    fn balance_with_rate_is_converted() {
        let slots = Slots {
            balance: Some(Balance::coins(5)),
            rate: RateSlot::Available(btc_rate()),
            sync: Some(up_to_date()),
        };
        let view = compose(&slots, now());
        assert!(view.conversion_available);
        assert_eq!(view.converted_balance, Some(Balance::from_base_units(1_579_465)));
        assert_eq!(view.quote_currency.as_deref(), Some("BTC"));
    }

    #[test]
    fn catching_up_hides_the_balance() {
        let slots = Slots {
            balance: None,
            rate: RateSlot::Pending,
            sync: Some(behind(chrono::Duration::days(10))),
        };
        let view = compose(&slots, now());
        assert!(view.show_progress);
        assert_eq!(
            view.progress,
            ProgressClassification::CatchingUp {
                magnitude: Magnitude::Days,
                value: 10,
                stalled: false,
            }
        );

        let slots = Slots {
            balance: Some(Balance::coins(3_000_000)),
            rate: RateSlot::Available(btc_rate()),
            sync: Some(behind(chrono::Duration::days(10))),
        };
        let view = compose(&slots, now());
        assert!(view.show_progress);
        assert_eq!(view.balance, None);
        assert_eq!(view.converted_balance, None);
        assert!(!view.balance_too_much);
        assert!(!view.conversion_available);
        assert!(view.has_some_balance);
    }

    #[test]
    fn flags_too_much_and_some_balance() {
        let slots = Slots {
            balance: Some(Balance::from_base_units(2_500_000 * COIN + 1)),
            ..Slots::default()
        };
        let view = compose(&slots, now());
        assert!(view.balance_too_much);
        assert!(view.has_some_balance);
    }

    #[test]
    fn missing_chain_date_keeps_progress_hidden() {
        let slots = Slots {
            balance: Some(Balance::coins(1)),
            sync: Some(SyncState {
                replaying: true,
                impediments: BTreeSet::from([Impediment::Network]),
                ..SyncState::default()
            }),
            ..Slots::default()
        };
        let view = compose(&slots, now());
        assert!(!view.show_progress);
        assert_eq!(view.balance, Some(Balance::coins(1)));
    }

    #[test]
    fn recompute_is_deterministic() {
        let (composer, renderer) = composer_with(idle_producers());
        composer.on_balance_update(Balance::coins(7));
        composer.on_rate_update(Ok(btc_rate()));
        composer.on_sync_update(up_to_date());

        let first = composer.recompute();
        let second = composer.recompute();
        assert_eq!(first, second);
        assert_eq!(renderer.views().len(), 5);
    }

    #[test]
    fn update_order_does_not_change_the_result() {
        let (a, _) = composer_with(idle_producers());
        a.on_balance_update(Balance::coins(7));
        a.on_rate_update(Ok(btc_rate()));
        let from_a = a.on_sync_update(up_to_date());

        let (b, _) = composer_with(idle_producers());
        b.on_sync_update(up_to_date());
        b.on_rate_update(Ok(btc_rate()));
        let from_b = b.on_balance_update(Balance::coins(7));

        assert_eq!(from_a, from_b);
    }

    #[test]
    fn failed_fetch_marks_rate_unavailable() {
        let (composer, _) = composer_with(idle_producers());
        composer.on_balance_update(Balance::coins(5));
        assert!(composer.on_rate_update(Ok(btc_rate())).conversion_available);

        let view = composer.on_rate_update(Err(FetchError::MalformedResponse("x".into())));
        assert!(!view.conversion_available);
        assert_eq!(view.converted_balance, None);
        assert_eq!(composer.slots().rate, RateSlot::Unavailable);
    }

    #[tokio::test]
    async fn activation_renders_and_is_idempotent() {
        let (balance, mut sinks) = capturing::<Balance>();
        let (composer, renderer) = composer_with(Producers {
            balance,
            rate: None,
            sync: idle(),
        });

        composer.activate();
        composer.activate();
        assert!(composer.is_active());
        assert_eq!(renderer.views().len(), 1);

        let sink = sinks.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sinks.try_recv().is_err(), "second producer was started");

        assert!(sink.publish(Balance::coins(2)));
        assert_eq!(composer.slots().balance, Some(Balance::coins(2)));
        assert_eq!(renderer.last().unwrap().balance, Some(Balance::coins(2)));
    }

    #[tokio::test]
    async fn late_results_after_deactivation_are_dropped() {
        let (balance, mut sinks) = capturing::<Balance>();
        let (composer, renderer) = composer_with(Producers {
            balance,
            rate: None,
            sync: idle(),
        });

        composer.activate();
        let stale = sinks.recv().await.unwrap();
        assert!(stale.publish(Balance::coins(1)));

        composer.deactivate();
        assert!(stale.is_cancelled());
        let renders = renderer.views().len();
        assert!(!stale.publish(Balance::coins(9)));
        assert_eq!(composer.slots().balance, Some(Balance::coins(1)));
        assert_eq!(renderer.views().len(), renders);

        // A new activation does not revive the old sink.
        composer.activate();
        let fresh = sinks.recv().await.unwrap();
        assert!(!stale.publish(Balance::coins(9)));
        assert!(fresh.publish(Balance::coins(3)));
        assert_eq!(composer.slots().balance, Some(Balance::coins(3)));
    }

    #[tokio::test]
    async fn deactivation_keeps_slots_and_teardown_clears_them() {
        let (composer, _) = composer_with(idle_producers());
        composer.activate();
        composer.on_balance_update(Balance::coins(4));
        composer.on_sync_update(up_to_date());

        composer.deactivate();
        assert!(!composer.is_active());
        assert_eq!(composer.slots().balance, Some(Balance::coins(4)));

        composer.activate();
        composer.teardown();
        assert!(!composer.is_active());
        assert_eq!(composer.slots(), Slots::default());
    }
}
