//! Round Supervisor
//!
//! One task, one writer. The supervisor owns the active round and handles,
//! in arrival order, clock ticks and the hub's command mailbox.
//!
//! ```text
//!  ┌────────────┐   ┌──────────────────────────┐   ┌────────────┐
//!  │ create     │──►│ select! {                │──►│ history    │
//!  │ (commit)   │   │   tick    => advance     │   │ settlement │
//!  └────────────┘   │   command => advance +   │   │ cooldown   │
//!        ▲          │              apply       │   └─────┬──────┘
//!        │          │   shutdown => stop       │         │
//!        │          │ }                        │         │
//!        │          └──────────────────────────┘         │
//!        └───────────────────────────────────────────────┘
//! ```
//!
//! The finished round stays active through the cooldown, so there is never a
//! moment without a round, and the next round is only created once the
//! previous one has crashed.
//!
//! Settlement tasks are owned by the supervisor. Batches left in the
//! settlement store by a previous run are resumed on start, and shutdown
//! waits up to `settlement_grace` for in-flight settlement before leaving the
//! rest pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::core::fixed::Multiplier;
use crate::core::rng::SeedSource;
use crate::game::clock::RoundClock;
use crate::game::crash_point::{CrashPointGenerator, GeneratorConfig};
use crate::game::events::RoundEvent;
use crate::game::history::HistoryStore;
use crate::game::hub::{BroadcastHub, EngineCommand, SubscriptionStart};
use crate::game::ledger::BalanceLedger;
use crate::game::round::{RoundConfig, RoundStateMachine};
use crate::game::settlement::{
    settle_with_retry, InMemorySettlementStore, RetryPolicy, SettlementBatch, SettlementReport, SettlementStore,
};
use crate::game::state::{RoundId, RoundPhase};
use crate::game::tick::InvariantViolation;

/// Fresh seeds tried before giving up on creating a round.
const MAX_CREATE_ATTEMPTS: u32 = 3;

/// Supervisor configuration.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Round timing.
    pub round: RoundConfig,
    /// Crash point distribution.
    pub generator: GeneratorConfig,
    /// Settlement retry schedule.
    pub retry: RetryPolicy,
    /// How long shutdown waits for in-flight settlement.
    pub settlement_grace: Duration,
    /// Mailbox capacity.
    pub mailbox_capacity: usize,
    /// Events buffered per subscriber before it counts as lagging.
    pub event_capacity: usize,
    /// Finished rounds sent to new subscribers.
    pub history_on_subscribe: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            round: RoundConfig::default(),
            generator: GeneratorConfig::default(),
            retry: RetryPolicy::default(),
            settlement_grace: Duration::from_secs(5),
            mailbox_capacity: 1024,
            event_capacity: 1024,
            history_on_subscribe: 20,
        }
    }
}

impl SupervisorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            round: RoundConfig::from_env(),
            generator: GeneratorConfig::from_env(),
            ..Self::default()
        }
    }
}

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// No valid round could be created.
    #[error("failed to create round: {0}")]
    RoundCreation(InvariantViolation),
}

/// How a round loop ended.
enum Exit {
    Finished,
    Shutdown,
}

/// Sequences rounds forever.
pub struct RoundSupervisor {
    config: SupervisorConfig,
    generator: CrashPointGenerator,
    clock: RoundClock,
    seeds: Box<dyn SeedSource>,
    ledger: Arc<dyn BalanceLedger>,
    history: Arc<dyn HistoryStore>,
    settlements: Arc<dyn SettlementStore>,
    in_flight: JoinSet<SettlementReport>,
    events: broadcast::Sender<RoundEvent>,
    commands: mpsc::Receiver<EngineCommand>,
    next_round_id: RoundId,
}

impl RoundSupervisor {
    /// Create a supervisor and the hub that talks to it.
    ///
    /// Round ids start from the current Unix time in milliseconds.
    pub fn new(
        config: SupervisorConfig,
        seeds: Box<dyn SeedSource>,
        ledger: Arc<dyn BalanceLedger>,
        history: Arc<dyn HistoryStore>,
    ) -> (Self, BroadcastHub) {
        let (command_tx, command_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let generator = CrashPointGenerator::new(GeneratorConfig {
            max_crash_point: config.generator.max_crash_point.max(Multiplier::ONE),
            ..config.generator
        });
        let clock = config.round.clock(generator.config().max_crash_point);
        let hub = BroadcastHub::new(command_tx, history.clone());

        let supervisor = Self {
            config,
            generator,
            clock,
            seeds,
            ledger,
            history,
            settlements: Arc::new(InMemorySettlementStore::new()),
            in_flight: JoinSet::new(),
            events: event_tx,
            commands: command_rx,
            next_round_id: RoundId(chrono::Utc::now().timestamp_millis().max(0) as u64),
        };
        (supervisor, hub)
    }

    /// Start numbering rounds at `id`.
    pub fn with_first_round_id(mut self, id: RoundId) -> Self {
        self.next_round_id = id;
        self
    }

    /// Keep unacknowledged settlements in `store` instead of process memory.
    pub fn with_settlement_store(mut self, store: Arc<dyn SettlementStore>) -> Self {
        self.settlements = store;
        self
    }

    /// Run rounds until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), SupervisorError> {
        info!(
            first_round = %self.next_round_id,
            house_edge_bps = self.generator.config().house_edge_bps,
            max_crash_point = %self.generator.config().max_crash_point,
            "Round supervisor started"
        );

        self.resume_pending();
        let result = self.run_rounds(&mut shutdown).await;
        self.drain_settlements().await;

        info!("Round supervisor stopped");
        result
    }

    async fn run_rounds(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), SupervisorError> {
        loop {
            let machine = self.create_round()?;
            match self.run_round(machine, shutdown).await {
                Exit::Finished => continue,
                Exit::Shutdown => return Ok(()),
            }
        }
    }

    fn create_round(&mut self) -> Result<RoundStateMachine, SupervisorError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let id = self.next_round_id;
            self.next_round_id = id.next();

            let now = Instant::now();
            let seed = self.seeds.next_seed();
            match RoundStateMachine::new(id, seed, &self.generator, self.clock, self.config.round.betting_window, now) {
                Ok(machine) => {
                    info!(
                        round = %id,
                        commitment = %machine.round().commitment().to_hex(),
                        "Round created"
                    );
                    self.publish(machine.created_event(now));
                    return Ok(machine);
                }
                Err(violation) => {
                    error!(round = %id, %violation, attempt, "Round creation failed");
                    self.publish(RoundEvent::RoundAborted {
                        round_id: id,
                        reason: violation.to_string(),
                    });
                    if attempt >= MAX_CREATE_ATTEMPTS {
                        return Err(SupervisorError::RoundCreation(violation));
                    }
                }
            }
        }
    }

    #[instrument(skip_all, fields(round = %machine.id()))]
    async fn run_round(&mut self, mut machine: RoundStateMachine, shutdown: &mut broadcast::Receiver<()>) -> Exit {
        let mut ticker = self.clock.ticker();

        // Betting and flight
        while machine.phase() != RoundPhase::Crashed {
            tokio::select! {
                _ = shutdown.recv() => return Exit::Shutdown,
                now = ticker.tick() => {
                    self.advance(&mut machine, now);
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(&mut machine, command);
                }
            }
        }

        self.finish_round(&machine);

        // Cooldown: the crashed round stays active
        let cooldown = tokio::time::sleep(self.config.round.cooldown);
        tokio::pin!(cooldown);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return Exit::Shutdown,
                _ = &mut cooldown => return Exit::Finished,
                Some(command) = self.commands.recv() => {
                    self.handle_command(&mut machine, command);
                }
            }
        }
    }

    /// Bring the round up to `now`, aborting it on an invariant violation.
    fn advance(&mut self, machine: &mut RoundStateMachine, now: Instant) {
        match machine.tick(now) {
            Ok(result) => {
                for event in result.events {
                    self.publish(event);
                }
            }
            Err(violation) => {
                let event = machine.abort(&violation);
                self.publish(event);
            }
        }
    }

    fn handle_command(&mut self, machine: &mut RoundStateMachine, command: EngineCommand) {
        // Commands are applied to the round as of now, after any due
        // transition, crash and auto cash-outs.
        self.advance(machine, Instant::now());

        match command {
            EngineCommand::PlaceBet {
                participant_id,
                stake,
                auto_cash_out,
                reply,
            } => {
                let result = machine
                    .place_bet(participant_id, stake, auto_cash_out, self.ledger.as_ref())
                    .map(|(receipt, event)| {
                        self.publish(event);
                        receipt
                    });
                if let Err(rejection) = &result {
                    debug!(participant = %participant_id.short(), code = rejection.code(), "Bet rejected");
                }
                let _ = reply.send(result);
            }
            EngineCommand::CashOut { participant_id, reply } => {
                let result = machine.cash_out(participant_id).map(|(cash_out, event)| {
                    self.publish(event);
                    cash_out
                });
                if let Err(rejection) = &result {
                    debug!(participant = %participant_id.short(), code = rejection.code(), "Cash-out rejected");
                }
                let _ = reply.send(result);
            }
            EngineCommand::Subscribe { reply } => {
                let start = SubscriptionStart {
                    snapshot: machine.snapshot(Instant::now()),
                    history: self.history.recent(self.config.history_on_subscribe),
                    events: self.events.subscribe(),
                };
                let _ = reply.send(start);
            }
        }
    }

    fn finish_round(&mut self, machine: &RoundStateMachine) {
        let round = machine.round();
        match machine.history_entry() {
            Some(entry) => {
                info!(
                    round = %round.id(),
                    crash_point = %entry.crash_point,
                    bets = entry.bet_count,
                    winners = entry.winner_count,
                    "Round crashed"
                );
                self.history.append(entry);
            }
            None => {
                error!(round = %round.id(), bets = round.bet_count(), "Round ended without outcome, refunding stakes");
            }
        }

        self.reap_settlements();
        if let Some(batch) = machine.settlement_batch() {
            if !batch.credits.is_empty() {
                self.settlements.record(batch.clone());
                self.spawn_settlement(batch);
            }
        }
    }

    fn spawn_settlement(&mut self, batch: SettlementBatch) {
        self.in_flight.spawn(settle_with_retry(
            self.ledger.clone(),
            self.settlements.clone(),
            batch,
            self.config.retry,
        ));
    }

    /// Restart settlement for batches a previous run left unacknowledged.
    fn resume_pending(&mut self) {
        for batch in self.settlements.pending() {
            warn!(
                round = %batch.round_id,
                credits = batch.credits.len(),
                total = %batch.total(),
                "Resuming pending settlement"
            );
            self.spawn_settlement(batch);
        }
    }

    fn reap_settlements(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            log_settled(joined);
        }
    }

    /// Wait for in-flight settlement, then cancel what is left. Cancelled
    /// credits stay in the settlement store.
    async fn drain_settlements(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        let in_flight = &mut self.in_flight;
        let drained = tokio::time::timeout(self.config.settlement_grace, async {
            while let Some(joined) = in_flight.join_next().await {
                log_settled(joined);
            }
        })
        .await;

        if drained.is_err() {
            self.in_flight.abort_all();
            while self.in_flight.join_next().await.is_some() {}
            let pending = self.settlements.pending();
            error!(
                rounds = pending.len(),
                credits = pending.iter().map(|b| b.credits.len()).sum::<usize>(),
                "Settlement unfinished at shutdown, left pending"
            );
        }
    }

    fn publish(&self, event: RoundEvent) {
        // No receivers is not an error
        let _ = self.events.send(event);
    }
}

fn log_settled(joined: Result<SettlementReport, JoinError>) {
    match joined {
        Ok(report) if report.failed.is_empty() => {
            debug!(round = %report.round_id, attempts = report.attempts, "Settlement task finished");
        }
        Ok(report) => {
            error!(round = %report.round_id, failed = report.failed.len(), "Settlement task finished with credits pending");
        }
        Err(err) if err.is_cancelled() => {}
        Err(err) => error!(error = %err, "Settlement task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::oneshot;

    use crate::core::fixed::Amount;
    use crate::core::rng::SequenceSeedSource;
    use crate::game::history::InMemoryHistoryStore;
    use crate::game::hub::{HubError, SubscriptionItem};
    use crate::game::ledger::{InMemoryLedger, LedgerError};
    use crate::game::round::CommandRejection;
    use crate::game::settlement::SettlementCredit;
    use crate::game::state::ParticipantId;

    struct Harness {
        hub: BroadcastHub,
        ledger: Arc<InMemoryLedger>,
        history: Arc<InMemoryHistoryStore>,
        shutdown: broadcast::Sender<()>,
        task: tokio::task::JoinHandle<Result<(), SupervisorError>>,
    }

    fn start() -> Harness {
        let ledger = Arc::new(InMemoryLedger::with_opening_balance(Amount::from_minor(10_000)));
        let history = Arc::new(InMemoryHistoryStore::default());
        let (supervisor, hub) = RoundSupervisor::new(
            SupervisorConfig::default(),
            Box::new(SequenceSeedSource::new([42; 32])),
            ledger.clone(),
            history.clone(),
        );
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.with_first_round_id(RoundId(1)).run(rx));
        Harness {
            hub,
            ledger,
            history,
            shutdown,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_starts_with_snapshot() {
        let h = start();
        let mut sub = h.hub.subscribe().await.unwrap();

        match sub.next().await {
            Some(SubscriptionItem::Snapshot(snapshot)) => {
                assert_eq!(snapshot.id, RoundId(1));
                assert_eq!(snapshot.phase, RoundPhase::Waiting);
                assert!(snapshot.crash_point.is_none());
                assert!(snapshot.server_seed.is_none());
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert!(sub.history().is_empty());

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_unsubscribes() {
        let h = start();
        let first = h.hub.subscribe().await.unwrap();
        let second = h.hub.subscribe().await.unwrap();
        assert_eq!(h.hub.subscriber_count(), 2);

        drop(first);
        assert_eq!(h.hub.subscriber_count(), 1);
        drop(second);
        assert_eq!(h.hub.subscriber_count(), 0);

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_routed_to_active_round() {
        let h = start();
        let alice = ParticipantId::new([1; 16]);

        let receipt = h.hub.place_bet(alice, Amount::from_minor(1000), None).await.unwrap();
        assert_eq!(receipt.round_id, RoundId(1));
        assert_eq!(h.ledger.balance(&alice), Some(Amount::from_minor(9_000)));

        let err = h.hub.place_bet(alice, Amount::from_minor(1000), None).await.unwrap_err();
        assert_eq!(err, HubError::Rejected(CommandRejection::DuplicateBet));

        let err = h.hub.cash_out(alice).await.unwrap_err();
        assert_eq!(err.code(), "WRONG_PHASE");

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_follow_each_other() {
        let h = start();
        let mut sub = h.hub.subscribe().await.unwrap();

        let mut created = Vec::new();
        let mut flying: Option<RoundId> = None;
        while created.len() < 3 {
            match sub.next().await {
                Some(SubscriptionItem::Event(RoundEvent::RoundCreated { round_id, .. })) => {
                    assert!(flying.is_none(), "round created while {:?} was flying", flying);
                    created.push(round_id);
                }
                Some(SubscriptionItem::Event(RoundEvent::FlightStarted { round_id })) => {
                    assert!(flying.is_none());
                    flying = Some(round_id);
                }
                Some(SubscriptionItem::Event(RoundEvent::Crashed { round_id, .. })) => {
                    assert_eq!(flying, Some(round_id));
                    flying = None;
                }
                Some(_) => {}
                None => panic!("engine stopped"),
            }
        }

        assert_eq!(created, vec![RoundId(2), RoundId(3), RoundId(4)]);
        assert_eq!(h.history.len(), 3);

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_unavailable_after_shutdown() {
        let h = start();
        h.shutdown.send(()).unwrap();
        h.task.await.unwrap().unwrap();

        let err = h
            .hub
            .place_bet(ParticipantId::new([1; 16]), Amount::from_minor(1), None)
            .await
            .unwrap_err();
        assert_eq!(err, HubError::EngineUnavailable);
        assert!(h.hub.subscribe().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_losing_bet_settled_after_crash() {
        let h = start();
        let alice = ParticipantId::new([1; 16]);
        h.hub.place_bet(alice, Amount::from_minor(500), None).await.unwrap();

        let mut sub = h.hub.subscribe().await.unwrap();
        loop {
            if let Some(SubscriptionItem::Event(RoundEvent::Crashed { .. })) = sub.next().await {
                break;
            }
        }
        // Let the settlement task run
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.ledger.balance(&alice), Some(Amount::from_minor(9_500)));
        let entry = &h.history.recent(1)[0];
        assert_eq!(entry.bet_count, 1);
        assert_eq!(entry.winner_count, 0);

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap().unwrap();
    }

    /// Seeds whose first round flies to at least `min`.
    fn seeds_crashing_above(min: u32) -> SequenceSeedSource {
        let generator = CrashPointGenerator::new(GeneratorConfig::default());
        (0..=u8::MAX)
            .map(|base| [base; 32])
            .find(|base| {
                let seed = SequenceSeedSource::new(*base).next_seed();
                generator.generate(RoundId(1), &seed) >= Multiplier::from_hundredths(min)
            })
            .map(SequenceSeedSource::new)
            .unwrap()
    }

    /// Settles only while the ledger is up.
    struct OutageLedger {
        inner: InMemoryLedger,
        down: AtomicBool,
    }

    impl BalanceLedger for OutageLedger {
        fn reserve(&self, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError> {
            self.inner.reserve(participant, amount)
        }

        fn settle(&self, round: RoundId, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("connection refused".into()));
            }
            self.inner.settle(round, participant, amount)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_decreasing_multiplier_aborts_and_refunds() {
        let ledger = Arc::new(InMemoryLedger::with_opening_balance(Amount::from_minor(10_000)));
        let history = Arc::new(InMemoryHistoryStore::default());
        let (supervisor, _hub) = RoundSupervisor::new(
            SupervisorConfig::default(),
            Box::new(seeds_crashing_above(200)),
            ledger.clone(),
            history.clone(),
        );
        let mut supervisor = supervisor.with_first_round_id(RoundId(1));
        let mut events = supervisor.events.subscribe();

        let mut machine = supervisor.create_round().unwrap();
        let alice = ParticipantId::new([1; 16]);
        let (reply, receipt) = oneshot::channel();
        supervisor.handle_command(
            &mut machine,
            EngineCommand::PlaceBet {
                participant_id: alice,
                stake: Amount::from_minor(700),
                auto_cash_out: None,
                reply,
            },
        );
        receipt.await.unwrap().unwrap();
        assert_eq!(ledger.balance(&alice), Some(Amount::from_minor(9_300)));

        let closes = machine.round().betting_closes_at();
        supervisor.advance(&mut machine, closes + Duration::from_millis(500));
        assert_eq!(machine.phase(), RoundPhase::Flying);

        // An instant before the last published tick reads lower
        supervisor.advance(&mut machine, closes + Duration::from_millis(100));
        assert_eq!(machine.phase(), RoundPhase::Crashed);

        let mut aborted = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RoundEvent::RoundAborted { round_id, reason } = event {
                aborted.push((round_id, reason));
            }
        }
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].0, RoundId(1));
        assert!(aborted[0].1.contains("decreased"), "{}", aborted[0].1);

        supervisor.finish_round(&machine);
        supervisor.drain_settlements().await;

        assert!(ledger.is_settled(RoundId(1), &alice));
        assert_eq!(ledger.balance(&alice), Some(Amount::from_minor(10_000)));
        assert!(history.is_empty());
        assert!(supervisor.settlements.pending().is_empty());
    }

    fn start_with_outage(
        ledger: Arc<OutageLedger>,
        store: Arc<InMemorySettlementStore>,
        first: RoundId,
    ) -> (BroadcastHub, broadcast::Sender<()>, tokio::task::JoinHandle<Result<(), SupervisorError>>) {
        let config = SupervisorConfig {
            settlement_grace: Duration::from_secs(1),
            ..SupervisorConfig::default()
        };
        let (supervisor, hub) = RoundSupervisor::new(
            config,
            Box::new(seeds_crashing_above(200)),
            ledger,
            Arc::new(InMemoryHistoryStore::default()),
        );
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(
            supervisor
                .with_first_round_id(first)
                .with_settlement_store(store)
                .run(rx),
        );
        (hub, shutdown, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_retry_leaves_settlement_pending() {
        let ledger = Arc::new(OutageLedger {
            inner: InMemoryLedger::with_opening_balance(Amount::from_minor(10_000)),
            down: AtomicBool::new(true),
        });
        let store = Arc::new(InMemorySettlementStore::new());
        let alice = ParticipantId::new([1; 16]);

        let (hub, shutdown, task) = start_with_outage(ledger.clone(), store.clone(), RoundId(1));
        hub.place_bet(alice, Amount::from_minor(500), None).await.unwrap();
        let mut sub = hub.subscribe().await.unwrap();

        // Cash out mid-flight, well below the crash point
        let mut cash_out = None;
        loop {
            match sub.next().await {
                Some(SubscriptionItem::Event(RoundEvent::Tick { multiplier, .. }))
                    if cash_out.is_none() && multiplier >= Multiplier::from_hundredths(130) =>
                {
                    cash_out = Some(hub.cash_out(alice).await.unwrap());
                }
                Some(SubscriptionItem::Event(RoundEvent::Crashed { .. })) => break,
                Some(_) => {}
                None => panic!("engine stopped"),
            }
        }
        let payout = cash_out.unwrap().payout;
        let owed = SettlementBatch {
            round_id: RoundId(1),
            credits: vec![SettlementCredit {
                participant_id: alice,
                amount: payout,
            }],
        };

        // Ledger still down: retries in progress through the cooldown
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.pending(), vec![owed.clone()]);

        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(store.pending(), vec![owed]);
        assert!(!ledger.inner.is_settled(RoundId(1), &alice));

        // The next run resumes the batch once the ledger is back
        ledger.down.store(false, Ordering::SeqCst);
        let (_hub, shutdown, task) = start_with_outage(ledger.clone(), store.clone(), RoundId(50));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(ledger.inner.is_settled(RoundId(1), &alice));
        assert_eq!(
            ledger.inner.balance(&alice),
            Some(Amount::from_minor(9_500).saturating_add(payout))
        );
        assert!(store.pending().is_empty());

        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
