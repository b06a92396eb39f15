//! The credit scheduler service

use crate::intervals::IntervalGenerator;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use velobench_bus::{BusEvent, Pusher, RunCommand, Topic};
use velobench_core::clock::secs_to_ns;
use velobench_core::config::RequestRateMode;
use velobench_core::context::derive_rng;
use velobench_core::types::{ConversationId, Credit, CreditPhase, WorkerId};
use velobench_core::{Error, MonoClock, ProfileConfig, Result};
use velobench_dataset::DatasetHandle;
use velobench_service::{Service, ServiceContext};

/// Scheduler lifecycle, driven by controller commands and drain progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduling,
    Draining,
    Done,
    Failed,
}

/// Per-credit cancellation draw, deterministic under the root seed: each
/// credit id derives its own generator, so the decision is independent of
/// task interleaving.
pub fn should_cancel_credit(seed: u64, credit_id: u64, rate_percent: f64) -> bool {
    if rate_percent <= 0.0 {
        return false;
    }
    if rate_percent >= 100.0 {
        return true;
    }
    let mut rng = derive_rng(seed, &format!("timing.request.cancellation.{credit_id}"));
    rng.random::<f64>() * 100.0 < rate_percent
}

/// State shared between the session issuer and the seal handler.
struct Shared {
    cfg: Arc<ProfileConfig>,
    clock: MonoClock,
    issued: AtomicU64,
    active_sessions: AtomicI64,
    /// Concurrency gate; permits are forgotten on acquire and returned by
    /// the aggregator's credit-freed (sealed final turn) events.
    slots: Option<Semaphore>,
    /// Monotonic time of the first profiling credit; `u64::MAX` until set.
    profiling_start_ns: AtomicU64,
}

impl Shared {
    fn new(cfg: Arc<ProfileConfig>, clock: MonoClock) -> Self {
        let slots = cfg.load.concurrency.map(|c| Semaphore::new(c));
        Self {
            cfg,
            clock,
            issued: AtomicU64::new(0),
            active_sessions: AtomicI64::new(0),
            slots,
            profiling_start_ns: AtomicU64::new(u64::MAX),
        }
    }

    /// Total credits the run should issue: warmup plus the profiling
    /// request target.
    fn credit_target(&self) -> Option<u64> {
        self.cfg
            .load
            .request_count
            .map(|count| count + self.cfg.load.warmup_request_count)
    }

    fn profiling_start(&self) -> Option<u64> {
        let v = self.profiling_start_ns.load(Ordering::SeqCst);
        (v != u64::MAX).then_some(v)
    }

    /// Duration-mode deadline; none until profiling starts.
    fn deadline_ns(&self) -> Option<u64> {
        let duration = self.cfg.load.benchmark_duration_secs?;
        self.profiling_start()
            .map(|start| start + secs_to_ns(duration))
    }

    fn deadline_passed(&self) -> bool {
        self.deadline_ns()
            .is_some_and(|d| self.clock.now_ns() >= d)
    }

    fn make_credit(
        &self,
        conversation_id: ConversationId,
        turn_index: usize,
        session_num: u64,
        scheduled_ns: Option<u64>,
        phase_override: Option<CreditPhase>,
    ) -> Credit {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst);
        let phase = phase_override.unwrap_or({
            if seq < self.cfg.load.warmup_request_count {
                CreditPhase::Warmup
            } else {
                CreditPhase::Profiling
            }
        });
        let now = self.clock.now_ns();
        if phase == CreditPhase::Profiling {
            let _ = self.profiling_start_ns.compare_exchange(
                u64::MAX,
                now,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        let cancel_after_ns = should_cancel_credit(
            self.cfg.input.random_seed,
            seq,
            self.cfg.load.cancellation_rate_percent,
        )
        .then(|| secs_to_ns(self.cfg.load.cancellation_delay_secs));

        Credit {
            credit_id: seq,
            conversation_id,
            turn_index,
            phase,
            session_num,
            cancel_after_ns,
            scheduled_ns,
            issued_ns: now,
        }
    }
}

/// Issue new-session (turn 0) credits according to the traffic mode.
async fn issue_sessions(
    shared: Arc<Shared>,
    dataset: DatasetHandle,
    credits: Pusher<Credit>,
    shutdown: CancellationToken,
) -> Result<()> {
    let cfg = Arc::clone(&shared.cfg);
    let mut session_num = 0u64;

    if cfg.input.fixed_schedule {
        let entries = dataset.scheduled().await?;
        let base = if cfg.input.fixed_schedule_auto_offset {
            entries.first().map(|(_, ts)| *ts).unwrap_or(0)
        } else {
            0
        };
        let start_offset = cfg.input.fixed_schedule_start_offset_ms.unwrap_or(0);
        let end_offset = cfg.input.fixed_schedule_end_offset_ms.unwrap_or(u64::MAX);
        let t0 = shared.clock.now_ns();

        for (id, ts) in entries {
            let offset_ms = ts.saturating_sub(base);
            if offset_ms < start_offset || offset_ms > end_offset {
                continue;
            }
            if let Some(target) = shared.credit_target() {
                if shared.issued.load(Ordering::SeqCst) >= target {
                    break;
                }
            }
            let target_ns = t0 + (offset_ms - start_offset) * 1_000_000;
            let fire_at = tokio::time::Instant::from_std(shared.clock.instant_at(target_ns));
            tokio::select! {
                _ = tokio::time::sleep_until(fire_at) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
            shared.active_sessions.fetch_add(1, Ordering::SeqCst);
            let credit = shared.make_credit(id, 0, session_num, Some(target_ns), None);
            session_num += 1;
            credits.push(credit).await?;
        }
        return Ok(());
    }

    let mut interval = cfg.load.request_rate.map(|rate| match cfg.load.request_rate_mode {
        RequestRateMode::Constant => IntervalGenerator::constant(rate),
        RequestRateMode::Poisson => IntervalGenerator::poisson(
            rate,
            derive_rng(cfg.input.random_seed, "timing.request.interval"),
        ),
    });

    loop {
        if let Some(target) = shared.credit_target() {
            if shared.issued.load(Ordering::SeqCst) >= target {
                break;
            }
        }
        if shared.deadline_passed() {
            debug!("benchmark duration reached, credit issuance stops");
            break;
        }

        // Sleep-then-gate: the schedule pauses while the gate is closed,
        // with no catch-up burst afterwards.
        if let Some(generator) = &mut interval {
            let pause = generator.next_interval();
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
        if let Some(slots) = &shared.slots {
            let permit = tokio::select! {
                permit = slots.acquire() => permit
                    .map_err(|_| Error::Internal("concurrency gate closed".into()))?,
                _ = shutdown.cancelled() => return Ok(()),
            };
            permit.forget();
        }
        // Re-check after the gate: continuations issued while this task was
        // blocked count toward the target too.
        if let Some(target) = shared.credit_target() {
            if shared.issued.load(Ordering::SeqCst) >= target {
                break;
            }
        }
        if shared.deadline_passed() {
            break;
        }

        let conversation = dataset.sample_next().await?;
        shared.active_sessions.fetch_add(1, Ordering::SeqCst);
        let credit = shared.make_credit(conversation.id, 0, session_num, None, None);
        session_num += 1;
        credits.push(credit).await?;
    }
    Ok(())
}

/// The scheduler service. Owns credit issuance and reacts to sealed-record
/// notices: frees concurrency slots on final turns and routes follow-up
/// turn credits back to the owning worker's continuation lane.
pub struct SchedulerService {
    cfg: Arc<ProfileConfig>,
    dataset: DatasetHandle,
    credits: Option<Pusher<Credit>>,
    lanes: Option<HashMap<WorkerId, mpsc::Sender<Credit>>>,
    events: Topic<BusEvent>,
}

impl SchedulerService {
    pub fn new(
        cfg: Arc<ProfileConfig>,
        dataset: DatasetHandle,
        credits: Pusher<Credit>,
        lanes: HashMap<WorkerId, mpsc::Sender<Credit>>,
        events: Topic<BusEvent>,
    ) -> Self {
        Self {
            cfg,
            dataset,
            credits: Some(credits),
            lanes: Some(lanes),
            events,
        }
    }
}

#[async_trait]
impl Service for SchedulerService {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(&mut self, mut ctx: ServiceContext) -> Result<()> {
        let shared = Arc::new(Shared::new(Arc::clone(&self.cfg), ctx.clock));
        let credits = self
            .credits
            .take()
            .ok_or_else(|| Error::Internal("scheduler already ran".into()))?;
        let lanes = self
            .lanes
            .take()
            .ok_or_else(|| Error::Internal("scheduler already ran".into()))?;

        let mut state = SchedulerState::Scheduling;
        info!(mode = ?self.cfg.load.request_rate_mode, "scheduler entering {state:?}");

        let mut sealed_events = self.events.subscribe();
        let mut issuer: JoinHandle<Result<()>> = tokio::spawn(issue_sessions(
            Arc::clone(&shared),
            self.dataset.clone(),
            credits,
            ctx.shutdown.clone(),
        ));
        let mut issuing = true;
        let mut announced = false;

        // Announced as soon as issuance stops: in-flight sessions may still
        // drain (and multi-turn continuations may still be issued), but no
        // new session will start.
        let announce = |shared: &Shared, events: &Topic<BusEvent>| {
            events.publish(BusEvent::SchedulingComplete {
                credits_issued: shared.issued.load(Ordering::SeqCst),
                profiling_start_ns: shared.profiling_start(),
                profiling_deadline_ns: shared.deadline_ns(),
            });
        };

        loop {
            if !issuing && shared.active_sessions.load(Ordering::SeqCst) <= 0 {
                state = SchedulerState::Done;
                break;
            }
            tokio::select! {
                joined = &mut issuer, if issuing => {
                    issuing = false;
                    state = SchedulerState::Draining;
                    debug!("scheduler entering {state:?}");
                    if !announced {
                        announced = true;
                        announce(&shared, &self.events);
                    }
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            state = SchedulerState::Failed;
                            warn!(%err, "credit issuance failed");
                            return Err(err);
                        }
                        Err(join_err) if join_err.is_cancelled() => {}
                        Err(join_err) => {
                            state = SchedulerState::Failed;
                            return Err(Error::Internal(format!("issuer panicked: {join_err}")));
                        }
                    }
                }
                event = sealed_events.recv() => match event {
                    Ok(BusEvent::RecordSealed {
                        conversation_id,
                        turn_index,
                        session_num,
                        worker_id,
                        phase,
                        final_turn,
                        ..
                    }) => {
                        if final_turn {
                            if let Some(slots) = &shared.slots {
                                slots.add_permits(1);
                            }
                            shared.active_sessions.fetch_sub(1, Ordering::SeqCst);
                        } else {
                            // Next turn of the session, pinned to the worker
                            // that owns the conversation history.
                            let credit = shared.make_credit(
                                conversation_id,
                                turn_index + 1,
                                session_num,
                                None,
                                Some(phase),
                            );
                            match lanes.get(&worker_id) {
                                Some(lane) => {
                                    if lane.send(credit).await.is_err() {
                                        warn!(worker_id, "continuation lane closed, ending session");
                                        if let Some(slots) = &shared.slots {
                                            slots.add_permits(1);
                                        }
                                        shared.active_sessions.fetch_sub(1, Ordering::SeqCst);
                                    }
                                }
                                None => {
                                    return Err(Error::Internal(format!(
                                        "no continuation lane for worker {worker_id}"
                                    )));
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "scheduler lagged on sealed events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                command = ctx.commands.next() => match command {
                    Some(RunCommand::StopScheduling) | Some(RunCommand::Shutdown) | None => {
                        issuer.abort();
                        issuing = false;
                        state = SchedulerState::Draining;
                        if !announced {
                            announced = true;
                            announce(&shared, &self.events);
                        }
                    }
                    Some(_) => {}
                },
                _ = ctx.shutdown.cancelled() => {
                    issuer.abort();
                    state = SchedulerState::Done;
                    break;
                }
            }
        }

        info!(
            credits_issued = shared.issued.load(Ordering::SeqCst),
            "scheduler entering {state:?}"
        );
        if !announced {
            announce(&shared, &self.events);
        }
        // Dropping the pusher and lanes lets the worker pool drain out.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_draw_is_deterministic_per_credit() {
        for credit_id in 0..64 {
            assert_eq!(
                should_cancel_credit(9, credit_id, 30.0),
                should_cancel_credit(9, credit_id, 30.0)
            );
        }
    }

    #[test]
    fn cancellation_rate_extremes() {
        assert!(!should_cancel_credit(1, 5, 0.0));
        assert!(should_cancel_credit(1, 5, 100.0));
    }

    #[test]
    fn cancellation_rate_is_approximately_honored() {
        let marked = (0..10_000)
            .filter(|&id| should_cancel_credit(42, id, 25.0))
            .count();
        let fraction = marked as f64 / 10_000.0;
        assert!((fraction - 0.25).abs() < 0.02, "fraction {fraction}");
    }

    #[test]
    fn warmup_quota_tags_the_first_credits() {
        let mut cfg = ProfileConfig::default();
        cfg.load.warmup_request_count = 2;
        cfg.load.request_count = Some(3);
        let shared = Shared::new(Arc::new(cfg), MonoClock::new());
        let phases: Vec<CreditPhase> = (0..5)
            .map(|i| {
                shared
                    .make_credit(format!("conv-{i}"), 0, i, None, None)
                    .phase
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                CreditPhase::Warmup,
                CreditPhase::Warmup,
                CreditPhase::Profiling,
                CreditPhase::Profiling,
                CreditPhase::Profiling,
            ]
        );
        assert_eq!(shared.credit_target(), Some(5));
        assert!(shared.profiling_start().is_some());
    }

    #[test]
    fn deadline_requires_profiling_start() {
        let mut cfg = ProfileConfig::default();
        cfg.load.benchmark_duration_secs = Some(10.0);
        let shared = Shared::new(Arc::new(cfg), MonoClock::new());
        assert!(shared.deadline_ns().is_none());
        shared.make_credit("c".into(), 0, 0, None, None);
        assert!(shared.deadline_ns().is_some());
        assert!(!shared.deadline_passed());
    }
}
