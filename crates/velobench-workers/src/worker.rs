//! The per-credit worker procedure

use crate::executor::{ExecOutcome, RequestExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use velobench_bus::{Puller, Pusher};
use velobench_core::error::ErrorDetails;
use velobench_core::types::{
    Conversation, ConversationId, Credit, RawRequestRecord, Role, WorkerId,
};
use velobench_core::{Error, MonoClock, Result};
use velobench_dataset::DatasetHandle;
use velobench_endpoints::{FormatContext, HistoryEntry, RequestCodec};

/// Everything a worker needs, cloneable per worker task.
#[derive(Clone)]
pub struct WorkerDeps {
    pub executor: Arc<RequestExecutor>,
    pub dataset: DatasetHandle,
    pub codec: Arc<dyn RequestCodec>,
    pub records: Pusher<RawRequestRecord>,
    pub clock: MonoClock,
    pub model: String,
    pub streaming: bool,
}

/// Worker-owned state of one in-progress conversation.
struct SessionHistory {
    correlation_id: String,
    entries: Vec<HistoryEntry>,
}

enum Settled {
    Done(Result<ExecOutcome>),
    Cancelled,
    Shutdown,
}

async fn sleep_until_opt(at: Option<std::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// The composed prompt text of this attempt, for input-length accounting.
fn composed_input_text(history: &[HistoryEntry], turn_text: &str) -> String {
    if history.is_empty() {
        return turn_text.to_string();
    }
    let mut text = String::new();
    for entry in history {
        text.push_str(&entry.text);
        text.push(' ');
    }
    text.push_str(turn_text);
    text
}

/// Handle one credit end to end and emit exactly one raw record.
async fn handle_credit(
    worker_id: WorkerId,
    deps: &WorkerDeps,
    histories: &mut HashMap<ConversationId, SessionHistory>,
    credit: Credit,
    shutdown: &CancellationToken,
) -> Result<()> {
    let conversation = match deps.dataset.get_by_id(&credit.conversation_id).await {
        Ok(conversation) => conversation,
        Err(err) => {
            return emit_failure(worker_id, deps, &credit, None, &err).await;
        }
    };
    let Some(turn) = conversation.turns.get(credit.turn_index).cloned() else {
        let err = Error::Internal(format!(
            "credit for turn {} of {}-turn conversation {}",
            credit.turn_index,
            conversation.turns.len(),
            conversation.id
        ));
        return emit_failure(worker_id, deps, &credit, None, &err).await;
    };

    // Inter-turn delay: the prior turn's delay applies before this send;
    // turn 0 never sleeps.
    if credit.turn_index > 0 {
        if let Some(delay_ms) = conversation
            .turns
            .get(credit.turn_index - 1)
            .and_then(|t| t.delay_after_ms)
        {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
    }

    let session = histories
        .entry(credit.conversation_id.clone())
        .or_insert_with(|| SessionHistory {
            correlation_id: Uuid::new_v4().to_string(),
            entries: Vec::new(),
        });
    let correlation_id = session.correlation_id.clone();
    let history = session.entries.clone();

    let streaming = deps.streaming && deps.codec.supports_streaming();
    let formatted = match deps.codec.format_request(&FormatContext {
        model: &deps.model,
        turn: &turn,
        history: &history,
        streaming,
    }) {
        Ok(formatted) => formatted,
        Err(err) => {
            return emit_failure(worker_id, deps, &credit, Some(&conversation), &err).await;
        }
    };

    let x_request_id = Uuid::new_v4().to_string();
    let input_text = composed_input_text(&history, &turn.text);
    let natural_final = credit.turn_index + 1 == conversation.turns.len();

    let start_ns = deps.clock.now_ns();
    let cancel_at = credit
        .cancel_after_ns
        .map(|delay| deps.clock.instant_at(start_ns + delay));

    let settled = {
        let exec = deps.executor.execute(&formatted, &x_request_id, &correlation_id);
        tokio::select! {
            result = exec => Settled::Done(result),
            _ = sleep_until_opt(cancel_at), if cancel_at.is_some() => Settled::Cancelled,
            _ = shutdown.cancelled() => Settled::Shutdown,
        }
    };
    let end_ns = deps.clock.now_ns();

    let mut record = RawRequestRecord {
        x_request_id,
        x_correlation_id: correlation_id,
        conversation_id: credit.conversation_id.clone(),
        turn_index: credit.turn_index,
        session_num: credit.session_num,
        worker_id,
        credit_id: credit.credit_id,
        phase: credit.phase,
        final_turn: natural_final,
        start_ns,
        ack_ns: None,
        end_ns,
        status: None,
        input_text,
        input_length_hint: turn.input_length,
        response: None,
        was_cancelled: false,
        cancellation_time_ns: None,
        error: None,
    };

    match settled {
        Settled::Done(Ok(outcome)) => {
            record.status = Some(outcome.status);
            record.ack_ns = if streaming {
                outcome.ack_ns
            } else {
                Some(end_ns)
            };
            // Fold this exchange into the session history for later turns.
            if !natural_final {
                session.entries.push(HistoryEntry {
                    role: turn.role,
                    text: turn.text.clone(),
                });
                session.entries.push(HistoryEntry {
                    role: Role::Assistant,
                    text: outcome.response.output_text(),
                });
            }
            record.response = Some(outcome.response);
        }
        Settled::Done(Err(err)) => {
            record.status = err.code();
            record.error = Some(ErrorDetails::from(&err));
            // A failed turn terminates its session.
            record.final_turn = true;
        }
        Settled::Cancelled | Settled::Shutdown => {
            // The exchange future was dropped, aborting the request; the
            // cancel timestamp is taken after the abort completed.
            let cancelled_ns = deps.clock.now_ns();
            record.end_ns = cancelled_ns;
            record.was_cancelled = true;
            record.cancellation_time_ns = Some(cancelled_ns);
            let err = Error::RequestCancelled {
                elapsed_ms: (cancelled_ns.saturating_sub(start_ns)) / 1_000_000,
            };
            record.status = err.code();
            record.error = Some(ErrorDetails::from(&err));
            record.final_turn = true;
        }
    }

    if record.final_turn {
        histories.remove(&credit.conversation_id);
    }
    deps.records.push(record).await
}

async fn emit_failure(
    worker_id: WorkerId,
    deps: &WorkerDeps,
    credit: &Credit,
    conversation: Option<&Conversation>,
    err: &Error,
) -> Result<()> {
    warn!(credit_id = credit.credit_id, %err, "request attempt failed before send");
    let now = deps.clock.now_ns();
    let record = RawRequestRecord {
        x_request_id: Uuid::new_v4().to_string(),
        x_correlation_id: conversation
            .map(|c| c.id.clone())
            .unwrap_or_else(|| credit.conversation_id.clone()),
        conversation_id: credit.conversation_id.clone(),
        turn_index: credit.turn_index,
        session_num: credit.session_num,
        worker_id,
        credit_id: credit.credit_id,
        phase: credit.phase,
        final_turn: true,
        start_ns: now,
        ack_ns: None,
        end_ns: now,
        status: err.code(),
        input_text: String::new(),
        input_length_hint: None,
        response: None,
        was_cancelled: false,
        cancellation_time_ns: None,
        error: Some(ErrorDetails::from(err)),
    };
    deps.records.push(record).await
}

/// One worker: pulls from the shared credit queue and its continuation
/// lane (lane first, so session turns never starve behind new sessions),
/// one request in flight at a time.
pub async fn worker_loop(
    worker_id: WorkerId,
    shared: Puller<Credit>,
    mut lane: mpsc::Receiver<Credit>,
    deps: WorkerDeps,
    shutdown: CancellationToken,
) {
    let mut histories: HashMap<ConversationId, SessionHistory> = HashMap::new();
    let mut lane_open = true;
    let mut shared_open = true;

    debug!(worker_id, "worker started");
    while lane_open || shared_open {
        let credit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            maybe = lane.recv(), if lane_open => match maybe {
                Some(credit) => credit,
                None => {
                    lane_open = false;
                    continue;
                }
            },
            maybe = shared.pull(), if shared_open => match maybe {
                Some(credit) => credit,
                None => {
                    shared_open = false;
                    continue;
                }
            },
        };

        if let Err(err) = handle_credit(worker_id, &deps, &mut histories, credit, &shutdown).await {
            // The record queue is gone; nothing further to emit.
            warn!(worker_id, %err, "worker exiting");
            break;
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composed_input_includes_history() {
        let history = vec![
            HistoryEntry {
                role: Role::User,
                text: "first".into(),
            },
            HistoryEntry {
                role: Role::Assistant,
                text: "reply".into(),
            },
        ];
        assert_eq!(
            composed_input_text(&history, "second"),
            "first reply second"
        );
        assert_eq!(composed_input_text(&[], "only"), "only");
    }
}
