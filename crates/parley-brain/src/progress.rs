//! User-facing feedback while a request runs: the delayed "working on it"
//! acknowledgement, its periodic elapsed-time edits, and the typing indicator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use parley_core::types::{ChatId, MessageId};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{Format, Transport};

/// Recent request durations, shared by all users, used only to estimate ETAs.
#[derive(Debug)]
pub struct TimingHistory {
    samples: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl TimingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append a duration, evicting the oldest once full.
    pub fn record(&self, duration: Duration) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(duration);
    }

    pub fn mean(&self) -> Option<Duration> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Human ETA from the mean duration, or a static range when nothing is known yet.
pub fn format_eta(mean: Option<Duration>) -> String {
    match mean {
        None => "1–3 minutes".to_string(),
        Some(d) if d.as_secs() < 60 => format!("~{}s", d.as_secs().max(1)),
        Some(d) => {
            let minutes = (d.as_secs() + 30) / 60;
            format!("~{minutes} min")
        }
    }
}

/// `Xs` under a minute, `XmYs` otherwise.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

pub fn ack_text(eta: &str) -> String {
    format!("⏳ Working on it… this usually takes {eta}.")
}

pub fn update_text(elapsed: Duration) -> String {
    format!("⏳ Still working… {} elapsed.", format_elapsed(elapsed))
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressSettings {
    pub ack_delay: Duration,
    pub update_interval: Duration,
}

/// Owns the acknowledgement message for one in-flight request.
///
/// Nothing is sent if the request finishes within `ack_delay`. Once sent, the
/// acknowledgement is edited every `update_interval` and deleted on [`stop`].
/// Dropping the notifier without calling `stop` still cancels it; the cleanup
/// then finishes in the background.
///
/// [`stop`]: ProgressNotifier::stop
pub struct ProgressNotifier {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressNotifier {
    pub fn start(
        transport: Arc<dyn Transport>,
        chat_id: ChatId,
        eta: String,
        settings: ProgressSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let handle = tokio::spawn(run_notifier(
            transport,
            chat_id,
            eta,
            settings,
            started,
            cancel.clone(),
        ));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel both timers and wait until the acknowledgement (if any) is gone.
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressNotifier {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_notifier(
    transport: Arc<dyn Transport>,
    chat_id: ChatId,
    eta: String,
    settings: ProgressSettings,
    started: Instant,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(settings.ack_delay) => {}
    }

    let ack_id: MessageId = match transport
        .send(chat_id, &ack_text(&eta), Format::Plain, &[])
        .await
    {
        Ok(id) => id,
        Err(e) => {
            debug!(chat_id, error = %e, "progress acknowledgement not sent");
            return;
        }
    };

    let mut ticker = tokio::time::interval_at(
        Instant::now() + settings.update_interval,
        settings.update_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let text = update_text(started.elapsed());
                if let Err(e) = transport.edit(chat_id, ack_id, &text).await {
                    debug!(chat_id, error = %e, "progress edit failed");
                }
            }
        }
    }

    if let Err(e) = transport.delete(chat_id, ack_id).await {
        debug!(chat_id, error = %e, "progress acknowledgement not deleted");
    }
}

/// Re-sends the typing indicator on a fixed interval until stopped.
pub struct TypingHeartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TypingHeartbeat {
    pub fn start(transport: Arc<dyn Transport>, chat_id: ChatId, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let _ = transport.typing(chat_id).await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TypingHeartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, Outbound};

    fn settings() -> ProgressSettings {
        ProgressSettings {
            ack_delay: Duration::from_secs(3),
            update_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let history = TimingHistory::new(2);
        history.record(Duration::from_secs(100));
        history.record(Duration::from_secs(10));
        history.record(Duration::from_secs(20));
        assert_eq!(history.len(), 2);
        assert_eq!(history.mean(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_history_empty_mean() {
        assert!(TimingHistory::new(5).mean().is_none());
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "1–3 minutes");
        assert_eq!(format_eta(Some(Duration::from_secs(42))), "~42s");
        assert_eq!(format_eta(Some(Duration::from_millis(300))), "~1s");
        assert_eq!(format_eta(Some(Duration::from_secs(150))), "~3 min");
        assert_eq!(format_eta(Some(Duration::from_secs(60))), "~1 min");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "59s");
        assert_eq!(format_elapsed(Duration::from_secs(60)), "1m0s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m5s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ack_when_stopped_before_delay() {
        let transport = Arc::new(MockTransport::new());
        let mut notifier =
            ProgressNotifier::start(transport.clone(), 1, "~5s".to_string(), settings());

        tokio::time::sleep(Duration::from_secs(2)).await;
        notifier.stop().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(transport.outbound().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_sent_once_edited_each_period_then_deleted() {
        let transport = Arc::new(MockTransport::new());
        let mut notifier =
            ProgressNotifier::start(transport.clone(), 1, "~5s".to_string(), settings());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(transport.sent_texts().len(), 1);
        assert!(transport.sent_texts()[0].contains("~5s"));

        tokio::time::sleep(Duration::from_secs(121)).await;
        notifier.stop().await;

        let outbound = transport.outbound();
        let sends = outbound
            .iter()
            .filter(|o| matches!(o, Outbound::Send { .. }))
            .count();
        let edits: Vec<&String> = outbound
            .iter()
            .filter_map(|o| match o {
                Outbound::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(sends, 1);
        assert_eq!(edits.len(), 2);
        assert!(edits[0].contains("1m3s"));
        assert!(edits[1].contains("2m3s"));
        assert!(matches!(outbound.last(), Some(Outbound::Delete { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_edit_failures_swallowed() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_edits(true);
        let mut notifier =
            ProgressNotifier::start(transport.clone(), 1, "~5s".to_string(), settings());

        tokio::time::sleep(Duration::from_secs(70)).await;
        notifier.stop().await;
        notifier.stop().await;

        let deletes = transport
            .outbound()
            .iter()
            .filter(|o| matches!(o, Outbound::Delete { .. }))
            .count();
        assert_eq!(deletes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_repeats_until_stopped() {
        let transport = Arc::new(MockTransport::new());
        let mut typing = TypingHeartbeat::start(transport.clone(), 1, Duration::from_secs(4));

        tokio::time::sleep(Duration::from_secs(9)).await;
        typing.stop().await;
        let before = transport.typing_count();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(before, 3);
        assert_eq!(transport.typing_count(), before);
    }
}
