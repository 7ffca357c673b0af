//! Background voltage sampling.
//!
//! A spawned task measures one pin pair at a fixed interval and pushes the
//! readings into a bounded channel, so a UI or logger can consume a live
//! feed without blocking the measurement loop.

use std::sync::Arc;
use std::time::Duration;

use benchlib_core::types::{CardSelect, PerCard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::BsiClient;

/// One periodic voltage reading.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSample {
    /// Monotonic sample counter, starting at 1.
    pub seq: u64,
    /// The reading, shaped by the sampler's card selection.
    pub value: PerCard<f64>,
}

/// Handle to a running sampler task.
pub struct SamplerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Signal the sampler to stop and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a task that measures `high_pin`/`low_pin` every `interval` and
/// pushes [`VoltageSample`]s into the returned channel.
///
/// The channel holds at most `capacity` unread samples; the sampler waits
/// for room rather than dropping readings. The task ends when
/// [`SamplerHandle::stop`] is called or the receiver is dropped. A failed
/// measurement is logged and skipped; sampling continues.
pub fn spawn_voltage_sampler(
    client: Arc<BsiClient>,
    high_pin: &str,
    low_pin: &str,
    card: CardSelect,
    interval: Duration,
    capacity: usize,
) -> (SamplerHandle, mpsc::Receiver<VoltageSample>) {
    let (sample_tx, sample_rx) = mpsc::channel(capacity);
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let high = high_pin.to_string();
    let low = low_pin.to_string();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut seq = 0u64;

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    match client.voltage(&high, &low, card).await {
                        Ok(value) => {
                            seq += 1;
                            if sample_tx.send(VoltageSample { seq, value }).await.is_err() {
                                // Receiver gone, nobody is listening.
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, high = %high, low = %low, "Sample failed");
                        }
                    }
                }
            }
        }
        tracing::debug!(high = %high, low = %low, "Voltage sampler stopped");
    });

    (
        SamplerHandle {
            stop_tx: Some(stop_tx),
            task,
        },
        sample_rx,
    )
}
