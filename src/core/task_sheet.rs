use crate::models::error::SError;
use crate::models::events::{SheetEvent, SheetState, SheetSummary};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Cooperative cancellation shared between a sheet and whoever wants to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs one worker per item with bounded concurrency.
///
/// Workers run on the runtime and only return values; `apply` runs on the
/// task awaiting [`TaskSheet::run`], so it is the only place state gets
/// written. A sheet can be run again once finished.
#[derive(Debug)]
pub struct TaskSheet {
    state: SheetState,
    limit: usize,
    cancel: CancelFlag,
}

impl TaskSheet {
    pub fn new(limit: usize) -> Self {
        Self::with_cancel(limit, CancelFlag::default())
    }

    pub fn with_cancel(limit: usize, cancel: CancelFlag) -> Self {
        Self {
            state: SheetState::Idle,
            limit: limit.max(1),
            cancel,
        }
    }

    pub fn state(&self) -> SheetState {
        self.state
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Works through `items`, at most `limit` workers in flight.
    ///
    /// A worker error or a rejected `apply` counts the item as failed. After a
    /// cancel no further worker is spawned; the ones in flight are awaited and
    /// applied, then the sheet finishes as cancelled.
    pub async fn run<I, T, W, Fut, A, E>(
        &mut self,
        items: Vec<I>,
        worker: W,
        mut apply: A,
        mut on_event: E,
    ) -> SheetSummary
    where
        W: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, SError>> + Send + 'static,
        T: Send + 'static,
        A: FnMut(T) -> Result<(), SError>,
        E: FnMut(SheetEvent),
    {
        self.cancel.reset();
        self.state = SheetState::Running;

        let total = items.len();
        let mut summary = SheetSummary {
            total,
            ..SheetSummary::default()
        };
        on_event(SheetEvent::Started { total });

        let mut pending = items.into_iter();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < self.limit && !self.cancel.is_cancelled() {
                let Some(item) = pending.next() else {
                    break;
                };
                in_flight.spawn(worker(item));
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            let outcome = joined
                .map_err(SError::from)
                .and_then(|result| result)
                .and_then(&mut apply);
            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    if e.is_recoverable() {
                        warn!("task failed: {e}");
                    } else {
                        error!("task failed: {e}");
                    }
                    summary.failed += 1;
                }
            }

            on_event(SheetEvent::Progress {
                done: summary.processed(),
                total,
            });
        }

        summary.cancelled = self.cancel.is_cancelled() && summary.processed() < total;
        self.state = if summary.cancelled {
            SheetState::Cancelled
        } else {
            SheetState::Finished
        };
        debug!(
            "sheet done: {}/{} ok, {} failed, cancelled={}",
            summary.succeeded, total, summary.failed, summary.cancelled
        );
        on_event(SheetEvent::Finished(summary));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_successes_and_failures() {
        let mut sheet = TaskSheet::new(3);
        let mut seen = Vec::new();
        let summary = sheet
            .run(
                (0..10).collect(),
                |n: u32| async move {
                    if n % 4 == 0 {
                        Err(SError::NetworkError(format!("item {n}")))
                    } else {
                        Ok(n)
                    }
                },
                |n| {
                    seen.push(n);
                    Ok(())
                },
                |_| {},
            )
            .await;

        assert_eq!(summary.succeeded, 7);
        assert_eq!(summary.failed, 3);
        assert!(!summary.cancelled);
        assert_eq!(sheet.state(), SheetState::Finished);
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 5, 6, 7, 9]);
    }

    #[tokio::test]
    async fn empty_sheet_finishes_immediately() {
        let mut sheet = TaskSheet::new(2);
        let mut events = Vec::new();
        let summary = sheet
            .run(
                Vec::<u8>::new(),
                |n| async move { Ok(n) },
                |_| Ok(()),
                |e| events.push(e),
            )
            .await;
        assert_eq!(summary.total, 0);
        assert_eq!(
            events,
            vec![SheetEvent::Started { total: 0 }, SheetEvent::Finished(summary)]
        );
    }
}
