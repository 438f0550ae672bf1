use super::*;

/// Turns node push notifications and the `block_wait_time` fallback poll
/// into a single template-ready signal. Connections fetch their own
/// wallet-addressed templates on each tick; the watch payload is just an
/// epoch counter.
pub(crate) struct Dispatcher {
    node: Arc<dyn NodeClient>,
    block_wait_time: Duration,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        node: Arc<dyn NodeClient>,
        block_wait_time: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node,
            block_wait_time,
            cancel,
        }
    }

    pub(crate) fn spawn(self) -> (watch::Receiver<u64>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(0u64);

        let handle = tokio::spawn(async move {
            let mut notifications = self.node.block_added();
            let mut ticker = interval(self.block_wait_time);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut epoch = 0u64;
            let mut push_alive = true;

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,

                    notification = notifications.recv(), if push_alive => {
                        match notification {
                            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                                // A push beats the poll; push the timer out
                                // so we don't double-fire.
                                ticker.reset();
                                epoch += 1;
                                tx.send_replace(epoch);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                warn!("block-added stream closed, falling back to polling");
                                push_alive = false;
                            }
                        }
                    }

                    _ = ticker.tick() => {
                        epoch += 1;
                        tx.send_replace(epoch);
                    }
                }
            }

            debug!("dispatcher shut down after {epoch} template signals");
        });

        (rx, handle)
    }
}
