use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::transport::Session;
use crate::types::Envelope;

/// Handle to a running keep-alive task. The task is cancelled when the handle is stopped or
/// dropped, so a heartbeat can never outlive the session it was started for.
#[derive(Debug, Default)]
pub(crate) struct Heartbeat(Option<CancellationToken>);

impl Heartbeat {
    /// Publish [`Envelope::ping`] on `channel` every `period` through `session`, replacing any
    /// heartbeat that is already running. The first ping goes out one period after the start.
    ///
    /// The task is tied to `parent`: cancelling it stops the heartbeat as well.
    pub(crate) fn start(
        &mut self,
        parent: &CancellationToken,
        session: Arc<dyn Session>,
        channel: String,
        period: Duration,
    ) {
        self.stop();

        let token = parent.child_token();
        let token_clone = token.clone();

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token_clone.cancelled() => {
                        #[cfg(feature = "tracing")]
                        debug!(%channel, "Heartbeat cancellation requested, terminating...");
                        break
                    },
                    _ = ticker.tick() => {
                        if let Err(e) = session.publish(&channel, &Envelope::ping()) {
                            #[cfg(feature = "tracing")]
                            warn!(%channel, error = %e, "Unable to publish heartbeat");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    }
                }
            }
        });

        self.0 = Some(token);
    }

    pub(crate) fn stop(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) const fn is_running(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
