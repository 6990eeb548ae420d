use crate::{CorrelationId, RpcError};
use bytes::Bytes;
use tokio::sync::oneshot;

/// Single-slot holder for the one outstanding request of a client.
///
/// The slot is armed with a correlation token and a one-shot sender per
/// attempt. The receive task fulfils it at most once, and only with a reply
/// whose correlation id equals the armed token. Everything else is ignored.
///
/// Once the reply subscription ends the slot is closed for good and any
/// further `arm()` fails with [`RpcError::ConnectionLost`].
pub(super) struct PendingSlot {
    // ---
    armed: Option<(CorrelationId, oneshot::Sender<Bytes>)>,
    closed: bool,
}

impl PendingSlot {
    // ---
    pub fn new() -> Self {
        // ---
        Self {
            armed: None,
            closed: false,
        }
    }

    /// Arm the slot for `correlation_id`, replacing any previous token.
    ///
    /// Returns the receiver the caller awaits for the matching reply.
    pub fn arm(
        &mut self,
        correlation_id: CorrelationId,
    ) -> Result<oneshot::Receiver<Bytes>, RpcError> {
        // ---
        if self.closed {
            return Err(RpcError::ConnectionLost);
        }

        let (tx, rx) = oneshot::channel();
        self.armed = Some((correlation_id, tx));
        Ok(rx)
    }

    /// Deliver `payload` if `correlation_id` matches the armed token.
    ///
    /// Returns true if the reply was accepted; the slot is empty afterwards.
    pub fn fulfill(&mut self, correlation_id: &str, payload: Bytes) -> bool {
        // ---
        let matches = matches!(&self.armed, Some((id, _)) if id.matches(correlation_id));
        if !matches {
            return false;
        }

        match self.armed.take() {
            Some((_, tx)) => {
                // Receiver may already be gone after a timeout.
                let _ = tx.send(payload);
                true
            }
            None => false,
        }
    }

    /// Disarm without delivering, e.g. after a timeout.
    pub fn clear(&mut self) {
        // ---
        self.armed = None;
    }

    /// Mark the reply subscription as ended. Drops any armed sender so a
    /// waiting caller wakes up.
    pub fn close(&mut self) {
        // ---
        self.armed = None;
        self.closed = true;
    }

    pub fn is_armed(&self) -> bool {
        // ---
        self.armed.is_some()
    }
}
