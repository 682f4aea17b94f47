//! Ingress for command envelopes received off the fabric.

use tracing::debug;

use walletbridge_client::{Transport, WalletStore};
use walletbridge_types::Envelope;

use crate::session::SessionRegistry;

/// Decode and validate one raw message, then hand it to the user's session
/// queue. Malformed input is dropped here so a poisoned topic can never
/// stall processing.
pub fn handle_message<S: WalletStore, T: Transport>(
    registry: &SessionRegistry<S, T>,
    raw: &str,
) {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            registry.metrics().record_invalid();
            debug!(error = %err, "discarding undecodable envelope");
            return;
        }
    };
    let command = match envelope {
        Envelope::Command(command) => command,
        // Update broadcasts circulate for front-ends; nodes ignore them.
        Envelope::Update(_) => return,
    };
    if let Err(err) = command.validate() {
        registry.metrics().record_invalid();
        debug!(error = %err, "discarding malformed command");
        return;
    }
    registry.submit_command(command);
}
