//! Read-modify-write of one wallet profile over the versioned store.
//!
//! The store only offers optimistic concurrency, so the transactional
//! update is emulated: read the profile and its version, rebuild the ring
//! from the freshly read records, apply, and write conditionally. A version
//! conflict re-runs the whole cycle so a competing write can never be
//! double-counted.

use chrono::Utc;
use tracing::debug;

use walletbridge_client::backoff::sampled_backoff;
use walletbridge_client::{StoreError, WalletStore};
use walletbridge_ledger::{apply, ApplyOutcome, ProcessedRing, RING_CAPACITY};
use walletbridge_types::{TransactionCommand, WalletProfile};

#[derive(Clone, Debug)]
pub struct MutationResult {
    pub outcome: ApplyOutcome,
    /// Profile as persisted after the attempt (unchanged on replay).
    pub profile: WalletProfile,
}

pub async fn apply_command<S: WalletStore>(
    store: &S,
    command: &TransactionCommand,
    max_retries: u32,
) -> Result<MutationResult, StoreError> {
    let mut attempt = 0;
    loop {
        let versioned = store.read_profile(&command.user_id).await?;
        let (balance, records) = match versioned.profile {
            Some(profile) => (profile.balance, profile.processed),
            None => (0, Vec::new()),
        };
        let mut ring = ProcessedRing::with_records(RING_CAPACITY, records)
            .map_err(|err| StoreError::Permanent(err.to_string()))?;

        let outcome = apply(balance, command, &mut ring, Utc::now().timestamp_millis());
        if !outcome.inserted {
            let profile = WalletProfile {
                balance,
                processed: ring.oldest_first(),
            };
            return Ok(MutationResult { outcome, profile });
        }

        let profile = WalletProfile {
            balance: outcome.balance,
            processed: ring.oldest_first(),
        };
        match store
            .write_profile(&command.user_id, &profile, versioned.version)
            .await
        {
            Ok(_) => return Ok(MutationResult { outcome, profile }),
            Err(StoreError::VersionConflict) => {
                attempt += 1;
                if attempt >= max_retries.max(1) {
                    return Err(StoreError::Transient(format!(
                        "conditional write for {} lost {attempt} races",
                        command.user_id
                    )));
                }
                debug!(
                    user_id = %command.user_id,
                    txn_id = %command.txn_id,
                    attempt,
                    "version conflict; re-reading profile"
                );
                tokio::time::sleep(sampled_backoff(attempt - 1)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
