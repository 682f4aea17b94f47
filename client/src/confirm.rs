//! Bounded read-back poll used by front-ends after publishing a command.
//!
//! The ledger is applied by whichever node wins the session, so the
//! publisher confirms by watching the persisted profile. Timing out yields
//! `Unconfirmed` without any rollback: the command may still land later.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use walletbridge_types::ProcessedRecord;

use crate::store::{StoreError, WalletStore};

pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONFIRM_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(ProcessedRecord),
    Unconfirmed,
}

pub async fn await_confirmation<S: WalletStore>(
    store: &S,
    user_id: &str,
    txn_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<Confirmation, StoreError> {
    let deadline = Instant::now() + timeout;
    loop {
        let versioned = store.read_profile(user_id).await?;
        if let Some(profile) = versioned.profile {
            if let Some(record) = profile.processed.iter().find(|r| r.txn_id == txn_id) {
                return Ok(Confirmation::Confirmed(record.clone()));
            }
        }
        if Instant::now() + interval > deadline {
            return Ok(Confirmation::Unconfirmed);
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryStore;
    use walletbridge_types::{ProcessedRecord, TxnSource, WalletProfile};

    fn profile_with(txn_id: &str) -> WalletProfile {
        WalletProfile {
            balance: 5,
            processed: vec![ProcessedRecord {
                txn_id: txn_id.to_string(),
                delta: 5,
                balance_after: 5,
                actor: "ops".to_string(),
                source: TxnSource::Discord,
                reason: None,
                processed_at: 0,
            }],
        }
    }

    #[tokio::test]
    async fn confirms_once_record_is_visible() {
        let store = MemoryStore::default();
        let writer = store.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            writer
                .write_profile("u-1", &profile_with("t-1"), None)
                .await
                .unwrap();
        });

        let confirmation = await_confirmation(
            &store,
            "u-1",
            "t-1",
            Duration::from_secs(2),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        match confirmation {
            Confirmation::Confirmed(record) => assert_eq!(record.balance_after, 5),
            Confirmation::Unconfirmed => panic!("expected confirmation"),
        }
    }

    #[tokio::test]
    async fn times_out_as_unconfirmed() {
        let store = MemoryStore::default();
        let confirmation = await_confirmation(
            &store,
            "u-1",
            "missing",
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(confirmation, Confirmation::Unconfirmed);
    }
}
