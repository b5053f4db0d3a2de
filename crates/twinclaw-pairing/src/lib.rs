//! Sender allow-listing and pairing-code approval flow (C3, spec §4.1).

mod error;

pub use error::{PairingError, PairingResult};

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use twinclaw_common::Platform;
use twinclaw_store::pairing::PairingRequest;
use twinclaw_store::Store;

/// Channel-specific sender-id normalization: WhatsApp ids arrive as
/// `+<digits>` or with punctuation from different gateway libraries;
/// Telegram ids are already bare numeric strings but may carry leading
/// zeros-stripped variants depending on the client. Normalizing here means
/// the allow-list and pairing tables never hold two entries for the same
/// human.
pub fn normalize_sender_id(platform: Platform, raw: &str) -> String {
    match platform {
        Platform::Whatsapp => raw.chars().filter(|c| c.is_ascii_digit()).collect(),
        Platform::Telegram => raw.trim().to_string(),
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000u32))
}

/// Result of `RequestPairing` (spec §4.1). At most one pending request may
/// exist per `(platform, senderId)`: a sender who messages again before
/// approving gets the existing code back rather than a new one.
#[derive(Debug, Clone)]
pub enum PairingOutcome {
    /// A new pairing request was minted; the caller should challenge the
    /// sender with its code.
    Created(PairingRequest),
    /// This sender already has a pending request; the caller stays silent.
    AlreadyPending(PairingRequest),
    /// This sender is already approved; no challenge is issued.
    AlreadyApproved,
    /// The channel is at `max_pending_per_channel`; no challenge is issued.
    RateLimited,
}

#[derive(Clone)]
pub struct PairingService {
    store: Store,
    max_pending_per_channel: usize,
}

impl PairingService {
    pub fn new(store: Store, max_pending_per_channel: usize) -> Self {
        Self {
            store,
            max_pending_per_channel,
        }
    }

    /// `SeedAllowFrom` — apply an operator-supplied static allow-list at
    /// startup. Each entry is normalized the same way a live pairing would
    /// be, so config-seeded and pairing-approved entries are never
    /// duplicated under different spellings.
    pub async fn seed_allow_from(&self, entries: &[(Platform, String)]) -> PairingResult<()> {
        for (platform, raw_sender_id) in entries {
            let sender_id = normalize_sender_id(*platform, raw_sender_id);
            self.store.pairing().seed_allow(*platform, &sender_id).await?;
        }
        Ok(())
    }

    pub async fn is_approved(&self, platform: Platform, raw_sender_id: &str) -> PairingResult<bool> {
        let sender_id = normalize_sender_id(platform, raw_sender_id);
        Ok(self.store.pairing().is_approved(platform, &sender_id).await?)
    }

    /// `RequestPairing` — at most one pending request per `(platform,
    /// senderId)`: an already-approved sender needs no challenge, an
    /// already-pending sender gets its existing code back, and only a
    /// genuinely new sender mints a fresh one. Bounded by
    /// `max_pending_per_channel` so a flood of pairing attempts cannot grow
    /// the table unboundedly.
    pub async fn request_pairing(
        &self,
        platform: Platform,
        raw_sender_id: &str,
    ) -> PairingResult<PairingOutcome> {
        let sender_id = normalize_sender_id(platform, raw_sender_id);
        let repo = self.store.pairing();

        if repo.is_approved(platform, &sender_id).await? {
            return Ok(PairingOutcome::AlreadyApproved);
        }

        if let Some(existing) = repo.find_pending(platform, &sender_id).await? {
            return Ok(PairingOutcome::AlreadyPending(existing));
        }

        if repo.count_pending(platform).await? >= self.max_pending_per_channel as u64 {
            return Ok(PairingOutcome::RateLimited);
        }

        for _ in 0..10 {
            let code = generate_code();
            if repo.code_in_use(&code).await? {
                continue;
            }
            let request = repo.create_request(platform, &sender_id, &code).await?;
            info!(platform = %platform, "issued pairing code");
            return Ok(PairingOutcome::Created(request));
        }

        warn!("exhausted pairing code generation attempts, code space likely saturated");
        Err(PairingError::CodeSpaceExhausted)
    }

    /// `Approve` — an operator or the allow-listed sender confirms the
    /// code out of band. Constant-time-ish from the caller's perspective:
    /// lookup is by unique index, not a linear scan, so there's no timing
    /// signal proportional to how close a guess is.
    pub async fn approve(&self, code: &str) -> PairingResult<PairingRequest> {
        self.store
            .pairing()
            .approve(code)
            .await?
            .ok_or(PairingError::InvalidCode)
    }

    /// Background sweep marking lapsed pairing requests `expired` so a
    /// stale code can never be approved and `count_pending` stays accurate.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.store.pairing().sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "swept expired pairing requests"),
                    Err(e) => warn!(error = %e, "pairing sweep failed"),
                }
            }
        })
    }
}
