//! Inbound message pipeline: pairing gate, debounce, chunking, and
//! hand-off to the agent gateway (C5 + C6 + C8, spec §4.2).
//!
//! [`Dispatcher::on_inbound`] is the single entry point an adapter calls
//! for every normalized inbound event. It never talks to a platform
//! client directly: unapproved senders get a pairing-code reply queued
//! through [`twinclaw_delivery`], approved senders get debounced and
//! eventually chunked text handed to whatever [`Gateway`] the binary
//! wires up.

mod chunker;
mod debounce;
mod error;

pub use chunker::Boundary;
pub use debounce::{DebounceConfig, PushOutcome};
pub use error::{DispatchError, DispatchResult};

use async_trait::async_trait;
use debounce::Debouncer;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use twinclaw_common::types::InboundMessage;
use twinclaw_common::Platform;
use twinclaw_delivery::DeliveryProcessor;
use twinclaw_pairing::{PairingOutcome, PairingService};

/// How the dispatcher treats a sender with no allow-list entry. Translated
/// from `PairingConfig::policy` (a raw config string) at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPolicy {
    /// Issue a pairing code and challenge the sender.
    Pairing,
    /// Drop the message silently; only pre-seeded senders are ever served.
    Allowlist,
}

impl PairingPolicy {
    pub fn parse(s: &str) -> Self {
        match s {
            "allowlist" => PairingPolicy::Allowlist,
            _ => PairingPolicy::Pairing,
        }
    }
}

/// Turns a recorded voice note into text. Implemented by whatever speech
/// backend the binary configures; out of scope for this crate.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &str) -> anyhow::Result<String>;
}

/// Hands a flushed, chunked reply off to the agent brain. Implemented by
/// the binary; this crate only knows how to produce the chunks.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn dispatch(
        &self,
        platform: Platform,
        chat_id: &str,
        sender_id: &str,
        chunks: Vec<String>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub boundary: Boundary,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: 200,
            max_chars: 1_600,
            boundary: Boundary::Paragraph,
        }
    }
}

/// Exact wire text for the one-time pairing challenge (spec §6 wire
/// formats). Tested directly so the literal format can't drift silently.
fn pairing_challenge_body(platform: Platform, code: &str) -> String {
    format!(
        "[TwinClaw] Pairing required before I can process your messages on {platform}.\nRun: twinclaw pairing approve {platform} {code}"
    )
}

pub struct Dispatcher {
    pairing: Arc<PairingService>,
    pairing_policy: PairingPolicy,
    delivery: Arc<DeliveryProcessor>,
    debouncer: Debouncer,
    transcriber: Option<Arc<dyn Transcriber>>,
    gateway: Arc<dyn Gateway>,
    chunker_config: ChunkerConfig,
    sweep_interval: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pairing: Arc<PairingService>,
        pairing_policy: PairingPolicy,
        delivery: Arc<DeliveryProcessor>,
        debounce_config: DebounceConfig,
        transcriber: Option<Arc<dyn Transcriber>>,
        gateway: Arc<dyn Gateway>,
        chunker_config: ChunkerConfig,
        sweep_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            pairing,
            pairing_policy,
            delivery,
            debouncer: Debouncer::new(debounce_config),
            transcriber,
            gateway,
            chunker_config,
            sweep_interval,
        })
    }

    /// Entry point for every inbound event. Unapproved senders receive a
    /// pairing-code reply and nothing else happens; approved senders have
    /// their fragment (transcribing audio first if present) folded into
    /// the debounce buffer, which may flush immediately for a voice note.
    pub async fn on_inbound(&self, message: &InboundMessage) -> DispatchResult<()> {
        if !self.pairing.is_approved(message.platform, &message.sender_id).await? {
            if self.pairing_policy == PairingPolicy::Allowlist {
                return Ok(());
            }

            let outcome = self.pairing.request_pairing(message.platform, &message.sender_id).await?;
            if let PairingOutcome::Created(request) = outcome {
                let body = pairing_challenge_body(message.platform, &request.code);
                self.delivery
                    .enqueue(message.platform, &message.chat_id, &body, None)
                    .await?;
            }
            return Ok(());
        }

        if let Some(audio_path) = &message.audio_path {
            let transcript = match &self.transcriber {
                Some(t) => t.transcribe(audio_path).await.unwrap_or_else(|e| {
                    warn!(error = %e, "transcription failed, forwarding raw placeholder");
                    String::from("[voice note could not be transcribed]")
                }),
                None => String::from("[voice note received, transcription disabled]"),
            };

            let outcome = self.debouncer.push_audio_transcript(
                message.platform,
                &message.sender_id,
                &message.chat_id,
                &transcript,
            );
            if let PushOutcome::Flushed(merged) = outcome {
                self.flush_to_gateway(message.platform, &message.sender_id, &message.chat_id, &merged)
                    .await?;
            }
            return Ok(());
        }

        if let Some(text) = &message.text {
            self.debouncer
                .push_text(message.platform, &message.sender_id, &message.chat_id, text);
        }

        Ok(())
    }

    async fn flush_to_gateway(
        &self,
        platform: Platform,
        sender_id: &str,
        chat_id: &str,
        merged: &str,
    ) -> DispatchResult<()> {
        let chunks = chunker::chunk(
            merged,
            self.chunker_config.min_chars,
            self.chunker_config.max_chars,
            self.chunker_config.boundary,
        );
        if chunks.is_empty() {
            return Ok(());
        }

        metrics::counter!("twinclaw_dispatch_flushed_total").increment(1);
        if let Err(e) = self.gateway.dispatch(platform, chat_id, sender_id, chunks).await {
            warn!(error = %e, "gateway dispatch failed");
        }
        Ok(())
    }

    /// Periodically sweeps buffers idle past `debounce_ms` and hands each
    /// one to the gateway. Runs for the life of the process.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for (platform, sender_id, chat_id, merged) in self.debouncer.sweep_due() {
                    if let Err(e) = self.flush_to_gateway(platform, &sender_id, &chat_id, &merged).await {
                        warn!(error = %e, platform = %platform, "scheduled flush failed");
                    } else {
                        info!(platform = %platform, sender_id = %sender_id, "flushed debounced buffer");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use twinclaw_delivery::{DeliveryProcessor, DeliveryTuning, Sender};
    use twinclaw_pairing::PairingService;
    use twinclaw_store::Store;

    struct NullSender;
    #[async_trait]
    impl Sender for NullSender {
        async fn send(&self, _platform: Platform, _chat_id: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct RecordingGateway {
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn dispatch(
            &self,
            _platform: Platform,
            chat_id: &str,
            _sender_id: &str,
            chunks: Vec<String>,
        ) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push((chat_id.to_string(), chunks));
            Ok(())
        }
    }

    async fn dispatcher(gateway: Arc<RecordingGateway>) -> (Arc<Dispatcher>, Arc<PairingService>) {
        dispatcher_with_policy(gateway, PairingPolicy::Pairing).await
    }

    async fn dispatcher_with_policy(
        gateway: Arc<RecordingGateway>,
        pairing_policy: PairingPolicy,
    ) -> (Arc<Dispatcher>, Arc<PairingService>) {
        let store = Store::connect_memory().await.unwrap();
        store.init_schema().await.unwrap();
        let pairing = Arc::new(PairingService::new(store.clone(), 5));
        let delivery = DeliveryProcessor::new(store, Arc::new(NullSender), DeliveryTuning::default());
        let dispatcher = Dispatcher::new(
            pairing.clone(),
            pairing_policy,
            delivery,
            DebounceConfig::default(),
            None,
            gateway,
            ChunkerConfig::default(),
            Duration::from_secs(5),
        );
        (dispatcher, pairing)
    }

    fn text_message(sender_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            platform: Platform::Telegram,
            sender_id: sender_id.to_string(),
            chat_id: format!("chat-{sender_id}"),
            text: Some(text.to_string()),
            audio_path: None,
            raw_payload: serde_json::json!({}),
        }
    }

    #[test]
    fn pairing_challenge_body_matches_the_documented_wire_format() {
        let body = pairing_challenge_body(Platform::Telegram, "482917");
        assert_eq!(
            body,
            "[TwinClaw] Pairing required before I can process your messages on telegram.\nRun: twinclaw pairing approve telegram 482917"
        );
    }

    #[tokio::test]
    async fn unapproved_sender_gets_a_pairing_reply_and_nothing_is_buffered() {
        let gateway = Arc::new(RecordingGateway { calls: Mutex::new(vec![]) });
        let (dispatcher, _pairing) = dispatcher(gateway.clone()).await;

        dispatcher.on_inbound(&text_message("stranger", "hi")).await.unwrap();

        let stats = dispatcher.delivery.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_inbound_before_approval_does_not_mint_a_second_code() {
        let gateway = Arc::new(RecordingGateway { calls: Mutex::new(vec![]) });
        let (dispatcher, pairing) = dispatcher(gateway.clone()).await;

        dispatcher.on_inbound(&text_message("stranger", "hi")).await.unwrap();
        dispatcher.on_inbound(&text_message("stranger", "hi again")).await.unwrap();

        // only the first message produced a challenge; the second found an
        // already-pending request and stayed silent
        let stats = dispatcher.delivery.stats().await.unwrap();
        assert_eq!(stats.pending, 1);

        let outcome = pairing.request_pairing(Platform::Telegram, "stranger").await.unwrap();
        assert!(matches!(outcome, PairingOutcome::AlreadyPending(_)));
    }

    #[tokio::test]
    async fn allowlist_policy_drops_unapproved_senders_without_a_challenge() {
        let gateway = Arc::new(RecordingGateway { calls: Mutex::new(vec![]) });
        let (dispatcher, pairing) = dispatcher_with_policy(gateway.clone(), PairingPolicy::Allowlist).await;

        dispatcher.on_inbound(&text_message("stranger", "hi")).await.unwrap();

        let stats = dispatcher.delivery.stats().await.unwrap();
        assert_eq!(stats.pending, 0);

        // the allowlist policy never calls RequestPairing, so this is the
        // first request ever made for this sender and mints a fresh code
        let outcome = pairing.request_pairing(Platform::Telegram, "stranger").await.unwrap();
        assert!(matches!(outcome, PairingOutcome::Created(_)));
    }

    #[tokio::test]
    async fn approved_sender_text_is_buffered_until_flushed() {
        let gateway = Arc::new(RecordingGateway { calls: Mutex::new(vec![]) });
        let (dispatcher, pairing) = dispatcher(gateway.clone()).await;
        pairing
            .seed_allow_from(&[(Platform::Telegram, "friend".to_string())])
            .await
            .unwrap();

        dispatcher.on_inbound(&text_message("friend", "hello")).await.unwrap();
        dispatcher.on_inbound(&text_message("friend", "world")).await.unwrap();
        assert!(gateway.calls.lock().unwrap().is_empty());

        let merged = dispatcher.debouncer.flush(Platform::Telegram, "friend").unwrap();
        dispatcher
            .flush_to_gateway(Platform::Telegram, "friend", "chat-friend", &merged)
            .await
            .unwrap();

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1[0].contains("hello"));
        assert!(calls[0].1[0].contains("world"));
    }

    #[tokio::test]
    async fn voice_note_without_a_transcriber_flushes_a_placeholder() {
        let gateway = Arc::new(RecordingGateway { calls: Mutex::new(vec![]) });
        let (dispatcher, pairing) = dispatcher(gateway.clone()).await;
        pairing
            .seed_allow_from(&[(Platform::Telegram, "friend".to_string())])
            .await
            .unwrap();

        let message = InboundMessage {
            platform: Platform::Telegram,
            sender_id: "friend".to_string(),
            chat_id: "chat-friend".to_string(),
            text: None,
            audio_path: Some("/tmp/voice.ogg".to_string()),
            raw_payload: serde_json::json!({}),
        };
        dispatcher.on_inbound(&message).await.unwrap();

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1[0].contains("transcription disabled"));
    }
}
