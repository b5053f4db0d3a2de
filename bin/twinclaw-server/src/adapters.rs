//! Stand-ins for the collaborators the runtime core treats as external:
//! channel clients, the agent/LLM gateway, speech-to-text, and delegated
//! node execution. Each just logs what it would have done; replacing any
//! one of these with a real integration never touches the rest of the
//! binary.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use twinclaw_common::Platform;
use twinclaw_hub::Hub;
use twinclaw_scheduler::JobEventSink;

use crate::doctor::Doctor;

pub struct LoggingSender;

#[async_trait]
impl twinclaw_delivery::Sender for LoggingSender {
    async fn send(&self, platform: Platform, chat_id: &str, body: &str) -> anyhow::Result<()> {
        info!(%platform, chat_id, chars = body.len(), "would send outbound message (no channel adapter configured)");
        Ok(())
    }
}

pub struct LoggingDispatchGateway;

#[async_trait]
impl twinclaw_dispatch::Gateway for LoggingDispatchGateway {
    async fn dispatch(
        &self,
        platform: Platform,
        chat_id: &str,
        sender_id: &str,
        chunks: Vec<String>,
    ) -> anyhow::Result<()> {
        info!(
            %platform,
            chat_id,
            sender_id,
            chunk_count = chunks.len(),
            "would hand chunks to the agent gateway (no gateway configured)"
        );
        Ok(())
    }
}

pub struct LoggingWebhookGateway;

#[async_trait]
impl twinclaw_webhook::Gateway for LoggingWebhookGateway {
    async fn process_text(&self, session_id: &str, text: &str) -> anyhow::Result<()> {
        info!(session_id, text, "would forward webhook summary to the agent gateway (no gateway configured)");
        Ok(())
    }
}

pub struct LoggingNodeExecutor;

#[async_trait]
impl twinclaw_dag::NodeExecutor for LoggingNodeExecutor {
    async fn execute(&self, node_id: &str, brief: &str) -> anyhow::Result<()> {
        info!(node_id, brief, "would execute delegated node (no node executor configured)");
        Ok(())
    }
}

/// Forwards scheduler job lifecycle events onto the `incidents` topic and
/// marks the doctor's scheduler-liveness clock on every emission, so any
/// job firing at all counts as a sign the tick loop is alive.
pub struct HubJobEventSink {
    pub hub: Arc<Hub>,
    pub doctor: Arc<Doctor>,
}

impl JobEventSink for HubJobEventSink {
    fn emit(&self, event_type: &str, job_id: &str, detail: serde_json::Value) {
        self.doctor.record_scheduler_tick();
        self.hub.publish(
            twinclaw_common::Topic::Incidents,
            serde_json::json!({ "event": event_type, "job_id": job_id, "detail": detail }),
        );
    }
}

/// Scheduled digest job (registered with [`twinclaw_scheduler::Scheduler`])
/// that logs current delivery stats. Gives the scheduler something
/// meaningful to drive beyond the components that already tick
/// themselves (pairing sweeper, delivery processor).
pub struct DeliveryDigestJob {
    pub delivery: Arc<twinclaw_delivery::DeliveryProcessor>,
}

#[async_trait]
impl twinclaw_scheduler::JobHandler for DeliveryDigestJob {
    async fn run(&self) -> anyhow::Result<()> {
        let stats = self.delivery.stats().await?;
        info!(
            pending = stats.pending,
            sending = stats.sending,
            retrying = stats.retrying,
            sent = stats.sent,
            failed = stats.failed,
            dead_letter = stats.dead_letter,
            "delivery queue digest"
        );
        Ok(())
    }
}
