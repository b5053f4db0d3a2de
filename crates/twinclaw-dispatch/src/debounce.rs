//! Inbound message debounce buffer (C5, spec §4.2 / Open Question D.3).
//!
//! Rapid-fire inbound messages from the same sender are coalesced into a
//! single buffer and flushed either after `debounce_ms` of inactivity or
//! immediately on arrival of a transcribed voice note, unless
//! `coalesce_audio` asks for the transcript to join the buffer instead.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use twinclaw_common::types::Platform;

#[derive(Debug, Clone)]
pub struct DebounceConfig {
    pub debounce_ms: u64,
    pub coalesce_audio: bool,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 8_000,
            coalesce_audio: false,
        }
    }
}

#[derive(Debug, Clone)]
struct BufferEntry {
    chat_id: String,
    parts: Vec<String>,
    last_touched: Instant,
}

/// Result of pushing an inbound fragment: either the buffer is still
/// accumulating, or an audio fragment arrived and forced an immediate
/// flush of everything collected so far (including the transcript).
pub enum PushOutcome {
    Buffered,
    Flushed(String),
}

type Key = (Platform, String);

pub struct Debouncer {
    buffers: DashMap<Key, BufferEntry>,
    config: DebounceConfig,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            buffers: DashMap::new(),
            config,
        }
    }

    fn key(platform: Platform, sender_id: &str) -> Key {
        (platform, sender_id.to_string())
    }

    fn merge(entry: &BufferEntry) -> String {
        entry.parts.join("\n\n")
    }

    pub fn push_text(&self, platform: Platform, sender_id: &str, chat_id: &str, text: &str) {
        let key = Self::key(platform, sender_id);
        self.buffers
            .entry(key)
            .and_modify(|e| {
                e.parts.push(text.to_string());
                e.last_touched = Instant::now();
            })
            .or_insert_with(|| BufferEntry {
                chat_id: chat_id.to_string(),
                parts: vec![text.to_string()],
                last_touched: Instant::now(),
            });
    }

    /// Pushes a transcribed audio fragment. By default this forces an
    /// immediate flush of the whole buffer (voice notes read as
    /// deliberate, standalone turns); when `coalesce_audio` is set the
    /// transcript instead joins the buffer like any other text fragment.
    pub fn push_audio_transcript(
        &self,
        platform: Platform,
        sender_id: &str,
        chat_id: &str,
        transcript: &str,
    ) -> PushOutcome {
        if self.config.coalesce_audio {
            self.push_text(platform, sender_id, chat_id, transcript);
            return PushOutcome::Buffered;
        }

        self.push_text(platform, sender_id, chat_id, transcript);
        match self.flush(platform, sender_id) {
            Some(merged) => PushOutcome::Flushed(merged),
            None => PushOutcome::Buffered,
        }
    }

    /// Removes and merges the buffer for `(platform, sender_id)`, if any.
    pub fn flush(&self, platform: Platform, sender_id: &str) -> Option<String> {
        let key = Self::key(platform, sender_id);
        self.buffers.remove(&key).map(|(_, entry)| Self::merge(&entry))
    }

    /// Scans every open buffer and flushes the ones idle for at least
    /// `debounce_ms`, returning `(platform, sender_id, chat_id, merged_text)`
    /// tuples ready to hand off to the chunker.
    pub fn sweep_due(&self) -> Vec<(Platform, String, String, String)> {
        let threshold = Duration::from_millis(self.config.debounce_ms);
        let due: Vec<Key> = self
            .buffers
            .iter()
            .filter(|entry| entry.last_touched.elapsed() >= threshold)
            .map(|entry| entry.key().clone())
            .collect();

        let mut flushed = Vec::with_capacity(due.len());
        for key in due {
            if let Some((_, entry)) = self.buffers.remove(&key) {
                let merged = Self::merge(&entry);
                flushed.push((key.0, key.1, entry.chat_id, merged));
            }
        }
        flushed
    }

    pub fn open_buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_pushes_accumulate_into_one_buffer() {
        let debouncer = Debouncer::new(DebounceConfig::default());
        debouncer.push_text(Platform::Whatsapp, "user1", "chat1", "hello");
        debouncer.push_text(Platform::Whatsapp, "user1", "chat1", "there");
        assert_eq!(debouncer.open_buffer_count(), 1);

        let merged = debouncer.flush(Platform::Whatsapp, "user1").unwrap();
        assert_eq!(merged, "hello\n\nthere");
        assert_eq!(debouncer.open_buffer_count(), 0);
    }

    #[test]
    fn flushing_an_unknown_sender_returns_none() {
        let debouncer = Debouncer::new(DebounceConfig::default());
        assert!(debouncer.flush(Platform::Telegram, "ghost").is_none());
    }

    #[test]
    fn audio_flushes_immediately_by_default() {
        let debouncer = Debouncer::new(DebounceConfig::default());
        debouncer.push_text(Platform::Whatsapp, "user1", "chat1", "typed first");
        let outcome = debouncer.push_audio_transcript(Platform::Whatsapp, "user1", "chat1", "spoken second");
        match outcome {
            PushOutcome::Flushed(merged) => {
                assert_eq!(merged, "typed first\n\nspoken second");
            }
            PushOutcome::Buffered => panic!("expected audio to force a flush"),
        }
        assert_eq!(debouncer.open_buffer_count(), 0);
    }

    #[test]
    fn coalesce_audio_keeps_the_transcript_in_the_buffer() {
        let debouncer = Debouncer::new(DebounceConfig {
            debounce_ms: 8_000,
            coalesce_audio: true,
        });
        debouncer.push_text(Platform::Whatsapp, "user1", "chat1", "typed first");
        let outcome = debouncer.push_audio_transcript(Platform::Whatsapp, "user1", "chat1", "spoken second");
        assert!(matches!(outcome, PushOutcome::Buffered));
        assert_eq!(debouncer.open_buffer_count(), 1);
    }

    #[test]
    fn sweep_due_only_flushes_buffers_past_the_idle_threshold() {
        let debouncer = Debouncer::new(DebounceConfig {
            debounce_ms: 0,
            coalesce_audio: false,
        });
        debouncer.push_text(Platform::Whatsapp, "user1", "chat1", "hi");
        let flushed = debouncer.sweep_due();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].3, "hi");
        assert_eq!(debouncer.open_buffer_count(), 0);
    }
}
