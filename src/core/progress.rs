use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use teloxide::RequestError;
use tracing::debug;

use crate::core::scan::{ScanCounters, ScanOutcome, ScanSummary};
use crate::core::store::Destination;

const BAR_CELLS: u32 = 10;

/// Snapshot emitted once per batch, never per message.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub counters: ScanCounters,
    pub scanned: i64,
    pub end_id: i64,
    pub elapsed: Duration,
}

/// Receives per-batch updates and the terminal summary. Implementations must
/// absorb transient failures on `update` (a missed update is not an error);
/// an `Err` from either method marks the sink permanently unusable and
/// aborts the job.
#[async_trait]
pub trait ProgressSink: Send {
    async fn update(&mut self, update: &ProgressUpdate) -> Result<()>;
    async fn finish(&mut self, summary: &ScanSummary) -> Result<()>;
}

pub fn percentage(scanned: i64, end_id: i64) -> f64 {
    if end_id <= 0 {
        // Empty range: nothing to scan means nothing left to scan.
        return 100.0;
    }
    (scanned as f64 / end_id as f64) * 100.0
}

pub fn render_bar(pct: f64) -> String {
    let filled = ((pct / 100.0) * BAR_CELLS as f64).floor() as i64;
    let filled = filled.clamp(0, BAR_CELLS as i64) as usize;
    let mut bar = String::new();
    bar.push_str(&"■".repeat(filled));
    bar.push_str(&"□".repeat(BAR_CELLS as usize - filled));
    bar
}

pub fn readable_time(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut parts = Vec::new();
    if h > 0 {
        parts.push(format!("{}h", h));
    }
    if m > 0 {
        parts.push(format!("{}m", m));
    }
    if s > 0 || parts.is_empty() {
        parts.push(format!("{}s", s));
    }
    parts.join(" ")
}

pub fn render_progress(update: &ProgressUpdate, destination: Destination) -> String {
    let pct = percentage(update.scanned, update.end_id);
    format!(
        "📊 {} Indexing Progress\n\
         {} {:.1}%\n\
         ━━━━━━━━━━━━━━━━\n\
         📥 Scanned: {}/{}\n\
         ✅ Saved: {}\n\
         ♻️ Duplicates: {}\n\
         🗑 Skipped: {}\n\
         ⚠️ Errors: {}\n\
         ⏱ Elapsed: {}",
        destination.label(),
        render_bar(pct),
        pct,
        update.scanned,
        update.end_id,
        update.counters.saved,
        update.counters.duplicate,
        update.counters.skipped(),
        update.counters.errors,
        readable_time(update.elapsed),
    )
}

pub fn render_summary(summary: &ScanSummary, destination: Destination) -> String {
    let headline = match summary.outcome {
        ScanOutcome::Completed => format!("✅ {} Indexing Completed!", destination.label()),
        ScanOutcome::Cancelled => "🛑 Indexing Cancelled!".to_string(),
    };
    let c = &summary.counters;
    format!(
        "{}\n\
         ⏱ Time: {}\n\
         📥 Scanned: {}/{}\n\
         ✅ Saved: {}\n\
         ♻️ Duplicates: {}\n\
         🗑 Skipped: {}\n\
         ⚠️ Errors: {}",
        headline,
        readable_time(summary.elapsed),
        summary.scanned,
        summary.end_id,
        c.saved,
        c.duplicate,
        c.skipped(),
        c.errors,
    )
}

fn cancel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🛑 Cancel",
        "index#cancel",
    )]])
}

/// Edits one bot message in place for the lifetime of a job.
pub struct TelegramSink {
    bot: Bot,
    chat: ChatId,
    status_message: MessageId,
    destination: Destination,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat: ChatId, status_message: MessageId, destination: Destination) -> Self {
        Self {
            bot,
            chat,
            status_message,
            destination,
        }
    }

    async fn edit(&self, text: String, with_cancel: bool) -> Result<(), RequestError> {
        let req = self.bot.edit_message_text(self.chat, self.status_message, text);
        if with_cancel {
            req.reply_markup(cancel_keyboard()).await?;
        } else {
            req.await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for TelegramSink {
    async fn update(&mut self, update: &ProgressUpdate) -> Result<()> {
        match self
            .edit(render_progress(update, self.destination), true)
            .await
        {
            Ok(()) => {}
            Err(RequestError::RetryAfter(wait)) => {
                // Skip this update entirely; the next batch will catch up.
                tokio::time::sleep(wait.duration()).await;
            }
            Err(e) => {
                debug!("progress edit failed, skipping update: {}", e);
            }
        }
        Ok(())
    }

    async fn finish(&mut self, summary: &ScanSummary) -> Result<()> {
        let text = render_summary(summary, self.destination);
        match self.edit(text.clone(), false).await {
            Ok(()) => Ok(()),
            Err(RequestError::RetryAfter(wait)) => {
                tokio::time::sleep(wait.duration()).await;
                self.edit(text, false).await?;
                Ok(())
            }
            // The summary is the one emission that must land.
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(saved: u64, duplicate: u64, errors: u64) -> ScanCounters {
        ScanCounters {
            saved,
            duplicate,
            errors,
            ..Default::default()
        }
    }

    #[test]
    fn percentage_guards_empty_range() {
        assert_eq!(percentage(0, 0), 100.0);
        assert_eq!(percentage(0, -3), 100.0);
        assert_eq!(percentage(50, 200), 25.0);
    }

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(render_bar(0.0), "□□□□□□□□□□");
        assert_eq!(render_bar(50.0), "■■■■■□□□□□");
        assert_eq!(render_bar(100.0), "■■■■■■■■■■");
        // Out-of-range input clamps instead of panicking.
        assert_eq!(render_bar(150.0), "■■■■■■■■■■");
        assert_eq!(render_bar(-5.0), "□□□□□□□□□□");
    }

    #[test]
    fn readable_time_formats() {
        assert_eq!(readable_time(Duration::from_secs(0)), "0s");
        assert_eq!(readable_time(Duration::from_secs(59)), "59s");
        assert_eq!(readable_time(Duration::from_secs(62)), "1m 2s");
        assert_eq!(readable_time(Duration::from_secs(3600)), "1h");
        assert_eq!(readable_time(Duration::from_secs(3723)), "1h 2m 3s");
    }

    #[test]
    fn skipped_combines_three_counters() {
        let c = ScanCounters {
            deleted: 2,
            no_media: 3,
            unsupported: 4,
            ..Default::default()
        };
        assert_eq!(c.skipped(), 9);
    }

    #[test]
    fn progress_text_contains_required_fields() {
        let update = ProgressUpdate {
            counters: counters(10, 2, 1),
            scanned: 40,
            end_id: 80,
            elapsed: Duration::from_secs(65),
        };
        let text = render_progress(&update, Destination::Main);
        assert!(text.contains("50.0%"));
        assert!(text.contains("Scanned: 40/80"));
        assert!(text.contains("Saved: 10"));
        assert!(text.contains("Duplicates: 2"));
        assert!(text.contains("Errors: 1"));
        assert!(text.contains("1m 5s"));
    }

    #[test]
    fn summary_text_marks_outcome() {
        let summary = ScanSummary {
            outcome: ScanOutcome::Cancelled,
            counters: counters(5, 0, 0),
            scanned: 20,
            end_id: 100,
            elapsed: Duration::from_secs(3),
        };
        let text = render_summary(&summary, Destination::Alternate);
        assert!(text.contains("Cancelled"));
        assert!(text.contains("Scanned: 20/100"));

        let done = ScanSummary {
            outcome: ScanOutcome::Completed,
            ..summary
        };
        assert!(render_summary(&done, Destination::Alternate).contains("Alternate Indexing Completed"));
    }
}
