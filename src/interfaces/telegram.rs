use anyhow::Result;
use std::sync::Arc;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, Message, MessageOrigin};
use tracing::{error, info};
use url::Url;

use crate::core::archive::{ChatTarget, MessageArchive};
use crate::core::config::Config;
use crate::core::fetcher::BatchFetcher;
use crate::core::progress::TelegramSink;
use crate::core::registry::{JobRegistry, PendingLookup, PendingStep};
use crate::core::scan::ScanJob;
use crate::core::store::{DedupStore, Destination};

const HELP_TEXT: &str = "\
📚 mediadex commands

/index — index a channel's media into the dedup store
/cancel — cancel the running indexing job
/help — this message

During /index: send the channel's last message link (or forward that
message), then the starting offset, then pick a destination.";

/// Everything the update handlers need, shared behind one `Arc`.
pub struct BotContext {
    pub config: Config,
    pub registry: JobRegistry,
    pub archive: Arc<dyn MessageArchive>,
    pub store: Arc<dyn DedupStore>,
}

pub async fn start(ctx: Arc<BotContext>) -> Result<()> {
    let bot = Bot::new(&ctx.config.bot_token);
    info!("starting telegram dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Parse a Telegram message link into its channel and message id.
/// Accepts `https://t.me/c/<internal>/<id>` (private channels, mapped to the
/// `-100…` form) and `https://t.me/<username>/<id>`.
pub fn parse_message_link(text: &str) -> Option<(ChatTarget, i64)> {
    let url = Url::parse(text.trim()).ok()?;
    match url.host_str()? {
        "t.me" | "telegram.me" => {}
        _ => return None,
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["c", internal, msg_id] => {
            if !internal.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let chat_id: i64 = format!("-100{}", internal).parse().ok()?;
            let msg_id: i64 = msg_id.parse().ok()?;
            (msg_id > 0).then_some((ChatTarget::Id(chat_id), msg_id))
        }
        [username, msg_id] => {
            let msg_id: i64 = msg_id.parse().ok()?;
            (msg_id > 0).then_some((ChatTarget::Username(username.to_string()), msg_id))
        }
        _ => None,
    }
}

/// A forwarded channel post carries the source channel and message id in its
/// origin, so forwarding the channel's last message works as an alternative
/// to pasting a link. Forwards from users, bots or hidden senders don't name
/// a channel and are rejected.
pub fn forwarded_channel(origin: &MessageOrigin) -> Option<(ChatTarget, i64)> {
    match origin {
        MessageOrigin::Channel {
            chat, message_id, ..
        } => Some((ChatTarget::Id(chat.id.0), i64::from(message_id.0))),
        _ => None,
    }
}

fn confirm_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("✅ YES", "index#yes")],
        vec![InlineKeyboardButton::callback("❌ CLOSE", "index#close")],
    ])
}

fn destination_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("🎬 Main", "index#start_main"),
            InlineKeyboardButton::callback("🗂 Alternate", "index#start_alternate"),
        ],
        vec![InlineKeyboardButton::callback("❌ No Index", "index#close")],
    ])
}

async fn handle_message(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    // Operators drive the bot from their private chat, where the chat id is
    // the user id. Everything else (groups, channels) is ignored.
    if !msg.chat.is_private() {
        return Ok(());
    }
    let operator = msg.chat.id.0;
    if operator < 0 || !ctx.config.is_admin(operator as u64) {
        return Ok(());
    }
    // Forwards may carry no text at all, so the text is optional past here.
    let text = msg.text().map(str::trim);

    match text {
        Some("/start") | Some("/help") => {
            bot.send_message(msg.chat.id, HELP_TEXT).await?;
            return Ok(());
        }
        Some("/index") => {
            if ctx.registry.is_busy() {
                bot.send_message(
                    msg.chat.id,
                    "⚠️ An indexing job is already running. Wait until it finishes.",
                )
                .await?;
                return Ok(());
            }
            ctx.registry.begin_pending(operator).await;
            bot.send_message(
                msg.chat.id,
                "Send the channel's last message link\n(https://t.me/c/…/… or https://t.me/<name>/…)\nor forward that message here.",
            )
            .await?;
            return Ok(());
        }
        Some("/cancel") => {
            ctx.registry.cancel(operator).await;
            bot.send_message(msg.chat.id, "🛑 Cancellation requested.").await?;
            return Ok(());
        }
        _ => {}
    }

    match ctx.registry.pending_step(operator).await {
        PendingLookup::Step(PendingStep::AwaitSource) => {
            let source = msg
                .forward_origin()
                .and_then(forwarded_channel)
                .or_else(|| text.and_then(parse_message_link));
            match source {
                Some((chat, end_id)) => {
                    ctx.registry.set_source(operator, chat.clone(), end_id).await;
                    bot.send_message(
                        msg.chat.id,
                        format!(
                            "Channel {} — {} messages.\nNow send the starting offset (0 to scan everything).",
                            chat, end_id
                        ),
                    )
                    .await?;
                }
                None => {
                    bot.send_message(
                        msg.chat.id,
                        "❌ Invalid source. Send a https://t.me/… link or forward the channel's last message.",
                    )
                    .await?;
                }
            }
        }
        PendingLookup::Step(PendingStep::AwaitOffset) => match text.map(str::parse::<i64>) {
            Some(Ok(offset)) if offset >= 0 => {
                ctx.registry.set_offset(operator, offset).await;
                bot.send_message(
                    msg.chat.id,
                    format!("⏭ Skipping through id {}. Start indexing?", offset),
                )
                .reply_markup(confirm_keyboard())
                .await?;
            }
            Some(_) => {
                ctx.registry.drop_pending(operator).await;
                bot.send_message(msg.chat.id, "❌ Invalid number. Start over with /index.")
                    .await?;
            }
            None => {}
        },
        // Buttons are out; free text is ignored until they are pressed.
        PendingLookup::Step(PendingStep::AwaitConfirm) | PendingLookup::Absent => {}
        PendingLookup::Expired => {
            bot.send_message(msg.chat.id, "⏳ Session expired. Use /index again.")
                .await?;
        }
    }

    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, ctx: Arc<BotContext>) -> Result<()> {
    let Some(data) = q.data.clone() else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    if !ctx.config.is_admin(q.from.id.0) {
        bot.answer_callback_query(q.id.clone())
            .text("Not allowed.")
            .show_alert(true)
            .await?;
        return Ok(());
    }
    let operator = q.from.id.0 as i64;
    let status = q.message.as_ref().and_then(|m| m.regular_message()).cloned();

    match data.as_str() {
        "index#close" => {
            ctx.registry.drop_pending(operator).await;
            bot.answer_callback_query(q.id.clone()).await?;
            if let Some(m) = status {
                let _ = bot.delete_message(m.chat.id, m.id).await;
            }
        }
        "index#cancel" => {
            ctx.registry.cancel(operator).await;
            bot.answer_callback_query(q.id.clone()).text("Cancelling…").await?;
        }
        "index#yes" => {
            if ctx.registry.pending_step(operator).await
                != PendingLookup::Step(PendingStep::AwaitConfirm)
            {
                expire_session(&bot, &q, status.as_ref()).await?;
                return Ok(());
            }
            bot.answer_callback_query(q.id.clone()).await?;
            if let Some(m) = status {
                bot.edit_message_text(m.chat.id, m.id, "📂 Select the destination:")
                    .reply_markup(destination_keyboard())
                    .await?;
            }
        }
        "index#start_main" | "index#start_alternate" => {
            let destination = if data.ends_with("alternate") {
                Destination::Alternate
            } else {
                Destination::Main
            };
            start_job(&bot, &q, ctx.clone(), operator, destination, status).await?;
        }
        _ => {
            bot.answer_callback_query(q.id.clone()).await?;
        }
    }

    Ok(())
}

async fn expire_session(bot: &Bot, q: &CallbackQuery, status: Option<&Message>) -> Result<()> {
    bot.answer_callback_query(q.id.clone())
        .text("⚠️ Session expired. Use /index again.")
        .show_alert(true)
        .await?;
    if let Some(m) = status {
        let _ = bot.delete_message(m.chat.id, m.id).await;
    }
    Ok(())
}

async fn start_job(
    bot: &Bot,
    q: &CallbackQuery,
    ctx: Arc<BotContext>,
    operator: i64,
    destination: Destination,
    status: Option<Message>,
) -> Result<()> {
    let Some(job) = ctx.registry.take_confirmed(operator).await else {
        expire_session(bot, q, status.as_ref()).await?;
        return Ok(());
    };
    let Some(chat) = job.chat.clone() else {
        expire_session(bot, q, status.as_ref()).await?;
        return Ok(());
    };
    let Some(status) = status else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };

    // Single flight: a second confirmed job is refused, never queued.
    let Some(guard) = ctx.registry.try_begin() else {
        bot.answer_callback_query(q.id.clone())
            .text("⚠️ Another indexing job is already running.")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id.clone()).await?;
    bot.edit_message_text(
        status.chat.id,
        status.id,
        format!(
            "🚀 {} indexing started from id {}…",
            destination.label(),
            job.offset + 1
        ),
    )
    .await?;

    let token = ctx.registry.job_token(operator).await;
    let sink = TelegramSink::new(bot.clone(), status.chat.id, status.id, destination);
    let scan = ScanJob::new(
        chat,
        destination,
        job.offset,
        job.end_id,
        token,
        BatchFetcher::new(ctx.archive.clone()),
        ctx.store.clone(),
        Box::new(sink),
    );

    let bot = bot.clone();
    let status_chat = status.chat.id;
    let status_id = status.id;
    tokio::spawn(async move {
        let _guard = guard;
        if let Err(e) = scan.run().await {
            error!("indexing job failed: {:#}", e);
            let _ = bot
                .edit_message_text(status_chat, status_id, format!("❌ Critical error: {:#}", e))
                .await;
        }
        ctx.registry.clear_token(operator).await;
    });

    Ok(())
}
