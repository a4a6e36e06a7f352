//! The Telegram bot that records expenses from chat messages and receipt photos.
//!
//! Every expense is a two step conversation: the bot parses a message or
//! photo into a draft, then the user's next text message names the item and
//! the draft is saved to the ledger.

use teloxide::{
    dispatching::UpdateHandler,
    net::Download,
    prelude::*,
    types::{ForceReply, PhotoSize},
};

mod commands;
mod conversation;

pub use commands::{Command, is_command};
pub use conversation::{ChatUser, Conversation, DraftOutcome, IMAGE_RECEIPT_TEXT};

use conversation::{
    ANALYSING_PHOTO, ANALYSING_TEXT, NOT_AN_EXPENSE, PHOTO_DRAFTED, TEXT_DRAFTED, WELCOME,
};

type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
type HandlerResult = Result<(), HandlerError>;

/// Poll Telegram for updates with `token` until the task is cancelled.
pub async fn run_bot(token: &str, conversation: Conversation) {
    let bot = Bot::new(token);

    tracing::info!("Starting Telegram bot");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![conversation])
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error occurred while handling a Telegram update",
        ))
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Message::filter_photo().endpoint(handle_photo))
        .branch(
            Message::filter_text()
                .filter(|text: String| !is_command(&text))
                .endpoint(handle_text),
        )
}

fn chat_user(msg: &Message) -> Option<ChatUser> {
    msg.from.as_ref().map(|user| ChatUser {
        id: user.id.to_string(),
        name: user.first_name.clone(),
    })
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    command: Command,
    conversation: Conversation,
) -> HandlerResult {
    let Some(user) = chat_user(&msg) else {
        return Ok(());
    };

    let reply = match command {
        Command::Start => WELCOME.to_owned(),
        Command::Undo => conversation.undo(&user.id),
        Command::Delete(args) => conversation.delete(&user.id, &args),
        Command::Edit(args) => conversation.edit(&user.id, &args).await,
    };

    bot.send_message(msg.chat.id, reply).await?;

    Ok(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    text: String,
    conversation: Conversation,
) -> HandlerResult {
    let Some(user) = chat_user(&msg) else {
        return Ok(());
    };

    match conversation.take_draft(&user.id) {
        Ok(Some(draft)) => {
            let reply = conversation
                .record_draft(draft, &text)
                .await
                .unwrap_or_else(|error| format!("❌ 保存失败: {error}"));
            bot.send_message(msg.chat.id, reply).await?;
            return Ok(());
        }
        Ok(None) => {}
        Err(error) => tracing::error!("Could not read the draft for user {}: {error}", user.id),
    }

    // Replies only matter while a draft is waiting for its item.
    if msg.reply_to_message().is_some() {
        return Ok(());
    }

    let status = bot.send_message(msg.chat.id, ANALYSING_TEXT).await?;

    match conversation.draft_from_text(&user, &text).await {
        Ok(DraftOutcome::Drafted(prompt)) => {
            bot.edit_message_text(msg.chat.id, status.id, TEXT_DRAFTED)
                .await?;
            ask_for_item(&bot, &msg, prompt).await?;
        }
        Ok(DraftOutcome::NotExpense(_)) => {
            bot.edit_message_text(msg.chat.id, status.id, NOT_AN_EXPENSE)
                .await?;
        }
        Err(error) => {
            bot.edit_message_text(msg.chat.id, status.id, format!("❌ 处理出错: {error}"))
                .await?;
        }
    }

    Ok(())
}

async fn handle_photo(
    bot: Bot,
    msg: Message,
    photos: Vec<PhotoSize>,
    conversation: Conversation,
) -> HandlerResult {
    let (Some(user), Some(photo)) = (chat_user(&msg), photos.last()) else {
        return Ok(());
    };

    let status = bot.send_message(msg.chat.id, ANALYSING_PHOTO).await?;

    let reply = match draft_from_photo(&bot, &conversation, &user, photo).await {
        Ok(DraftOutcome::Drafted(prompt)) => {
            bot.edit_message_text(msg.chat.id, status.id, PHOTO_DRAFTED)
                .await?;
            ask_for_item(&bot, &msg, prompt).await?;
            return Ok(());
        }
        Ok(DraftOutcome::NotExpense(reason)) => {
            format!("🤔 无法识别为账单。{}", reason.unwrap_or_default())
        }
        Err(error) => format!("❌ 图片处理出错: {error}"),
    };

    bot.edit_message_text(msg.chat.id, status.id, reply).await?;

    Ok(())
}

/// Save the largest size of the photo to the upload directory and parse it.
async fn draft_from_photo(
    bot: &Bot,
    conversation: &Conversation,
    user: &ChatUser,
    photo: &PhotoSize,
) -> Result<DraftOutcome, HandlerError> {
    let (image_path, receipt_path) = conversation.receipt_destination(&photo.file.id);

    if let Some(parent) = image_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = bot.get_file(photo.file.id.clone()).await?;
    let mut destination = tokio::fs::File::create(&image_path).await?;
    bot.download_file(&file.path, &mut destination).await?;
    tracing::debug!("Saved receipt photo to {}", image_path.display());

    Ok(conversation
        .draft_from_photo(user, &image_path, receipt_path)
        .await?)
}

async fn ask_for_item(bot: &Bot, msg: &Message, prompt: String) -> HandlerResult {
    bot.send_message(msg.chat.id, prompt)
        .reply_markup(ForceReply::new().selective())
        .await?;

    Ok(())
}
