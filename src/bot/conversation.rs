//! What the bot says and stores, independent of the chat platform.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use rusqlite::Connection;

use crate::{
    Error, TransactionId,
    bot_state::{PendingExpense, set_pending_expense, take_pending_expense},
    parsing::{ExpenseParse, ExpenseParser, ParsedExpense},
    transaction::{
        DEFAULT_ITEM, Transaction, create_transaction, delete_user_transaction,
        get_latest_user_transaction, receipt_path, update_user_transaction_item,
    },
};

pub(crate) const WELCOME: &str = "👋 嗨！我是你的家庭记账助手。\n请直接发送消费内容，例如：\n'买菜 200 HKD' 或 '打车 50' (默认 CNY)\n也可以直接发送小票图片！";
pub(crate) const ANALYSING_TEXT: &str = "⏳ 正在分析...";
pub(crate) const ANALYSING_PHOTO: &str = "🖼️ 收到图片，正在识别...";
pub(crate) const TEXT_DRAFTED: &str = "文本识别完成，等待填写项目...";
pub(crate) const PHOTO_DRAFTED: &str = "图片识别完成，等待填写项目...";
pub(crate) const NOT_AN_EXPENSE: &str = "🤔 这看起来不像是一笔账单。请再说具体点？";

/// The raw text stored for expenses read from a photo.
pub const IMAGE_RECEIPT_TEXT: &str = "[Image Receipt]";

/// The name and ID of the person talking to the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatUser {
    /// The chat platform's user ID.
    pub id: String,
    /// The user's first name, recorded as the transaction's author.
    pub name: String,
}

/// The result of reading a message or photo as a new expense.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftOutcome {
    /// A draft was stored, ask the user for the item with this prompt.
    Drafted(String),
    /// Nothing was stored.
    NotExpense(Option<String>),
}

/// The bot's conversation logic over the shared ledger database.
#[derive(Clone)]
pub struct Conversation {
    db_connection: Arc<Mutex<Connection>>,
    parser: ExpenseParser,
    upload_dir: PathBuf,
}

impl Conversation {
    /// Create the conversation logic, saving receipt photos to `upload_dir`.
    pub fn new(
        db_connection: Arc<Mutex<Connection>>,
        parser: ExpenseParser,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db_connection,
            parser,
            upload_dir: upload_dir.into(),
        }
    }

    /// Where to save the photo with `file_id`, and the path to record for it.
    pub fn receipt_destination(&self, file_id: &str) -> (PathBuf, String) {
        let filename = format!("{file_id}.jpg");

        (self.upload_dir.join(&filename), receipt_path(&filename))
    }

    /// Remove and return the user's waiting draft.
    ///
    /// # Errors
    /// Returns an error if the database cannot be read.
    pub fn take_draft(&self, user_id: &str) -> Result<Option<PendingExpense>, Error> {
        let connection = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        take_pending_expense(user_id, &connection)
    }

    /// Save `draft` as a transaction named by the user's reply `text`.
    ///
    /// English item names are translated when a language model is available.
    /// An empty reply keeps the item the parser suggested.
    ///
    /// # Errors
    /// Returns an error if the transaction cannot be stored.
    pub async fn record_draft(&self, draft: PendingExpense, text: &str) -> Result<String, Error> {
        let typed = text.trim();
        let item = match self.parser.translate_item(typed).await {
            Some(translation) => translation,
            None => typed.to_owned(),
        };
        let item = if !item.is_empty() {
            item
        } else if !draft.item.is_empty() {
            draft.item.clone()
        } else {
            DEFAULT_ITEM.to_owned()
        };

        let transaction = {
            let connection = self
                .db_connection
                .lock()
                .map_err(|_| Error::DatabaseLockError)?;
            create_transaction(draft.into_transaction(&item), &connection)?
        };

        tracing::info!(
            "Recorded transaction #{} for user {}",
            transaction.id,
            transaction.user_id
        );

        Ok(recorded_message(&transaction))
    }

    /// Parse a text message and store the result as the user's draft.
    ///
    /// # Errors
    /// Returns an error if the draft cannot be stored.
    pub async fn draft_from_text(&self, user: &ChatUser, text: &str) -> Result<DraftOutcome, Error> {
        match self.parser.parse_text(text).await {
            ExpenseParse::Expense(parsed) => self.store_draft(user, parsed, text, None),
            ExpenseParse::NotExpense { reason } => {
                tracing::debug!("\"{text}\" is not an expense: {reason:?}");
                Ok(DraftOutcome::NotExpense(reason))
            }
        }
    }

    /// Parse a saved receipt photo and store the result as the user's draft.
    ///
    /// # Errors
    /// Returns an error if the draft cannot be stored.
    pub async fn draft_from_photo(
        &self,
        user: &ChatUser,
        image_path: &Path,
        receipt_image_path: String,
    ) -> Result<DraftOutcome, Error> {
        match self.parser.parse_image(image_path).await {
            ExpenseParse::Expense(parsed) => {
                self.store_draft(user, parsed, IMAGE_RECEIPT_TEXT, Some(receipt_image_path))
            }
            ExpenseParse::NotExpense { reason } => Ok(DraftOutcome::NotExpense(reason)),
        }
    }

    fn store_draft(
        &self,
        user: &ChatUser,
        parsed: ParsedExpense,
        raw_text: &str,
        receipt_image_path: Option<String>,
    ) -> Result<DraftOutcome, Error> {
        let draft = PendingExpense {
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            amount: parsed.amount,
            currency: parsed.currency,
            category: parsed.category,
            item: if parsed.item.is_empty() {
                DEFAULT_ITEM.to_owned()
            } else {
                parsed.item
            },
            raw_text: raw_text.to_owned(),
            receipt_image_path,
            created_at: parsed.created_at,
        };

        {
            let connection = self
                .db_connection
                .lock()
                .map_err(|_| Error::DatabaseLockError)?;
            set_pending_expense(&draft, &connection)?;
        }

        Ok(DraftOutcome::Drafted(format!(
            "预览：{} {}，{}\n请回复本次消费的项目（例如：转账给XX、在XX购物）",
            draft.amount, draft.currency, draft.category
        )))
    }

    /// Handle `/undo`: delete the user's newest transaction.
    pub fn undo(&self, user_id: &str) -> String {
        match self.delete_latest(user_id) {
            Ok(Some(id)) => format!("已撤回记录 #{id}"),
            Ok(None) => "没有可撤回的记录".to_owned(),
            Err(error) => format!("撤回失败: {error}"),
        }
    }

    fn delete_latest(&self, user_id: &str) -> Result<Option<TransactionId>, Error> {
        let connection = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        let Some(latest) = get_latest_user_transaction(user_id, &connection)? else {
            return Ok(None);
        };
        delete_user_transaction(latest.id, user_id, &connection)?;

        Ok(Some(latest.id))
    }

    /// Handle `/delete <id>` for one of the user's own transactions.
    pub fn delete(&self, user_id: &str, args: &str) -> String {
        let Some(id) = args.split_whitespace().next() else {
            return "用法: /delete 记录ID".to_owned();
        };
        let Ok(id) = id.parse::<TransactionId>() else {
            return "记录ID必须是数字".to_owned();
        };

        let deleted = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)
            .and_then(|connection| delete_user_transaction(id, user_id, &connection));

        match deleted {
            Ok(0) => "未找到该记录或无权限删除".to_owned(),
            Ok(_) => format!("已删除记录 #{id}"),
            Err(error) => format!("删除失败: {error}"),
        }
    }

    /// Handle `/edit <id> <item>` for one of the user's own transactions.
    pub async fn edit(&self, user_id: &str, args: &str) -> String {
        let Some((id, item)) = args.trim().split_once(char::is_whitespace) else {
            return "用法: /edit 记录ID 新项目名".to_owned();
        };
        let Ok(id) = id.parse::<TransactionId>() else {
            return "记录ID必须是数字".to_owned();
        };
        let item = item.trim();
        if item.is_empty() {
            return "新项目名不能为空".to_owned();
        }

        let item = self
            .parser
            .translate_item(item)
            .await
            .unwrap_or_else(|| item.to_owned());

        let updated = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)
            .and_then(|connection| update_user_transaction_item(id, user_id, &item, &connection));

        match updated {
            Ok(0) => "未找到该记录或无权限修改".to_owned(),
            Ok(_) => format!("已更新记录 #{id} 项目为：{item}"),
            Err(error) => format!("修改失败: {error}"),
        }
    }
}

fn recorded_message(transaction: &Transaction) -> String {
    format!(
        "✅ 已记录 #{id}\n💰 {amount} {currency}\n📂 {category} - {item}\n\n\
         操作：/undo 撤回最近一条；/delete {id} 删除；/edit {id} 新项目名",
        id = transaction.id,
        amount = transaction.amount,
        currency = transaction.currency,
        category = transaction.category,
        item = transaction.item,
    )
}
