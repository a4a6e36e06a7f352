//! Turning chat messages and receipt photos into expenses.
//!
//! Text goes to the language model when one is configured and falls back to
//! keyword heuristics otherwise. Photos are OCR'd, read with receipt
//! heuristics, and only sent to the model when the heuristics find no amount.

use std::{path::Path, sync::Arc};

use time::OffsetDateTime;
use time_tz::Tz;

mod llm;
mod ocr;
mod receipt;
mod simple;

pub use llm::{
    ChatCompletionClient, ChatModel, RECEIPT_PROMPT_PREFIX, SYSTEM_PROMPT, TRANSLATE_PROMPT,
    interpret_reply, needs_translation,
};
pub use ocr::{CommandOcr, DEFAULT_OCR_COMMAND, IMAGE_PLACEHOLDER, OcrEngine};
pub use receipt::{clean_ocr_for_llm, parse_receipt};
pub use simple::{categorize, infer_currency, simple_parse};

use crate::currency::Currency;

/// The fields of an expense read from text or a receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExpense {
    /// The amount spent, always positive.
    pub amount: f64,
    /// The ledger the expense belongs to.
    pub currency: Currency,
    /// A short category in Simplified Chinese, e.g. "餐饮".
    pub category: String,
    /// A suggested item name.
    pub item: String,
    /// When the expense happened, if the receipt printed a date.
    pub created_at: Option<OffsetDateTime>,
}

/// The outcome of parsing a message or photo.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpenseParse {
    /// The input describes an expense.
    Expense(ParsedExpense),
    /// The input is not an expense, or could not be read.
    NotExpense {
        /// Why, when there is something more useful to say than "not an expense".
        reason: Option<String>,
    },
}

/// Parses expenses with an optional language model and an OCR engine.
#[derive(Clone)]
pub struct ExpenseParser {
    model: Option<Arc<dyn ChatModel>>,
    ocr: Arc<dyn OcrEngine>,
    timezone: &'static Tz,
}

impl ExpenseParser {
    /// Create a parser.
    ///
    /// Without a `model` only the keyword and receipt heuristics are used.
    /// Receipt dates are read as wall clock time in `timezone`.
    pub fn new(
        model: Option<Arc<dyn ChatModel>>,
        ocr: Arc<dyn OcrEngine>,
        timezone: &'static Tz,
    ) -> Self {
        Self {
            model,
            ocr,
            timezone,
        }
    }

    /// Parse a free-text message such as "午饭 500 港币".
    pub async fn parse_text(&self, text: &str) -> ExpenseParse {
        let Some(model) = &self.model else {
            return llm::fallback_or_not_expense(text, Some("NO_API_KEY".to_owned()));
        };

        match model.complete(SYSTEM_PROMPT, text, true).await {
            Ok(reply) => {
                tracing::debug!("Model reply: {reply}");
                interpret_reply(&reply, text)
            }
            Err(error) => {
                tracing::warn!("Falling back to keyword parsing: {error}");
                llm::fallback_or_not_expense(text, Some(error.to_string()))
            }
        }
    }

    /// Parse the receipt or transfer screenshot at `image_path`.
    pub async fn parse_image(&self, image_path: &Path) -> ExpenseParse {
        let ocr_text = match self.ocr.extract_text(image_path).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return ocr_failed(),
            Err(error) => {
                tracing::warn!("OCR failed for {}: {error}", image_path.display());
                return ocr_failed();
            }
        };

        tracing::debug!("OCR result:\n{ocr_text}");

        if let Some(parsed) = parse_receipt(&ocr_text, self.timezone) {
            return ExpenseParse::Expense(parsed);
        }

        let cleaned = clean_ocr_for_llm(&ocr_text);
        self.parse_text(&format!("{RECEIPT_PROMPT_PREFIX}\n{cleaned}"))
            .await
    }

    /// Translate an item name typed by a user into Simplified Chinese.
    ///
    /// Returns `None` when there is no model, the text has no Latin letters,
    /// or the model fails. Callers should keep the original text then.
    pub async fn translate_item(&self, text: &str) -> Option<String> {
        let model = self.model.as_ref()?;

        if !needs_translation(text) {
            return None;
        }

        match model.complete(TRANSLATE_PROMPT, text, false).await {
            Ok(translation) => {
                let translation = translation.trim().trim_matches('"').trim();
                (!translation.is_empty()).then(|| translation.to_owned())
            }
            Err(error) => {
                tracing::warn!("Could not translate \"{text}\": {error}");
                None
            }
        }
    }
}

fn ocr_failed() -> ExpenseParse {
    ExpenseParse::NotExpense {
        reason: Some("OCR failed to extract text".to_owned()),
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::{
        path::Path,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use time_tz::Tz;

    use crate::{Error, timezone::find_timezone};

    use super::{ChatModel, ExpenseParser, OcrEngine};

    /// A chat model that always gives the same answer and records its prompts.
    pub struct FakeModel {
        pub reply: Result<String, String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl FakeModel {
        pub fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_owned()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("connection refused".to_owned()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            user_prompt: &str,
            _json_output: bool,
        ) -> Result<String, Error> {
            self.prompts.lock().unwrap().push(user_prompt.to_owned());
            self.reply.clone().map_err(Error::LlmError)
        }
    }

    /// An OCR engine that always reads the same text.
    pub struct FakeOcr(pub Result<String, String>);

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn extract_text(&self, _image_path: &Path) -> Result<String, Error> {
            self.0.clone().map_err(Error::OcrError)
        }
    }

    pub fn shanghai() -> &'static Tz {
        find_timezone("Asia/Shanghai").unwrap()
    }

    pub fn parser(model: Option<Arc<FakeModel>>, ocr_text: &str) -> ExpenseParser {
        ExpenseParser::new(
            model.map(|model| model as Arc<dyn ChatModel>),
            Arc::new(FakeOcr(Ok(ocr_text.to_owned()))),
            shanghai(),
        )
    }
}
