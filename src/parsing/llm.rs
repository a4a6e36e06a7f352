//! Expense extraction and translation through an OpenAI-compatible chat completion API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Error,
    currency::Currency,
    parsing::{ExpenseParse, ParsedExpense, simple::simple_parse},
    transaction::DEFAULT_CATEGORY,
};

/// Instructions for turning a message or receipt text into a JSON expense.
pub const SYSTEM_PROMPT: &str = r#"
You are a smart expense tracking assistant for a family living in both Mainland China and Hong Kong.
Your task is to extract expense details from the user's natural language input or OCR text from receipts.

The user maintains two separate ledgers:
1. **CNY (RMB)**: Default for expenses in Mainland China or when no currency is specified.
2. **HKD**: For expenses in Hong Kong.

Please extract the following fields in JSON format:
- amount: (number) The numerical value.
- currency: (string) "CNY" or "HKD".
- category: (string) A short category name in Simplified Chinese (e.g., "餐饮", "交通", "购物", "居住", "娱乐", "医疗", "其他").
- item: (string) A brief description in Simplified Chinese. If the original text is in English or other languages, TRANSLATE it to Simplified Chinese.

### Currency Inference Rules:
1. **Explicit Currency**: If the user mentions "港币", "HKD", "HK$", "港纸", set currency to "HKD". If "人民币", "RMB", "CNY", "元", set to "CNY".
2. **Contextual Inference**:
   - If the item/location implies Hong Kong (e.g., "MTR", "旺角", "茶餐厅", "八达通", "7-11 HK", English receipts from HK stores), default to **HKD**.
   - If the item/location implies Mainland China (e.g., "微信支付", "支付宝", "淘宝", "美团", "滴滴", Simplified Chinese receipts), default to **CNY**.
3. **Default**: If no currency is specified and no context is found, default to **CNY**.

### Receipt/OCR Handling:
- The input might be raw text extracted from an image (OCR). It may contain noise.
- Look for the **Total Amount** (largest number usually associated with "Total", "Amount", "合计", "实付").
- Ignore dates, times, and transaction IDs unless they help identify the context.
- Summarize the main item purchased.

### Examples:
- "买菜 200" -> {"is_expense": true, "amount": 200, "currency": "CNY", "category": "餐饮", "item": "买菜"}
- "Taxi 50" -> {"is_expense": true, "amount": 50, "currency": "CNY", "category": "交通", "item": "出租车"} (Ambiguous, default to CNY)
- "打车去旺角 80" -> {"is_expense": true, "amount": 80, "currency": "HKD", "category": "交通", "item": "打车去旺角"}
- "7-11买水 10块" -> {"is_expense": true, "amount": 10, "currency": "CNY", "category": "餐饮", "item": "7-11买水"}
- "午饭 500 港币" -> {"is_expense": true, "amount": 500, "currency": "HKD", "category": "餐饮", "item": "午饭"}
- (OCR Text) "STARBUCKS COFFEE HK ... Total HKD 45.00" -> {"is_expense": true, "amount": 45.00, "currency": "HKD", "category": "餐饮", "item": "星巴克咖啡"}

Rules:
- If input is not an expense, return {"is_expense": false}.
- Return JSON only.
- ALWAYS return 'item' and 'category' in Simplified Chinese.
"#;

/// Instructions for translating an item name typed by a user.
pub const TRANSLATE_PROMPT: &str = "Translate the user's expense item name into concise \
Simplified Chinese. Keep brand names that have no common Chinese name. Reply with the \
translation only, without quotes or explanations.";

/// Prefix for OCR text that the receipt heuristics could not read.
pub const RECEIPT_PROMPT_PREFIX: &str = "以下为小票/转账OCR文本，请提取金额、币种、类别与项目（中文）：";

/// A chat model that answers a single system + user prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one prompt and return the assistant's reply.
    ///
    /// When `json_output` is set the model is asked to reply with a JSON object.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        json_output: bool,
    ) -> Result<String, Error>;
}

/// Client for `POST {base_url}/chat/completions`, e.g. DeepSeek.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionClient {
    /// Create a client that gives up on requests after `timeout`.
    ///
    /// # Errors
    /// Returns an [Error::LlmError] if the HTTP client cannot be created.
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::LlmError(format!("could not create HTTP client: {error}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            model: model.to_owned(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for ChatCompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        json_output: bool,
    ) -> Result<String, Error> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        tracing::debug!("Sending chat completion request to {}", self.base_url);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| Error::LlmError(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::LlmError(format!("{status}: {body}")));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| Error::LlmError(error.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::LlmError("the response had no content".to_owned()))
    }
}

/// Use the keyword parser's answer, or report why there is no expense.
pub(crate) fn fallback_or_not_expense(text: &str, reason: Option<String>) -> ExpenseParse {
    match simple_parse(text) {
        Some(parsed) => ExpenseParse::Expense(parsed),
        None => ExpenseParse::NotExpense { reason },
    }
}

/// Turn the model's JSON reply for `text` into an expense.
///
/// Fields the model leaves out or gets wrong are filled from [simple_parse]
/// where it has an answer: an unusable reply or `"is_expense": false` uses
/// the keyword parser's result outright, an unknown currency or a missing
/// amount is taken from it. A reply without `is_expense` that has an amount
/// counts as an expense.
pub fn interpret_reply(reply: &str, text: &str) -> ExpenseParse {
    let reply: Value = match serde_json::from_str(reply) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!("Could not parse the model's reply as JSON: {error}");
            return fallback_or_not_expense(text, Some(error.to_string()));
        }
    };

    let Some(fields) = reply.as_object() else {
        return fallback_or_not_expense(text, None);
    };

    let is_expense = match fields.get("is_expense") {
        Some(value) => value.as_bool() == Some(true),
        None => fields.get("amount").is_some_and(|amount| !amount.is_null()),
    };

    if !is_expense {
        return fallback_or_not_expense(text, None);
    }

    let fallback = simple_parse(text);

    let Some(amount) = fields
        .get("amount")
        .and_then(json_amount)
        .or(fallback.as_ref().map(|parsed| parsed.amount))
    else {
        return ExpenseParse::NotExpense {
            reason: Some("no amount found".to_owned()),
        };
    };

    let currency = fields
        .get("currency")
        .and_then(Value::as_str)
        .and_then(|code| code.parse::<Currency>().ok())
        .or(fallback.as_ref().map(|parsed| parsed.currency))
        .unwrap_or_default();

    let category = non_empty_string(fields.get("category"))
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_owned());
    let item = non_empty_string(fields.get("item")).unwrap_or_else(|| text.trim().to_owned());

    ExpenseParse::Expense(ParsedExpense {
        amount,
        currency,
        category,
        item,
        created_at: None,
    })
}

fn json_amount(value: &Value) -> Option<f64> {
    let amount: f64 = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().replace(',', "").parse().ok()?,
        _ => return None,
    };

    amount.is_finite().then_some(amount.abs())
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// Whether an item name needs translating into Chinese.
pub fn needs_translation(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use crate::{Currency, parsing::ExpenseParse};

    use super::{interpret_reply, needs_translation};

    fn expense(parse: ExpenseParse) -> crate::parsing::ParsedExpense {
        match parse {
            ExpenseParse::Expense(parsed) => parsed,
            ExpenseParse::NotExpense { reason } => panic!("not an expense: {reason:?}"),
        }
    }

    #[test]
    fn uses_complete_reply() {
        let reply = r#"{"is_expense": true, "amount": 45.0, "currency": "HKD", "category": "餐饮", "item": "星巴克咖啡"}"#;

        let parsed = expense(interpret_reply(reply, "Starbucks 45"));

        assert_eq!(parsed.amount, 45.0);
        assert_eq!(parsed.currency, Currency::HKD);
        assert_eq!(parsed.category, "餐饮");
        assert_eq!(parsed.item, "星巴克咖啡");
    }

    #[test]
    fn invalid_json_falls_back_to_keywords() {
        let parsed = expense(interpret_reply("not json", "午饭 500 港币"));

        assert_eq!(parsed.amount, 500.0);
        assert_eq!(parsed.currency, Currency::HKD);
        assert_eq!(parsed.category, "餐饮");
    }

    #[test]
    fn invalid_json_without_fallback_is_not_an_expense() {
        let parse = interpret_reply("not json", "你好");

        assert!(matches!(
            parse,
            ExpenseParse::NotExpense { reason: Some(_) }
        ));
    }

    #[test]
    fn non_object_reply_is_not_an_expense_without_fallback() {
        assert_eq!(
            interpret_reply("[1, 2]", "你好"),
            ExpenseParse::NotExpense { reason: None }
        );
    }

    #[test]
    fn not_expense_reply_defers_to_keywords() {
        let reply = r#"{"is_expense": false}"#;

        assert_eq!(
            interpret_reply(reply, "今天天气不错"),
            ExpenseParse::NotExpense { reason: None }
        );
        assert_eq!(expense(interpret_reply(reply, "打车 50")).amount, 50.0);
    }

    #[test]
    fn amount_without_flag_is_an_expense() {
        let reply = r#"{"amount": 80, "currency": "HKD", "category": "交通", "item": "打车去旺角"}"#;

        let parsed = expense(interpret_reply(reply, "打车去旺角 80"));

        assert_eq!(parsed.amount, 80.0);
        assert_eq!(parsed.currency, Currency::HKD);
    }

    #[test]
    fn invalid_currency_uses_keyword_currency() {
        let reply = r#"{"is_expense": true, "amount": 500, "currency": "USD", "item": "午饭"}"#;

        let parsed = expense(interpret_reply(reply, "午饭 500 港币"));

        assert_eq!(parsed.currency, Currency::HKD);
    }

    #[test]
    fn missing_currency_without_fallback_is_cny() {
        let reply = r#"{"is_expense": true, "amount": 12, "item": "咖啡"}"#;

        let parsed = expense(interpret_reply(reply, "a coffee"));

        assert_eq!(parsed.currency, Currency::CNY);
        assert_eq!(parsed.category, "其他");
    }

    #[test]
    fn missing_amount_uses_keyword_amount() {
        let reply = r#"{"is_expense": true, "currency": "CNY", "category": "餐饮"}"#;

        let parsed = expense(interpret_reply(reply, " 买菜 200 "));

        assert_eq!(parsed.amount, 200.0);
        assert_eq!(parsed.item, "买菜 200");
    }

    #[test]
    fn missing_amount_without_fallback_is_not_an_expense() {
        let reply = r#"{"is_expense": true, "currency": "CNY"}"#;

        assert!(matches!(
            interpret_reply(reply, "买了点东西"),
            ExpenseParse::NotExpense { .. }
        ));
    }

    #[test]
    fn string_amounts_are_accepted() {
        let reply = r#"{"is_expense": true, "amount": "1,250.50", "currency": "CNY"}"#;

        assert_eq!(expense(interpret_reply(reply, "转账")).amount, 1250.5);
    }

    #[test]
    fn only_latin_text_needs_translation() {
        assert!(needs_translation("Coffee with Bob"));
        assert!(needs_translation("买 iPhone 壳"));
        assert!(!needs_translation("午饭"));
        assert!(!needs_translation("7-11 买水"));
    }
}
