//! Deterministic extraction of expenses from OCR'd receipts and bank transfer screenshots.

use std::sync::OnceLock;

use regex::Regex;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use time_tz::Tz;

use crate::{
    currency::Currency,
    parsing::ParsedExpense,
    timezone::assume_local,
    transaction::{DEFAULT_CATEGORY, DEFAULT_ITEM},
};

const DOCUMENT_HKD_MARKERS: [&str; 5] = ["hk$", "hkd", "港币", "港元", "港幣"];
const DOCUMENT_CNY_MARKERS: [&str; 6] = ["cny", "rmb", "人民币", "¥", "￥", "元"];

const LINE_HKD_TOKENS: [&str; 2] = ["HK$", "HKD"];
const LINE_CNY_TOKENS: [&str; 7] = ["CNY", "RMB", "¥", "￥", "元", "人民币", "人民幣"];
const CURRENCY_TOKENS: [&str; 6] = ["HK$", "HKD", "CNY", "RMB", "¥", "￥"];
const YUAN_WORDS: [&str; 3] = ["元", "人民币", "人民幣"];
const TOTAL_KEYWORDS: [&str; 9] = [
    "total", "amount", "合计", "總計", "实付", "實付", "总额", "金額", "金額合計",
];

const TRANSFER_CATEGORY: &str = "转账";
const TRANSFER_KEYWORDS: [&str; 9] = [
    "转账",
    "轉賬",
    "轉账",
    "转數快",
    "轉數快",
    "FPS",
    "Faster Payment",
    "轉給",
    "转给",
];
const PAYEE_MARKERS: [&str; 5] = ["收款人", "付款人", "Payee", "Beneficiary", "To"];
const MERCHANT_HINTS: [&str; 12] = [
    "COFFEE",
    "STORE",
    "SHOP",
    "MART",
    "MARKET",
    "LIMITED",
    "7-11",
    "STARBUCKS",
    "WATSONS",
    "PARKNSHOP",
    "MCDONALD",
    "KFC",
];
/// Merchant names are printed in the receipt header.
const MERCHANT_HEADER_LINES: usize = 6;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").expect("number regex")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(20\d{2})[/-](\d{2})[/-](\d{2})").expect("date regex"))
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{2}):(\d{2}):(\d{2})").expect("time regex"))
}

fn transfer_to_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:转给|轉給)\s*(\S{1,20})").expect("transfer regex"))
}

fn latin_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z#][A-Za-z# ]{2,}").expect("latin block regex"))
}

fn latin_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z# ]{3,}$").expect("latin line regex"))
}

fn time_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,2}:\d{2}(?::\d{2})?$").expect("time line regex"))
}

fn id_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9|-]{8,}$").expect("id line regex"))
}

/// A number found on a line that looks like it mentions money.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    amount: f64,
    negative: bool,
    two_decimals: bool,
    total_line: bool,
    currency: Option<Currency>,
}

/// Try to read an expense out of OCR text without a language model.
///
/// The amount is picked from numbers on lines that mention a currency, a
/// total, or start with a minus sign, preferring (in order) negative
/// decimals, decimals on total lines, any decimal, numbers on total lines,
/// and finally any number, taking the largest value in the first tier that
/// has one. Bank transfers are categorised as "转账" with the payee as the
/// item, other receipts name the merchant when a header line looks like one.
///
/// Dates printed on the receipt are read as wall clock time in `timezone`.
///
/// Returns `None` when no monetary number is found.
pub fn parse_receipt(ocr_text: &str, timezone: &Tz) -> Option<ParsedExpense> {
    let lines: Vec<&str> = ocr_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let text_lower = ocr_text.to_lowercase();
    let document_currency = document_currency(&text_lower);

    let candidates: Vec<Candidate> = lines
        .iter()
        .filter(|line| is_monetary(line))
        .flat_map(|line| line_candidates(line, document_currency))
        .collect();
    let chosen = choose_candidate(&candidates)?;

    let (category, item) = if is_transfer_line(ocr_text) {
        let item = match transfer_payee(&lines) {
            Some(name) => format!("转账给 {name}"),
            None => TRANSFER_CATEGORY.to_owned(),
        };
        (TRANSFER_CATEGORY.to_owned(), item)
    } else {
        let item = match merchant_name(&lines) {
            Some(merchant) => format!("在 {merchant} 消费"),
            None => DEFAULT_ITEM.to_owned(),
        };
        (DEFAULT_CATEGORY.to_owned(), item)
    };

    Some(ParsedExpense {
        amount: chosen.amount,
        currency: chosen.currency.or(document_currency).unwrap_or_default(),
        category,
        item,
        created_at: receipt_timestamp(ocr_text, timezone),
    })
}

/// Remove OCR noise that misleads the language model: lines that are just a
/// clock time and ID-like lines such as order or reference numbers.
pub fn clean_ocr_for_llm(ocr_text: &str) -> String {
    ocr_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !time_line_re().is_match(line))
        .filter(|line| !is_id_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_id_line(line: &str) -> bool {
    let compact = line.replace(' ', "");
    id_line_re().is_match(&compact) && has_digit(&compact)
}

fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn document_currency(text_lower: &str) -> Option<Currency> {
    if DOCUMENT_HKD_MARKERS
        .iter()
        .any(|marker| text_lower.contains(marker))
    {
        Some(Currency::HKD)
    } else if DOCUMENT_CNY_MARKERS
        .iter()
        .any(|marker| text_lower.contains(marker))
    {
        Some(Currency::CNY)
    } else {
        None
    }
}

fn line_currency(line: &str) -> Option<Currency> {
    if LINE_HKD_TOKENS.iter().any(|token| line.contains(token)) {
        Some(Currency::HKD)
    } else if LINE_CNY_TOKENS.iter().any(|token| line.contains(token)) {
        Some(Currency::CNY)
    } else {
        None
    }
}

fn has_total_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    TOTAL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn is_monetary(line: &str) -> bool {
    CURRENCY_TOKENS.iter().any(|token| line.contains(token))
        || has_total_keyword(line)
        || line.starts_with('-')
        || YUAN_WORDS.iter().any(|word| line.contains(word))
}

/// Whether the text just before a number ends in a minus sign that is not a
/// separator inside a date or range like `2024-01-02`.
fn ends_with_minus_sign(before: &str) -> bool {
    let mut chars = before.trim_end().chars().rev();

    match chars.next() {
        Some('-' | '−') => !chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn line_candidates(line: &str, document_currency: Option<Currency>) -> Vec<Candidate> {
    let negative_line = line.starts_with('-');
    let total_line = has_total_keyword(line);
    let currency = line_currency(line).or(document_currency);

    number_re()
        .find_iter(line)
        .filter_map(|number| {
            let amount = number
                .as_str()
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|amount| amount.is_finite())?;

            Some(Candidate {
                amount,
                negative: negative_line || ends_with_minus_sign(&line[..number.start()]),
                two_decimals: number
                    .as_str()
                    .split_once('.')
                    .is_some_and(|(_, decimals)| decimals.len() == 2),
                total_line,
                currency,
            })
        })
        .collect()
}

fn choose_candidate(candidates: &[Candidate]) -> Option<&Candidate> {
    let tiers: [fn(&Candidate) -> bool; 5] = [
        |candidate| candidate.negative && candidate.two_decimals,
        |candidate| candidate.total_line && candidate.two_decimals,
        |candidate| candidate.two_decimals,
        |candidate| candidate.total_line,
        |_| true,
    ];

    tiers.iter().find_map(|in_tier| {
        candidates
            .iter()
            .filter(|candidate| in_tier(candidate))
            .max_by(|a, b| a.amount.total_cmp(&b.amount))
    })
}

fn receipt_timestamp(text: &str, timezone: &Tz) -> Option<OffsetDateTime> {
    let date_parts = date_re().captures(text)?;
    let month = Month::try_from(date_parts[2].parse::<u8>().ok()?).ok()?;
    let date = Date::from_calendar_date(
        date_parts[1].parse().ok()?,
        month,
        date_parts[3].parse().ok()?,
    )
    .ok()?;

    let time = time_re()
        .captures(text)
        .and_then(|time_parts| {
            Time::from_hms(
                time_parts[1].parse().ok()?,
                time_parts[2].parse().ok()?,
                time_parts[3].parse().ok()?,
            )
            .ok()
        })
        .unwrap_or(Time::MIDNIGHT);

    Some(assume_local(PrimitiveDateTime::new(date, time), timezone))
}

fn is_transfer_keyword(text: &str) -> bool {
    TRANSFER_KEYWORDS
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(text))
}

fn is_transfer_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    TRANSFER_KEYWORDS
        .iter()
        .any(|keyword| lower.contains(&keyword.to_lowercase()))
}

fn transfer_payee(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .filter(|line| is_transfer_line(line))
        .find_map(|line| name_on_transfer_line(line))
        .or_else(|| lines.iter().find_map(|line| name_after_payee_marker(line)))
        .or_else(|| lines.iter().find_map(|line| name_like_line(line)))
}

fn name_on_transfer_line(line: &str) -> Option<String> {
    if let Some(parts) = transfer_to_re().captures(line) {
        let name = parts[1].replace(['#', '*'], "");
        let name = name.trim();

        if !name.is_empty() {
            return Some(name.to_owned());
        }
    }

    latin_block_re()
        .find_iter(line)
        .map(|block| collapse_spaces(block.as_str()))
        .filter(|block| !is_transfer_keyword(block))
        .last()
        .filter(|block| block.chars().count() >= 2 && !has_digit(block))
}

fn name_after_payee_marker(line: &str) -> Option<String> {
    let (head, _) = line.split_once([':', '：'])?;
    let has_marker = PAYEE_MARKERS.iter().any(|marker| {
        if marker.is_ascii() {
            head.split_whitespace()
                .any(|word| word.eq_ignore_ascii_case(marker))
        } else {
            head.contains(marker)
        }
    });

    if !has_marker {
        return None;
    }

    let (_, tail) = line.rsplit_once([':', '：'])?;
    let name = collapse_spaces(tail);

    (!name.is_empty() && !has_digit(&name)).then_some(name)
}

fn name_like_line(line: &str) -> Option<String> {
    if line.chars().count() <= 2 || has_digit(line) || !latin_line_re().is_match(line) {
        return None;
    }

    let name = collapse_spaces(line);
    (!is_transfer_keyword(&name)).then_some(name)
}

fn merchant_name(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .take(MERCHANT_HEADER_LINES)
        .find(|line| {
            let upper = line.to_uppercase();
            MERCHANT_HINTS.iter().any(|hint| upper.contains(hint)) && !has_digit(line)
        })
        .map(|line| line.to_string())
}
