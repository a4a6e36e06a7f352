//! Keyword heuristics for short expense messages such as "买菜 200" or "午饭 500 港币".
//!
//! Used directly when no language model is configured and as the fallback
//! whenever the model's answer is unusable.

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    currency::Currency,
    parsing::ParsedExpense,
    transaction::DEFAULT_CATEGORY,
};

const HKD_MARKERS: [&str; 6] = ["hkd", "港币", "港元", "港幣", "港紙", "蚊"];
const CNY_MARKERS: [&str; 3] = ["cny", "人民币", "rmb"];

const TOP_UP_KEYWORDS: [&str; 3] = ["充值", "会员", "会员费"];
const FOOD_KEYWORDS: [&str; 7] = ["餐", "饭", "早餐", "午饭", "晚餐", "买菜", "超市"];
const TRANSPORT_KEYWORDS: [&str; 9] = [
    "打车", "出租", "交通", "地铁", "公交", "的士", "巴士", "MTR", "mtr",
];

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").expect("amount regex"))
}

/// Decide which ledger a message belongs to.
///
/// Rules, later ones overriding earlier ones: default CNY; HKD markers
/// ("hkd", "港币", "蚊", ...) select HKD; explicit CNY markers ("cny",
/// "人民币", "rmb") select CNY; the yuan words "块" and "元" select CNY.
/// The "元" inside "港元" is not a yuan word.
pub fn infer_currency(text: &str) -> Currency {
    let lower = text.to_lowercase();

    let has_hkd = HKD_MARKERS.iter().any(|marker| lower.contains(marker));
    let has_cny = CNY_MARKERS.iter().any(|marker| lower.contains(marker));
    let has_yuan = text.contains('块') || text.replace("港元", "").contains('元');

    if has_hkd && !has_cny && !has_yuan {
        Currency::HKD
    } else {
        Currency::CNY
    }
}

/// Pick a category from keyword buckets, the first matching bucket wins.
pub fn categorize(text: &str) -> &'static str {
    let has_any = |keywords: &[&str]| keywords.iter().any(|keyword| text.contains(keyword));

    if has_any(&TOP_UP_KEYWORDS) {
        DEFAULT_CATEGORY
    } else if has_any(&FOOD_KEYWORDS) {
        "餐饮"
    } else if has_any(&TRANSPORT_KEYWORDS) {
        "交通"
    } else {
        DEFAULT_CATEGORY
    }
}

/// Parse a short expense message without a language model.
///
/// The amount is the first number in the text and the item is the whole
/// trimmed message. Returns `None` when the text contains no usable number.
pub fn simple_parse(text: &str) -> Option<ParsedExpense> {
    let amount = amount_re()
        .find(text)?
        .as_str()
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())?;

    Some(ParsedExpense {
        amount,
        currency: infer_currency(text),
        category: categorize(text).to_owned(),
        item: text.trim().to_owned(),
        created_at: None,
    })
}

#[cfg(test)]
mod tests {
    use crate::Currency;

    use super::{categorize, infer_currency, simple_parse};

    #[test]
    fn defaults_to_cny() {
        assert_eq!(infer_currency("打车 50"), Currency::CNY);
        assert_eq!(infer_currency("Taxi 50"), Currency::CNY);
    }

    #[test]
    fn hong_kong_markers_select_hkd() {
        assert_eq!(infer_currency("午饭 500 港币"), Currency::HKD);
        assert_eq!(infer_currency("lunch 80 HKD"), Currency::HKD);
        assert_eq!(infer_currency("茶餐厅 60蚊"), Currency::HKD);
        assert_eq!(infer_currency("车费 30 港元"), Currency::HKD);
    }

    #[test]
    fn cny_markers_override_hkd_markers() {
        assert_eq!(infer_currency("HKD 100 换成 RMB"), Currency::CNY);
        assert_eq!(infer_currency("港币 100 人民币 90"), Currency::CNY);
    }

    #[test]
    fn yuan_words_select_cny() {
        assert_eq!(infer_currency("买水 10块"), Currency::CNY);
        assert_eq!(infer_currency("hkd 找零 5元"), Currency::CNY);
    }

    #[test]
    fn categorizes_by_keyword_bucket() {
        assert_eq!(categorize("买菜 200"), "餐饮");
        assert_eq!(categorize("坐MTR 12"), "交通");
        assert_eq!(categorize("打车去旺角"), "交通");
        assert_eq!(categorize("视频会员 30"), "其他");
        assert_eq!(categorize("超市会员充值"), "其他");
        assert_eq!(categorize("电影票 90"), "其他");
    }

    #[test]
    fn parses_first_number_as_amount() {
        let parsed = simple_parse("咖啡 12.5 港币 两杯").unwrap();

        assert_eq!(parsed.amount, 12.5);
        assert_eq!(parsed.currency, Currency::HKD);
        assert_eq!(parsed.item, "咖啡 12.5 港币 两杯");
    }

    #[test]
    fn full_example() {
        let parsed = simple_parse("  买菜 200 ").unwrap();

        assert_eq!(parsed.amount, 200.0);
        assert_eq!(parsed.currency, Currency::CNY);
        assert_eq!(parsed.category, "餐饮");
        assert_eq!(parsed.item, "买菜 200");
        assert_eq!(parsed.created_at, None);
    }

    #[test]
    fn text_without_numbers_is_not_an_expense() {
        assert_eq!(simple_parse("你好"), None);
    }

    #[test]
    fn overflowing_number_is_not_an_expense() {
        let text = format!("买菜 {}", "9".repeat(400));

        assert_eq!(simple_parse(&text), None);
    }
}
