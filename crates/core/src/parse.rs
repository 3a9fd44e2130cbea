//! Free-text heuristics for inbound chat messages: amount extraction,
//! Thai phone normalization, flow keywords, and the owner review codes.
//! Kept as pure functions, ordered by precedence, so every rule is unit
//! testable outside the state machine.

use regex::Regex;

pub const CONFIRM_CODE: &str = "1010";
pub const REJECT_CODE: &str = "0011";

/// Amount plus currency hint extracted from free text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAmount {
    pub amount: f64,
    pub currency: String,
}

/// Extract the first decimal amount from free text. Comma separators are
/// stripped first; non-positive amounts are rejected. Currency defaults to
/// THB unless a USD/EUR hint is present.
pub fn parse_amount(text: &str) -> Option<ParsedAmount> {
    if text.is_empty() {
        return None;
    }
    let stripped = text.replace(',', "");
    let re = Regex::new(r"([0-9]+(?:\.[0-9]{1,2})?)").unwrap();
    let m = re.captures(&stripped)?;
    let amount: f64 = m.get(1)?.as_str().parse().ok()?;
    if amount <= 0.0 {
        return None;
    }

    let low = text.to_lowercase();
    let currency = if low.contains("usd") || low.contains('$') {
        "USD"
    } else if low.contains("eur") || low.contains('€') {
        "EUR"
    } else {
        "THB"
    };

    Some(ParsedAmount {
        amount,
        currency: currency.to_string(),
    })
}

const PAYMENT_KEYWORDS: &[&str] = &[
    "โอน",
    "แจ้งโอน",
    "ชำระ",
    "ชำระเงิน",
    "จ่าย",
    "จ่ายเงิน",
    "สลิป",
    "payment",
    "paid",
    "transfer",
    "pay",
];

/// Does this text read as a customer payment claim?
pub fn is_payment_claim(text: &str) -> bool {
    let low = text.to_lowercase();
    PAYMENT_KEYWORDS.iter().any(|k| low.contains(k))
}

/// Normalize a Thai phone number to local `0XXXXXXXXX` form.
pub fn normalize_phone_th(text: &str) -> Option<String> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.starts_with("66") && digits.len() == 11 {
        return Some(format!("0{}", &digits[2..]));
    }
    if digits.starts_with('0') && (digits.len() == 9 || digits.len() == 10) {
        return Some(digits);
    }
    None
}

const START_KEYWORDS: &[&str] = &["สมัครร้านค้า", "เปิดร้านค้า", "เปิดร้าน", "สมัคร", "register", "start"];
const CANCEL_KEYWORDS: &[&str] = &["ยกเลิก", "cancel"];
const CONFIRM_KEYWORDS: &[&str] = &["ยืนยันข้อมูล", "ยืนยัน", "confirm"];
const OWNER_CLAIM_KEYWORDS: &[&str] = &[
    "เจ้าของร้าน",
    "ฉันคือเจ้าของร้าน",
    "owner",
    "i am the owner",
];

fn matches_keyword(text: &str, keywords: &[&str]) -> bool {
    let t = text.trim().to_lowercase();
    keywords.iter().any(|k| t == *k)
}

pub fn is_start_keyword(text: &str) -> bool {
    matches_keyword(text, START_KEYWORDS)
}

pub fn is_cancel_keyword(text: &str) -> bool {
    matches_keyword(text, CANCEL_KEYWORDS)
}

pub fn is_confirm_keyword(text: &str) -> bool {
    matches_keyword(text, CONFIRM_KEYWORDS)
}

pub fn is_owner_claim_keyword(text: &str) -> bool {
    matches_keyword(text, OWNER_CLAIM_KEYWORDS)
}

/// An owner review decision. `code` targets a specific intent by its short
/// confirm code; None means "the most recent pending intent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerAction {
    Confirm { code: Option<String> },
    Reject { code: Option<String> },
}

/// Parse the owner review surface: the two fixed numeric tokens, bare or
/// prefixed with a Thai/English verb, optionally carrying a 6-char intent
/// code instead of the fixed token.
pub fn parse_owner_action(text: &str) -> Option<OwnerAction> {
    let ws = Regex::new(r"\s+").unwrap();
    let compact = ws.replace_all(text.trim(), " ").to_lowercase();

    if compact == CONFIRM_CODE {
        return Some(OwnerAction::Confirm { code: None });
    }
    if compact == REJECT_CODE {
        return Some(OwnerAction::Reject { code: None });
    }

    let confirm_re =
        Regex::new(r"^(?:ยืนยัน|confirm|ok|ตกลง|approve) (1010|[0-9a-f]{6})$").unwrap();
    if let Some(c) = confirm_re.captures(&compact) {
        let token = c.get(1).map(|m| m.as_str().to_string());
        let code = token.filter(|t| t != CONFIRM_CODE);
        return Some(OwnerAction::Confirm { code });
    }

    let reject_re =
        Regex::new(r"^(?:ปัดตก|reject|ไม่ใช่|ยกเลิก) (0011|[0-9a-f]{6})$").unwrap();
    if let Some(c) = reject_re.captures(&compact) {
        let token = c.get(1).map(|m| m.as_str().to_string());
        let code = token.filter(|t| t != REJECT_CODE);
        return Some(OwnerAction::Reject { code });
    }

    None
}

const QUOTE_KEYWORDS: &[&str] = &["ยอด", "ราคา", "รวม", "total", "quote", "amount"];

/// Owner quote declaration: an expected amount used to gate OCR later.
/// Keyword-gated so arbitrary owner chatter carrying digits does not
/// overwrite the active quote.
pub fn parse_quote(text: &str) -> Option<ParsedAmount> {
    let low = text.to_lowercase();
    if !QUOTE_KEYWORDS.iter().any(|k| low.contains(k)) {
        return None;
    }
    parse_amount(text)
}

/// One owner-profile field recognized in free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerProfileField {
    BusinessName(String),
    FullName(String),
    Phone(String),
}

fn strip_prefix_field(text: &str, prefixes: &[&str]) -> Option<String> {
    for p in prefixes {
        if let Some(rest) = text.strip_prefix(p) {
            let value = rest.trim_start_matches([':', ' ']).trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Recognize an owner-profile field in free text. Explicit prefixed forms
/// win; after that, ordered heuristics: a 9-11 digit run reads as a phone
/// number, spaced Thai text as a full name, a shop prefix as the business
/// name.
pub fn parse_owner_profile_field(text: &str) -> Option<OwnerProfileField> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(v) = strip_prefix_field(text, &["ชื่อร้าน:", "ร้าน:"]) {
        return Some(OwnerProfileField::BusinessName(v));
    }
    if let Some(v) = strip_prefix_field(text, &["ชื่อ:", "ชื่อ "]) {
        return Some(OwnerProfileField::FullName(v));
    }
    if let Some(v) = strip_prefix_field(text, &["เบอร์:", "เบอร์ "]) {
        return normalize_phone_th(&v).map(OwnerProfileField::Phone);
    }

    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if (9..=11).contains(&digits.len()) {
        if let Some(phone) = normalize_phone_th(text) {
            return Some(OwnerProfileField::Phone(phone));
        }
    }

    let has_thai = text.chars().any(|c| ('\u{0E00}'..='\u{0E7F}').contains(&c));
    if has_thai && text.contains(' ') && text.chars().count() >= 4 {
        return Some(OwnerProfileField::FullName(text.to_string()));
    }

    if text.starts_with("ร้าน") {
        return Some(OwnerProfileField::BusinessName(text.to_string()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_separated_amounts() {
        assert_eq!(parse_amount("โอน 500").unwrap().amount, 500.0);
        assert_eq!(parse_amount("ชำระ 1,250 บาท").unwrap().amount, 1250.0);
        assert_eq!(parse_amount("paid 300.50").unwrap().amount, 300.50);
        assert!(parse_amount("no numbers here").is_none());
        assert!(parse_amount("paid 0").is_none());
    }

    #[test]
    fn currency_hints() {
        assert_eq!(parse_amount("pay 10 usd").unwrap().currency, "USD");
        assert_eq!(parse_amount("pay €10").unwrap().currency, "EUR");
        assert_eq!(parse_amount("โอน 500 บาท").unwrap().currency, "THB");
        assert_eq!(parse_amount("transfer 2000").unwrap().currency, "THB");
    }

    #[test]
    fn payment_claims() {
        assert!(is_payment_claim("แจ้งโอน 500"));
        assert!(is_payment_claim("I just paid 300"));
        assert!(!is_payment_claim("สวัสดีครับ"));
    }

    #[test]
    fn thai_phone_normalization() {
        assert_eq!(normalize_phone_th("081-234-5678").as_deref(), Some("0812345678"));
        assert_eq!(normalize_phone_th("+66812345678").as_deref(), Some("0812345678"));
        assert_eq!(normalize_phone_th("12345").as_deref(), None);
    }

    #[test]
    fn owner_action_fixed_codes() {
        assert_eq!(
            parse_owner_action("1010"),
            Some(OwnerAction::Confirm { code: None })
        );
        assert_eq!(
            parse_owner_action("ยืนยัน   1010"),
            Some(OwnerAction::Confirm { code: None })
        );
        assert_eq!(
            parse_owner_action("Reject 0011"),
            Some(OwnerAction::Reject { code: None })
        );
        assert_eq!(parse_owner_action("1010 please"), None);
        assert_eq!(parse_owner_action("ok"), None);
    }

    #[test]
    fn owner_action_short_codes() {
        assert_eq!(
            parse_owner_action("confirm a1b2c3"),
            Some(OwnerAction::Confirm {
                code: Some("a1b2c3".to_string())
            })
        );
        assert_eq!(
            parse_owner_action("ปัดตก a1b2c3"),
            Some(OwnerAction::Reject {
                code: Some("a1b2c3".to_string())
            })
        );
    }

    #[test]
    fn quote_requires_keyword() {
        assert_eq!(parse_quote("ยอด 300").unwrap().amount, 300.0);
        assert_eq!(parse_quote("total 1500"), parse_amount("1500"));
        assert!(parse_quote("0812345678").is_none());
    }

    #[test]
    fn owner_profile_prefixed_fields() {
        assert_eq!(
            parse_owner_profile_field("ชื่อร้าน: กาแฟดี"),
            Some(OwnerProfileField::BusinessName("กาแฟดี".to_string()))
        );
        assert_eq!(
            parse_owner_profile_field("เบอร์: 0812345678"),
            Some(OwnerProfileField::Phone("0812345678".to_string()))
        );
    }

    #[test]
    fn owner_profile_heuristics() {
        assert_eq!(
            parse_owner_profile_field("081 234 5678"),
            Some(OwnerProfileField::Phone("0812345678".to_string()))
        );
        assert_eq!(
            parse_owner_profile_field("สมชาย ใจดี"),
            Some(OwnerProfileField::FullName("สมชาย ใจดี".to_string()))
        );
        assert_eq!(parse_owner_profile_field("hello"), None);
    }

    #[test]
    fn flow_keywords_are_exact_matches() {
        assert!(is_start_keyword(" สมัครร้านค้า "));
        assert!(is_cancel_keyword("CANCEL"));
        assert!(is_confirm_keyword("ยืนยัน"));
        assert!(!is_start_keyword("please start now"));
    }
}
