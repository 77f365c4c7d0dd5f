//! Deterministic amount and direction extraction for Vietnamese transaction text
//!
//! Amount strategies run in order and the first one that finds something wins:
//! 1. [`SpelledAmount`] - amounts written in words ("năm mươi nghìn", "hai triệu rưỡi")
//! 2. [`CurrencyPattern`] - digits with Vietnamese suffixes and separators
//!    ("50k", "2tr5", "1,5 triệu", "45.000đ")
//!
//! A strategy that errors is logged and skipped; extraction itself never fails.

use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Direction;
use crate::text::normalize;

/// Phrases marking money coming in (matched on whole words of normalized text)
const INFLOW_KEYWORDS: &[&str] = &[
    "lương",
    "nhận",
    "thu",
    "thu nhập",
    "hoàn tiền",
    "được hoàn",
    "bán",
    "thưởng",
    "lãi",
    "tiền lãi",
    "được cho",
    "được trả",
    "salary",
    "income",
    "refund",
    "bonus",
];

/// Amount and direction recognised in one text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extraction {
    pub amount: Option<f64>,
    pub direction: Direction,
}

/// One way of finding an amount
pub trait AmountStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the text holds nothing this strategy recognises
    fn extract(&self, text: &str) -> Result<Option<f64>>;
}

/// Ordered amount strategies plus direction keywords
pub struct AmountExtractor {
    strategies: Vec<Box<dyn AmountStrategy>>,
}

impl Default for AmountExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl AmountExtractor {
    /// Spelled-out parser first, then the currency pattern
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(SpelledAmount),
            Box::new(CurrencyPattern::new()),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn AmountStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn extract(&self, text: &str) -> Extraction {
        Extraction {
            amount: self.amount(text),
            direction: direction(text),
        }
    }

    /// First amount any strategy finds
    pub fn amount(&self, text: &str) -> Option<f64> {
        for strategy in &self.strategies {
            match strategy.extract(text) {
                Ok(Some(amount)) if amount.is_finite() && amount > 0.0 => {
                    debug!(strategy = strategy.name(), amount, "Amount extracted");
                    return Some(amount);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(strategy = strategy.name(), "Amount extraction failed: {}", e);
                }
            }
        }
        None
    }
}

/// IN when the text starts with `+` or mentions an inflow keyword, else OUT
pub fn direction(text: &str) -> Direction {
    if text.trim_start().starts_with('+') {
        return Direction::In;
    }
    let padded = format!(" {} ", normalize(text));
    if INFLOW_KEYWORDS
        .iter()
        .any(|kw| padded.contains(&format!(" {} ", kw)))
    {
        Direction::In
    } else {
        Direction::Out
    }
}

/// Amounts written out in Vietnamese words
///
/// Only accepted when a scale word (nghìn, triệu, tỷ) follows a spelled number,
/// so "năm nay" (this year) or a bare "hai" (two) is never read as money.
pub struct SpelledAmount;

fn digit_word(word: &str) -> Option<u64> {
    Some(match word {
        "không" => 0,
        "một" | "mốt" => 1,
        "hai" => 2,
        "ba" => 3,
        "bốn" | "tư" => 4,
        "năm" | "lăm" => 5,
        "sáu" => 6,
        "bảy" | "bẩy" => 7,
        "tám" => 8,
        "chín" => 9,
        _ => return None,
    })
}

fn scale_word(word: &str) -> Option<u64> {
    Some(match word {
        "nghìn" | "ngàn" => 1_000,
        "triệu" => 1_000_000,
        "tỷ" | "tỉ" => 1_000_000_000,
        _ => return None,
    })
}

impl AmountStrategy for SpelledAmount {
    fn name(&self) -> &'static str {
        "spelled"
    }

    fn extract(&self, text: &str) -> Result<Option<f64>> {
        let normalized = normalize(text);

        let mut total: u64 = 0;
        let mut section: u64 = 0;
        let mut pending: u64 = 0;
        let mut started = false;
        let mut scaled = false;
        let mut last_scale: u64 = 0;

        for word in normalized.split(' ') {
            if let Some(d) = digit_word(word) {
                pending = d;
                started = true;
                continue;
            }
            match word {
                "mười" => {
                    section += 10;
                    started = true;
                }
                "mươi" if started => {
                    section += pending * 10;
                    pending = 0;
                }
                "trăm" if started => {
                    section += pending * 100;
                    pending = 0;
                }
                "linh" | "lẻ" if started => {}
                "rưỡi" if scaled => {
                    total += last_scale / 2;
                    break;
                }
                _ => {
                    if let Some(scale) = scale_word(word) {
                        if started {
                            let value = section + pending;
                            total += value.max(1) * scale;
                            section = 0;
                            pending = 0;
                            scaled = true;
                            last_scale = scale;
                        }
                    } else if scaled {
                        break;
                    } else {
                        // Unrelated word before any scale: restart
                        section = 0;
                        pending = 0;
                        started = false;
                    }
                }
            }
        }

        if !scaled {
            return Ok(None);
        }
        total += section + pending;
        Ok(Some(total as f64))
    }
}

/// Digits with optional separators and a Vietnamese unit suffix
pub struct CurrencyPattern {
    re: Regex,
}

impl Default for CurrencyPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrencyPattern {
    pub fn new() -> Self {
        let re = Regex::new(
            r"(?P<num>\d+(?:[.,]\d+)*)\s*(?P<unit>nghìn|nghin|ngàn|ngan|triệu|trieu|tr|tỷ|tỉ|ty|k|m|vnđ|vnd|đồng|dong|đ)?(?P<tail>\d{1,3})?\b",
        )
        .expect("valid regex");
        Self { re }
    }
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit {
        "k" | "nghìn" | "nghin" | "ngàn" | "ngan" => 1e3,
        "tr" | "triệu" | "trieu" | "m" => 1e6,
        "tỷ" | "tỉ" | "ty" => 1e9,
        _ => 1.0,
    }
}

/// "50.000" / "1,250,000" are grouped thousands; "1,5" / "2.5" are decimals
///
/// After a scale suffix ("1,5tr") a single separator is always a decimal point.
fn parse_number(raw: &str, scaled: bool) -> Option<f64> {
    let groups: Vec<&str> = raw.split(['.', ',']).collect();
    if groups.len() == 1 {
        return raw.parse().ok();
    }

    let grouped_thousands = groups[1..].iter().all(|g| g.len() == 3);
    if groups.len() > 2 || (grouped_thousands && !scaled) {
        if !grouped_thousands {
            return None;
        }
        return groups.concat().parse().ok();
    }

    format!("{}.{}", groups[0], groups[1]).parse().ok()
}

impl AmountStrategy for CurrencyPattern {
    fn name(&self) -> &'static str {
        "currency-pattern"
    }

    fn extract(&self, text: &str) -> Result<Option<f64>> {
        let lowered = text.to_lowercase();

        let mut first_with_unit: Option<f64> = None;
        let mut largest_bare: Option<f64> = None;

        for caps in self.re.captures_iter(&lowered) {
            let Some(num) = caps.name("num") else {
                continue;
            };
            let unit = caps.name("unit").map(|m| m.as_str());
            let multiplier = unit.map(unit_multiplier).unwrap_or(1.0);
            let Some(mut value) = parse_number(num.as_str(), multiplier > 1.0) else {
                continue;
            };

            match unit {
                Some(_) => {
                    if let Some(tail) = caps.name("tail") {
                        // "2tr5" = 2.5 triệu, "1k2" = 1.2 nghìn
                        let digits = tail.as_str();
                        let fraction: f64 = digits.parse::<f64>().unwrap_or(0.0)
                            / 10f64.powi(digits.len() as i32);
                        if multiplier > 1.0 {
                            value += fraction;
                        }
                    }
                    if first_with_unit.is_none() {
                        first_with_unit = Some(value * multiplier);
                    }
                }
                None => {
                    if largest_bare.map_or(true, |best| value > best) {
                        largest_bare = Some(value);
                    }
                }
            }
        }

        Ok(first_with_unit.or(largest_bare))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn amount(text: &str) -> Option<f64> {
        AmountExtractor::new().amount(text)
    }

    #[test]
    fn test_suffix_amounts() {
        assert_eq!(amount("ăn trưa 50k"), Some(50_000.0));
        assert_eq!(amount("cafe 35 nghìn"), Some(35_000.0));
        assert_eq!(amount("tiền nhà 3tr"), Some(3_000_000.0));
        assert_eq!(amount("mua xe 1 tỷ"), Some(1_000_000_000.0));
        assert_eq!(amount("học phí 5 triệu"), Some(5_000_000.0));
    }

    #[test]
    fn test_compact_decimal_forms() {
        assert_eq!(amount("lương 2tr5"), Some(2_500_000.0));
        assert_eq!(amount("điện thoại 1tr250"), Some(1_250_000.0));
        assert_eq!(amount("sửa xe 1k5"), Some(1_500.0));
        assert_eq!(amount("thưởng 1,5tr"), Some(1_500_000.0));
        assert_eq!(amount("vé 2.5 triệu"), Some(2_500_000.0));
    }

    #[test]
    fn test_separators() {
        assert_eq!(amount("grab 45.000đ"), Some(45_000.0));
        assert_eq!(amount("siêu thị 1,250,000"), Some(1_250_000.0));
        assert_eq!(amount("tiền điện 850.000 vnd"), Some(850_000.0));
        assert_eq!(amount("chuyển khoản 120000"), Some(120_000.0));
    }

    #[test]
    fn test_unit_amount_preferred_over_bare_number() {
        assert_eq!(amount("2 ly trà sữa 60k"), Some(60_000.0));
        assert_eq!(amount("cafe 30k, xăng 50k"), Some(30_000.0));
    }

    #[test]
    fn test_spelled_amounts() {
        assert_eq!(amount("năm mươi nghìn tiền cơm"), Some(50_000.0));
        assert_eq!(amount("hai triệu rưỡi"), Some(2_500_000.0));
        assert_eq!(amount("mười lăm nghìn gửi xe"), Some(15_000.0));
        assert_eq!(amount("ba trăm nghìn"), Some(300_000.0));
        assert_eq!(amount("một triệu hai trăm nghìn"), Some(1_200_000.0));
        assert_eq!(amount("nghìn"), None);
        assert_eq!(amount("năm nay đi du lịch"), None);
    }

    #[test]
    fn test_no_amount() {
        assert_eq!(amount("ăn trưa"), None);
        assert_eq!(amount(""), None);
        assert_eq!(amount("0k"), None);
    }

    #[test]
    fn test_direction() {
        assert_eq!(direction("ăn trưa 50k"), Direction::Out);
        assert_eq!(direction("Lương tháng 10 15tr"), Direction::In);
        assert_eq!(direction("được hoàn tiền 200k"), Direction::In);
        assert_eq!(direction("+500k"), Direction::In);
        assert_eq!(direction("bán đồ cũ 300k"), Direction::In);
        // "thuê" contains "thu" but is a different word
        assert_eq!(direction("thuê nhà 5tr"), Direction::Out);
    }

    struct Failing;

    impl AmountStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extract(&self, _text: &str) -> Result<Option<f64>> {
            Err(Error::InvalidData("boom".into()))
        }
    }

    #[test]
    fn test_failing_strategy_cascades() {
        let extractor = AmountExtractor::with_strategies(vec![
            Box::new(Failing),
            Box::new(CurrencyPattern::new()),
        ]);
        let extraction = extractor.extract("ăn trưa 50k");
        assert_eq!(extraction.amount, Some(50_000.0));
        assert_eq!(extraction.direction, Direction::Out);

        let only_failing = AmountExtractor::with_strategies(vec![Box::new(Failing)]);
        assert_eq!(only_failing.amount("50k"), None);
    }
}
