//! Best-effort extraction of a monetary amount from free-text replies.

use std::str::FromStr;

use rust_decimal::Decimal;

struct Candidate {
    amount: Decimal,
    has_fraction: bool,
    marked: bool,
}

/// Returns the amount a counterparty quoted, if one can be read from the reply.
///
/// Amounts introduced by a currency marker (`R$`, `US$`, `$`) take precedence; without a
/// marker the first number carrying a decimal part is used. A lone separator followed by
/// exactly three digits is read as a thousands separator (`1.500` is fifteen hundred).
pub fn parse_price(text: &str) -> Option<Decimal> {
    let candidates = scan(text);
    candidates
        .iter()
        .find(|candidate| candidate.marked)
        .or_else(|| candidates.iter().find(|candidate| candidate.has_fraction))
        .map(|candidate| candidate.amount)
}

fn scan(text: &str) -> Vec<Candidate> {
    let chars: Vec<char> = text.chars().collect();
    let mut candidates = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        if !chars[index].is_ascii_digit() {
            index += 1;
            continue;
        }

        let start = index;
        let mut raw = String::new();
        while index < chars.len() {
            let ch = chars[index];
            if ch.is_ascii_digit() {
                raw.push(ch);
                index += 1;
            } else if (ch == '.' || ch == ',')
                && chars.get(index + 1).is_some_and(char::is_ascii_digit)
            {
                raw.push(ch);
                index += 1;
            } else {
                break;
            }
        }

        let marked = preceded_by_currency(&chars[..start]);
        if let Some((amount, has_fraction)) = to_decimal(&raw) {
            candidates.push(Candidate { amount, has_fraction, marked });
        }
    }

    candidates
}

fn preceded_by_currency(prefix: &[char]) -> bool {
    prefix.iter().rev().find(|ch| !ch.is_whitespace()).is_some_and(|ch| *ch == '$')
}

fn to_decimal(raw: &str) -> Option<(Decimal, bool)> {
    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');

    let decimal_separator = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => Some(if dot > comma { '.' } else { ',' }),
        (Some(_), None) => single_kind_separator(raw, '.'),
        (None, Some(_)) => single_kind_separator(raw, ','),
        (None, None) => None,
    };

    let normalized: String = match decimal_separator {
        Some(separator) => {
            let split_at = raw.rfind(separator)?;
            let (whole, fraction) = raw.split_at(split_at);
            let whole: String = whole.chars().filter(char::is_ascii_digit).collect();
            format!("{whole}.{}", &fraction[1..])
        }
        None => raw.chars().filter(char::is_ascii_digit).collect(),
    };

    Decimal::from_str(&normalized).ok().map(|amount| (amount, decimal_separator.is_some()))
}

fn single_kind_separator(raw: &str, separator: char) -> Option<char> {
    let occurrences = raw.matches(separator).count();
    if occurrences > 1 {
        return None;
    }
    let digits_after = raw.rsplit(separator).next().map(str::len).unwrap_or_default();
    (digits_after != 3).then_some(separator)
}
