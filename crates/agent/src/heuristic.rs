use std::fmt::Write as _;

use async_trait::async_trait;
use rust_decimal::Decimal;

use procura_core::domain::counterparty::Counterparty;
use procura_core::domain::request::{LineItem, QuoteRequest};

use crate::assistant::{template_message, MatchSuggestion, QuoteAssistant, RankedOutcome, ReceivedQuote};
use crate::error::AssistantError;

const UNITS: &[&str] = &[
    "kg", "g", "l", "litre", "litres", "liter", "liters", "ml", "m", "m2", "m3", "bag", "bags",
    "box", "boxes", "unit", "units", "un", "pc", "pcs", "piece", "pieces", "dozen", "sack",
    "sacks", "roll", "rolls", "can", "cans", "pack", "packs", "pair", "pairs",
];

const FILLER_WORDS: &[&str] = &["of", "de", "the", "some", "a", "an"];

/// Offline assistant: deterministic parsing, keyword matching and lowest-price ranking.
#[derive(Clone, Debug, Default)]
pub struct HeuristicAssistant;

impl HeuristicAssistant {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QuoteAssistant for HeuristicAssistant {
    async fn extract_items(&self, description: &str) -> Result<Vec<LineItem>, AssistantError> {
        Ok(parse_items(description))
    }

    async fn match_counterparties(
        &self,
        items: &[String],
        locality: &str,
        directory: &[Counterparty],
    ) -> Result<Vec<MatchSuggestion>, AssistantError> {
        let candidates = directory
            .iter()
            .filter(|counterparty| counterparty.active)
            .filter_map(|counterparty| {
                matched_keyword(counterparty, items).map(|keyword| (counterparty, keyword))
            })
            .collect::<Vec<_>>();

        let local = candidates
            .iter()
            .filter(|(counterparty, _)| counterparty.in_locality(locality))
            .collect::<Vec<_>>();
        let selected = if local.is_empty() { candidates.iter().collect() } else { local };

        Ok(selected
            .into_iter()
            .map(|(counterparty, keyword)| MatchSuggestion {
                counterparty_id: counterparty.id.0.clone(),
                reason: format!("serves `{keyword}` in {}", counterparty.locality),
            })
            .collect())
    }

    async fn compose_message(
        &self,
        request: &QuoteRequest,
        counterparty: &Counterparty,
    ) -> Result<String, AssistantError> {
        template_message(request, counterparty)
    }

    async fn rank_quotes(
        &self,
        _request: &QuoteRequest,
        received: &[ReceivedQuote],
    ) -> Result<RankedOutcome, AssistantError> {
        let table = render_table(received);
        let best = received
            .iter()
            .filter_map(|quote| quote.price.map(|price| (quote, price)))
            .min_by(|(_, left), (_, right)| left.cmp(right));

        Ok(match best {
            Some((quote, price)) => RankedOutcome {
                recommendation: Some(format!(
                    "Lowest quoted price: {} at {}.",
                    quote.counterparty,
                    price.round_dp(2)
                )),
                best_counterparty: Some(quote.counterparty.clone()),
                total_price: Some(price),
                table: Some(table),
            },
            None => RankedOutcome {
                recommendation: Some(
                    "Replies received, but none carried a price to compare.".to_owned(),
                ),
                table: Some(table),
                ..RankedOutcome::default()
            },
        })
    }
}

/// Splits a free-text request into `<qty> <unit> <name>` fragments.
fn parse_items(description: &str) -> Vec<LineItem> {
    let normalized = description.to_lowercase().replace(" and ", ",").replace(" e ", ",");
    let items = split_fragments(&normalized)
        .into_iter()
        .filter_map(|fragment| parse_fragment(&fragment))
        .collect::<Vec<_>>();

    if items.is_empty() && !description.trim().is_empty() {
        return vec![LineItem::new(description.trim(), Decimal::ONE, "unit")];
    }
    items
}

/// Splits on `,` `;` `+` and newlines, keeping decimal commas such as `2,5` intact.
fn split_fragments(text: &str) -> Vec<String> {
    let characters = text.chars().collect::<Vec<_>>();
    let mut fragments = Vec::new();
    let mut current = String::new();

    for (index, character) in characters.iter().copied().enumerate() {
        let decimal_comma = character == ','
            && index > 0
            && characters[index - 1].is_ascii_digit()
            && characters.get(index + 1).is_some_and(char::is_ascii_digit);
        if matches!(character, ',' | ';' | '+' | '\n') && !decimal_comma {
            fragments.push(std::mem::take(&mut current));
        } else {
            current.push(character);
        }
    }
    fragments.push(current);
    fragments
}

fn parse_fragment(fragment: &str) -> Option<LineItem> {
    let mut tokens = split_number_prefix(fragment);
    if tokens.is_empty() {
        return None;
    }

    let quantity = tokens.first().and_then(|token| parse_quantity(token));
    if quantity.is_some() {
        tokens.remove(0);
    }

    let unit = match tokens.first() {
        Some(token) if quantity.is_some() && UNITS.contains(&token.as_str()) => {
            let unit = tokens.remove(0);
            Some(unit)
        }
        _ => None,
    };

    let name = tokens
        .into_iter()
        .skip_while(|token| FILLER_WORDS.contains(&token.as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        return None;
    }

    Some(LineItem::new(
        name,
        quantity.unwrap_or(Decimal::ONE),
        unit.unwrap_or_else(|| "unit".to_owned()),
    ))
}

/// `10kg cement` becomes `["10", "kg", "cement"]`.
fn split_number_prefix(fragment: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in fragment.split_whitespace() {
        let split_at = word
            .char_indices()
            .find(|(_, character)| !(character.is_ascii_digit() || matches!(character, '.' | ',')))
            .map(|(index, _)| index);
        match split_at {
            Some(index) if index > 0 => {
                tokens.push(word[..index].to_owned());
                tokens.push(word[index..].to_owned());
            }
            _ => tokens.push(word.to_owned()),
        }
    }
    tokens
        .into_iter()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != ',').to_owned())
        .filter(|token| !token.is_empty())
        .collect()
}

fn parse_quantity(token: &str) -> Option<Decimal> {
    if !token.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    token.replace(',', ".").parse::<Decimal>().ok().filter(|quantity| !quantity.is_sign_negative())
}

/// First category or name keyword linking the counterparty to a requested item.
fn matched_keyword(counterparty: &Counterparty, items: &[String]) -> Option<String> {
    let name = counterparty.name.to_lowercase();
    items.iter().find_map(|item| {
        let item = item.to_lowercase();
        let words = item.split_whitespace().filter(|word| word.len() > 2).collect::<Vec<_>>();

        counterparty
            .categories
            .iter()
            .find(|category| {
                item.contains(category.as_str())
                    || words.iter().any(|word| category.contains(word))
            })
            .cloned()
            .or_else(|| {
                words.iter().find(|word| name.contains(**word)).map(|word| (*word).to_owned())
            })
    })
}

fn render_table(received: &[ReceivedQuote]) -> String {
    let mut table = String::from("counterparty | price | reply\n");
    for quote in received {
        let price = quote
            .price
            .map(|price| price.round_dp(2).to_string())
            .unwrap_or_else(|| "-".to_owned());
        let reply = quote.response.lines().next().unwrap_or_default();
        let _ = writeln!(table, "{} | {} | {}", quote.counterparty, price, reply);
    }
    table.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{parse_items, HeuristicAssistant};
    use crate::assistant::{QuoteAssistant, ReceivedQuote};
    use procura_core::domain::counterparty::{Counterparty, CounterpartyId};
    use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitId};
    use procura_core::domain::request::{LineItem, QuoteRequest, QuoteRequestId};

    #[test]
    fn parses_quantity_unit_and_name_fragments() {
        let items = parse_items("10 bags of cement, 2,5 m3 sand and 3 shovels");

        assert_eq!(
            items,
            vec![
                LineItem::new("cement", Decimal::new(10, 0), "bags"),
                LineItem::new("sand", Decimal::new(25, 1), "m3"),
                LineItem::new("shovels", Decimal::new(3, 0), "unit"),
            ]
        );
    }

    #[test]
    fn glued_units_and_bare_names_are_understood() {
        let items = parse_items("5kg picanha; charcoal");
        assert_eq!(items[0], LineItem::new("picanha", Decimal::new(5, 0), "kg"));
        assert_eq!(items[1], LineItem::new("charcoal", Decimal::ONE, "unit"));
    }

    #[test]
    fn unparseable_text_becomes_a_single_item() {
        let items = parse_items("!!!");
        assert_eq!(items, vec![LineItem::new("!!!", Decimal::ONE, "unit")]);
    }

    fn counterparty(name: &str, locality: &str, categories: &[&str]) -> Counterparty {
        Counterparty::new(name, "+5567000001", locality, categories.iter().copied())
            .expect("counterparty")
    }

    #[tokio::test]
    async fn matching_prefers_local_counterparties() {
        let local = counterparty("Local Depot", "local", &["cement"]);
        let remote = counterparty("Far Depot", "riverside", &["cement"]);
        let butcher = counterparty("Butcher", "local", &["meat"]);
        let mut inactive = counterparty("Closed Depot", "local", &["cement"]);
        inactive.active = false;

        let matches = HeuristicAssistant::new()
            .match_counterparties(
                &["cement".to_owned()],
                "local",
                &[remote.clone(), local.clone(), butcher, inactive],
            )
            .await
            .expect("match");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].counterparty_id, local.id.0);

        let fallback = HeuristicAssistant::new()
            .match_counterparties(&["cement".to_owned()], "uptown", &[remote.clone()])
            .await
            .expect("match");
        assert_eq!(fallback[0].counterparty_id, remote.id.0);
    }

    fn received(name: &str, price: Option<Decimal>) -> ReceivedQuote {
        let mut unit = QuoteUnit::pending(
            QuoteUnitId::generate(),
            QuoteRequestId("R-1".to_owned()),
            CounterpartyId(name.to_owned()),
            Vec::new(),
        );
        unit.record_response(format!("{name} reply"), price, Utc::now()).expect("reply");
        ReceivedQuote::new(&unit, name)
    }

    fn request() -> QuoteRequest {
        QuoteRequest::new("cement", Vec::new(), false, Duration::from_secs(60)).expect("request")
    }

    #[tokio::test]
    async fn ranking_picks_the_lowest_price() {
        let ranked = HeuristicAssistant::new()
            .rank_quotes(&request(), &[
                received("Depot", Some(Decimal::new(3290, 2))),
                received("Shack", None),
                received("Yard", Some(Decimal::new(2990, 2))),
            ])
            .await
            .expect("rank");

        assert_eq!(ranked.best_counterparty.as_deref(), Some("Yard"));
        assert_eq!(ranked.total_price, Some(Decimal::new(2990, 2)));
        let table = ranked.table.expect("table");
        assert!(table.contains("Shack | - | Shack reply"));
    }

    #[tokio::test]
    async fn replies_without_prices_still_rank() {
        let ranked = HeuristicAssistant::new()
            .rank_quotes(&request(), &[received("Shack", None)])
            .await
            .expect("rank");

        assert!(ranked.best_counterparty.is_none());
        assert!(ranked.recommendation.is_some());
    }
}
