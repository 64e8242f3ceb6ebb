use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tera::{Context, Tera};
use tracing::debug;

use procura_core::domain::counterparty::{Counterparty, CounterpartyId};
use procura_core::domain::quote_unit::QuoteUnit;
use procura_core::domain::request::{LineItem, QuoteRequest};
use procura_core::price::parse_price;

use crate::error::AssistantError;
use crate::llm::{LlmClient, ToolInvocation, ToolSpec};

const SOLICITATION_TEMPLATE: &str = "solicitation.txt";

/// One counterparty suggested by the matching capability. The id may be stale or
/// repeated; the matcher filters it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub counterparty_id: String,
    #[serde(default)]
    pub reason: String,
}

/// A received quote unit as handed to the ranking capability.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReceivedQuote {
    pub counterparty_id: CounterpartyId,
    pub counterparty: String,
    pub items: Vec<LineItem>,
    pub response: String,
    pub price: Option<Decimal>,
}

impl ReceivedQuote {
    pub fn new(unit: &QuoteUnit, counterparty_name: impl Into<String>) -> Self {
        Self {
            counterparty_id: unit.counterparty_id.clone(),
            counterparty: counterparty_name.into(),
            items: unit.items.clone(),
            response: unit.response.clone().unwrap_or_default(),
            price: unit.price,
        }
    }
}

/// Ranking result. Every field may be missing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankedOutcome {
    pub recommendation: Option<String>,
    pub best_counterparty: Option<String>,
    pub total_price: Option<Decimal>,
    pub table: Option<String>,
}

impl RankedOutcome {
    /// Reads each field on its own; a field of the wrong shape is dropped, never fatal.
    /// `total_price` may be a number or a price string such as `"R$ 320,00"`.
    pub fn from_tool_result(value: &Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str))
                .map(str::to_owned)
        };
        let total_price = match value.get("total_price") {
            Some(Value::Number(number)) => number.to_string().parse::<Decimal>().ok(),
            Some(Value::String(raw)) => parse_price(raw).or_else(|| raw.trim().parse().ok()),
            _ => None,
        };
        Self {
            recommendation: text(&["recommendation"]),
            best_counterparty: text(&["best_counterparty", "best_supplier"]),
            total_price,
            table: text(&["table", "comparison_table"]),
        }
    }
}

/// Extraction, matching, composition and ranking capability consumed by the engine.
#[async_trait]
pub trait QuoteAssistant: Send + Sync {
    async fn extract_items(&self, description: &str) -> Result<Vec<LineItem>, AssistantError>;

    async fn match_counterparties(
        &self,
        items: &[String],
        locality: &str,
        directory: &[Counterparty],
    ) -> Result<Vec<MatchSuggestion>, AssistantError>;

    async fn compose_message(
        &self,
        request: &QuoteRequest,
        counterparty: &Counterparty,
    ) -> Result<String, AssistantError>;

    async fn rank_quotes(
        &self,
        request: &QuoteRequest,
        received: &[ReceivedQuote],
    ) -> Result<RankedOutcome, AssistantError>;
}

/// Deterministic solicitation text used when no composed message is available.
pub fn template_message(
    request: &QuoteRequest,
    counterparty: &Counterparty,
) -> Result<String, AssistantError> {
    let mut tera = Tera::default();
    tera.add_raw_template(
        SOLICITATION_TEMPLATE,
        include_str!("../../../templates/messages/solicitation.txt"),
    )
    .map_err(|error| AssistantError::Template(error.to_string()))?;

    let mut context = Context::new();
    context.insert("counterparty", &counterparty.name);
    context.insert("description", &request.description);
    context.insert(
        "items",
        &request.items.iter().map(LineItem::describe).collect::<Vec<_>>(),
    );

    tera.render(SOLICITATION_TEMPLATE, &context)
        .map(|text| text.trim_end().to_owned())
        .map_err(|error| AssistantError::Template(error.to_string()))
}

#[derive(Debug, Deserialize)]
struct ExtractedItem {
    name: String,
    #[serde(alias = "quantity")]
    qty: Decimal,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Matches {
    #[serde(default)]
    matches: Vec<MatchSuggestion>,
}

#[derive(Debug, Deserialize)]
struct ComposedMessage {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct DirectoryEntry<'a> {
    id: &'a str,
    name: &'a str,
    categories: Vec<&'a str>,
    locality: &'a str,
    rating: f64,
}

/// Assistant backed by a language model. Each capability is a single forced tool call.
pub struct LlmAssistant<C> {
    client: C,
}

impl<C: LlmClient> LlmAssistant<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    async fn call_raw(
        &self,
        system: &str,
        prompt: String,
        tool: ToolSpec,
    ) -> Result<Option<Value>, AssistantError> {
        self.client.invoke_tool(ToolInvocation { system: system.to_owned(), prompt, tool }).await
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        system: &str,
        prompt: String,
        tool: ToolSpec,
    ) -> Result<Option<T>, AssistantError> {
        let name = tool.name.clone();
        self.call_raw(system, prompt, tool)
            .await?
            .map(|value| {
                serde_json::from_value::<T>(value).map_err(|error| {
                    AssistantError::Decode(format!("`{name}` result did not match schema: {error}"))
                })
            })
            .transpose()
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AssistantError> {
    serde_json::to_string(value).map_err(|error| AssistantError::Decode(error.to_string()))
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolSpec {
    ToolSpec { name: name.to_owned(), description: description.to_owned(), input_schema }
}

#[async_trait]
impl<C: LlmClient> QuoteAssistant for LlmAssistant<C> {
    async fn extract_items(&self, description: &str) -> Result<Vec<LineItem>, AssistantError> {
        let spec = tool(
            "parse_purchase_request",
            "Extracts the list of items and quantities from a natural-language purchase request",
            json!({
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string", "description": "Item name" },
                                "qty": { "type": "number", "description": "Quantity" },
                                "unit": { "type": "string", "description": "Unit (kg, litre, unit, m2, ...)" },
                                "note": { "type": "string", "description": "Extra specification, if any" }
                            },
                            "required": ["name", "qty", "unit"]
                        }
                    }
                },
                "required": ["items"]
            }),
        );
        let prompt = format!("Analyse this purchase request and extract its items: {description:?}");
        let extracted = self
            .call_raw(
                "You are a purchasing assistant. Interpret purchase requests and extract items with precise quantities.",
                prompt,
                spec,
            )
            .await?;

        let raw_items = match extracted.as_ref().and_then(|value| value.get("items")) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let items = raw_items
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<ExtractedItem>(raw) {
                Ok(item) => Some(item),
                Err(error) => {
                    debug!(event_name = "assistant.extract.item_malformed", error = %error, "dropping malformed extracted item");
                    None
                }
            })
            .filter_map(|item| {
                let mut line = LineItem::new(item.name.trim(), item.qty, item.unit.trim());
                line.note = item.note.filter(|note| !note.trim().is_empty());
                match line.validate() {
                    Ok(()) => Some(line),
                    Err(error) => {
                        debug!(event_name = "assistant.extract.item_dropped", error = %error, "dropping invalid extracted item");
                        None
                    }
                }
            })
            .collect();
        Ok(items)
    }

    async fn match_counterparties(
        &self,
        items: &[String],
        locality: &str,
        directory: &[Counterparty],
    ) -> Result<Vec<MatchSuggestion>, AssistantError> {
        let entries = directory
            .iter()
            .map(|counterparty| DirectoryEntry {
                id: &counterparty.id.0,
                name: &counterparty.name,
                categories: counterparty.categories.iter().map(String::as_str).collect(),
                locality: &counterparty.locality,
                rating: counterparty.rating,
            })
            .collect::<Vec<_>>();
        let spec = tool(
            "match_counterparties",
            "Returns the ids of the counterparties best suited to supply the requested items",
            json!({
                "type": "object",
                "properties": {
                    "matches": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "counterparty_id": { "type": "string" },
                                "reason": { "type": "string" }
                            },
                            "required": ["counterparty_id", "reason"]
                        }
                    }
                },
                "required": ["matches"]
            }),
        );
        let prompt = format!(
            "Given the items to buy and the available counterparties, select which counterparties \
             should receive a quote request.\n\nItems: {}\n\nCounterparties: {}\n\nTarget locality: {locality}\n\n\
             Prefer counterparties in the same locality. Select every counterparty that can supply at least one item.",
            to_json(&items)?,
            to_json(&entries)?,
        );

        let matches: Option<Matches> =
            self.call("You are an expert in local purchasing.", prompt, spec).await?;
        Ok(matches.map(|matches| matches.matches).unwrap_or_default())
    }

    async fn compose_message(
        &self,
        request: &QuoteRequest,
        counterparty: &Counterparty,
    ) -> Result<String, AssistantError> {
        let spec = tool(
            "compose_quote_message",
            "Composes the chat message asking the counterparty for a quote",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Complete message text" }
                },
                "required": ["message"]
            }),
        );
        let prompt = format!(
            "Write a friendly, professional chat message to {:?} asking for a quote on these items:\n{}\n\
             The message must list the items and quantities and ask for the unit price and delivery time.",
            counterparty.name,
            to_json(&request.items)?,
        );

        let composed: Option<ComposedMessage> = self
            .call(
                "You write chat messages requesting price quotes from local suppliers. Be direct and professional.",
                prompt,
                spec,
            )
            .await?;

        match composed.map(|composed| composed.message).filter(|text| !text.trim().is_empty()) {
            Some(message) => Ok(message),
            None => template_message(request, counterparty),
        }
    }

    async fn rank_quotes(
        &self,
        request: &QuoteRequest,
        received: &[ReceivedQuote],
    ) -> Result<RankedOutcome, AssistantError> {
        let spec = tool(
            "compare_quotes",
            "Compares the received quotes and recommends the best option",
            json!({
                "type": "object",
                "properties": {
                    "recommendation": { "type": "string" },
                    "best_counterparty": { "type": "string" },
                    "total_price": { "type": "number" },
                    "table": { "type": "string", "description": "Text table comparing counterparties" }
                },
                "required": ["recommendation", "best_counterparty", "table"]
            }),
        );
        let prompt = format!(
            "Analyse the quotes received for: {:?}\n\nQuotes:\n{}\n\n\
             Use compare_quotes to recommend the best option considering price, lead time and quality.",
            request.description,
            to_json(&received)?,
        );

        let ranked = self
            .call_raw(
                "You are a purchasing expert. Analyse quotes and recommend the best value option.",
                prompt,
                spec,
            )
            .await?;
        Ok(ranked.as_ref().map(RankedOutcome::from_tool_result).unwrap_or_default())
    }
}
