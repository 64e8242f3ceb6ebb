use serde::{Deserialize, Serialize};

use crate::domain::quote_unit::QuoteUnitId;

const TOKEN_HEX_LEN: usize = 8;

/// How an inbound reply is attributed to one of the sender's quote units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationPolicy {
    /// Update the sender's most recently created pending unit.
    #[default]
    MostRecentPending,
    /// Require the reference token embedded in the outbound text to be echoed back.
    Token,
}

impl CorrelationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MostRecentPending => "most_recent_pending",
            Self::Token => "token",
        }
    }
}

impl std::str::FromStr for CorrelationPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "most_recent_pending" => Ok(Self::MostRecentPending),
            "token" => Ok(Self::Token),
            other => Err(format!(
                "unsupported correlation policy `{other}` (expected most_recent_pending|token)"
            )),
        }
    }
}

/// Short reference (`#3F9A12BC`) derived from a quote unit id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn for_unit(unit_id: &QuoteUnitId) -> Self {
        let hex: String = unit_id
            .0
            .chars()
            .filter(char::is_ascii_hexdigit)
            .take(TOKEN_HEX_LEN)
            .collect::<String>()
            .to_ascii_uppercase();
        Self(format!("#{hex:0<width$}", width = TOKEN_HEX_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn append_to(&self, text: &str) -> String {
        format!("{}\n\nRef: {}", text.trim_end(), self.0)
    }

    /// First `#` followed by eight hex digits found in `text`.
    pub fn find_in(text: &str) -> Option<Self> {
        Self::find_all_in(text).into_iter().next()
    }

    /// Every token-shaped reference in `text`, in order of appearance and without repeats.
    /// Replies often quote order numbers that look like tokens next to the real one.
    pub fn find_all_in(text: &str) -> Vec<Self> {
        let bytes = text.as_bytes();
        let mut found: Vec<Self> = Vec::new();
        for (index, _) in bytes.iter().enumerate().filter(|(_, byte)| **byte == b'#') {
            let Some(candidate) = bytes.get(index + 1..index + 1 + TOKEN_HEX_LEN) else {
                continue;
            };
            let boundary_ok =
                bytes.get(index + 1 + TOKEN_HEX_LEN).map_or(true, |next| !next.is_ascii_hexdigit());
            if candidate.iter().all(u8::is_ascii_hexdigit) && boundary_ok {
                let token =
                    Self(format!("#{}", String::from_utf8_lossy(candidate).to_ascii_uppercase()));
                if !found.contains(&token) {
                    found.push(token);
                }
            }
        }
        found
    }

    pub fn matches(&self, unit_id: &QuoteUnitId) -> bool {
        *self == Self::for_unit(unit_id)
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
