use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterpartyId(pub String);

impl CounterpartyId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for CounterpartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directory entry able to answer solicitations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Counterparty {
    pub id: CounterpartyId,
    pub name: String,
    pub address: String,
    pub locality: String,
    pub categories: BTreeSet<String>,
    pub rating: f64,
    pub active: bool,
}

impl Counterparty {
    pub fn new(
        name: impl Into<String>,
        address: &str,
        locality: impl Into<String>,
        categories: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::InvariantViolation("counterparty name is empty".to_string()));
        }

        let address = normalize_address(address);
        if address.trim_start_matches('+').is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "counterparty `{name}` has no usable contact address"
            )));
        }

        Ok(Self {
            id: CounterpartyId::generate(),
            name,
            address,
            locality: locality.into(),
            categories: normalize_categories(categories),
            rating: 0.0,
            active: true,
        })
    }

    pub fn serves_any<S: AsRef<str>>(&self, categories: &[S]) -> bool {
        categories
            .iter()
            .any(|category| self.categories.contains(&normalize_category(category.as_ref())))
    }

    pub fn in_locality(&self, locality: &str) -> bool {
        self.locality.trim().eq_ignore_ascii_case(locality.trim())
    }
}

/// Canonical form of a contact address: digits only, keeping a leading `+`.
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(char::is_ascii_digit));
    normalized
}

pub fn normalize_category(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn normalize_categories(
    categories: impl IntoIterator<Item = impl AsRef<str>>,
) -> BTreeSet<String> {
    categories
        .into_iter()
        .map(|category| normalize_category(category.as_ref()))
        .filter(|category| !category.is_empty())
        .collect()
}
