use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use procura_core::domain::counterparty::{
    normalize_address, normalize_categories, Counterparty, CounterpartyId,
};
use procura_core::domain::outcome::PurchaseRecord;
use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitId, QuoteUnitStatus};
use procura_core::domain::request::{QuoteRequest, QuoteRequestId};

use super::{
    CounterpartyRepository, PurchaseMemoryRepository, QuoteRequestRepository,
    QuoteUnitRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryQuoteRequestRepository {
    requests: RwLock<HashMap<String, QuoteRequest>>,
}

#[async_trait::async_trait]
impl QuoteRequestRepository for InMemoryQuoteRequestRepository {
    async fn save(&self, request: QuoteRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "quote request {} already exists",
                request.id
            )));
        }
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &QuoteRequestId,
    ) -> Result<Option<QuoteRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }
}

/// Units kept in insertion order; the write lock makes each mutation atomic the way a
/// single SQL statement is.
#[derive(Default)]
pub struct InMemoryQuoteUnitRepository {
    units: RwLock<Vec<QuoteUnit>>,
}

impl InMemoryQuoteUnitRepository {
    fn apply_reply(
        unit: &mut QuoteUnit,
        response: &str,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<QuoteUnit, RepositoryError> {
        unit.record_response(response, price, at)?;
        Ok(unit.clone())
    }
}

#[async_trait::async_trait]
impl QuoteUnitRepository for InMemoryQuoteUnitRepository {
    async fn create(&self, unit: QuoteUnit) -> Result<(), RepositoryError> {
        let mut units = self.units.write().await;
        let duplicate = units.iter().any(|existing| {
            existing.id == unit.id
                || (existing.request_id == unit.request_id
                    && existing.counterparty_id == unit.counterparty_id)
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "quote unit for request {} and counterparty {} already exists",
                unit.request_id, unit.counterparty_id
            )));
        }
        units.push(unit);
        Ok(())
    }

    async fn find_by_id(&self, id: &QuoteUnitId) -> Result<Option<QuoteUnit>, RepositoryError> {
        let units = self.units.read().await;
        Ok(units.iter().find(|unit| &unit.id == id).cloned())
    }

    async fn list_for_request(
        &self,
        request_id: &QuoteRequestId,
    ) -> Result<Vec<QuoteUnit>, RepositoryError> {
        let units = self.units.read().await;
        Ok(units.iter().filter(|unit| &unit.request_id == request_id).cloned().collect())
    }

    async fn list_pending_for_counterparty(
        &self,
        counterparty_id: &CounterpartyId,
    ) -> Result<Vec<QuoteUnit>, RepositoryError> {
        let units = self.units.read().await;
        let mut pending: Vec<(usize, QuoteUnit)> = units
            .iter()
            .enumerate()
            .filter(|(_, unit)| {
                &unit.counterparty_id == counterparty_id
                    && unit.status == QuoteUnitStatus::Pending
            })
            .map(|(position, unit)| (position, unit.clone()))
            .collect();
        pending.sort_by(|(left_pos, left), (right_pos, right)| {
            right.created_at.cmp(&left.created_at).then(right_pos.cmp(left_pos))
        });
        Ok(pending.into_iter().map(|(_, unit)| unit).collect())
    }

    async fn mark_received_latest_pending(
        &self,
        counterparty_id: &CounterpartyId,
        response: &str,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<Option<QuoteUnit>, RepositoryError> {
        let mut units = self.units.write().await;
        let latest = units
            .iter_mut()
            .enumerate()
            .filter(|(_, unit)| {
                &unit.counterparty_id == counterparty_id
                    && unit.status == QuoteUnitStatus::Pending
            })
            .max_by(|(left_pos, left), (right_pos, right)| {
                left.created_at.cmp(&right.created_at).then(left_pos.cmp(right_pos))
            })
            .map(|(_, unit)| unit);

        latest.map(|unit| Self::apply_reply(unit, response, price, at)).transpose()
    }

    async fn mark_received(
        &self,
        unit_id: &QuoteUnitId,
        counterparty_id: &CounterpartyId,
        response: &str,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<Option<QuoteUnit>, RepositoryError> {
        let mut units = self.units.write().await;
        let target = units.iter_mut().find(|unit| {
            &unit.id == unit_id
                && &unit.counterparty_id == counterparty_id
                && unit.status == QuoteUnitStatus::Pending
        });

        target.map(|unit| Self::apply_reply(unit, response, price, at)).transpose()
    }

    async fn update_status(
        &self,
        unit_id: &QuoteUnitId,
        status: QuoteUnitStatus,
    ) -> Result<QuoteUnit, RepositoryError> {
        let mut units = self.units.write().await;
        let unit = units
            .iter_mut()
            .find(|unit| &unit.id == unit_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("quote unit {unit_id}")))?;
        unit.transition_to(status)?;
        Ok(unit.clone())
    }
}

#[derive(Default)]
pub struct InMemoryCounterpartyRepository {
    counterparties: RwLock<HashMap<String, Counterparty>>,
}

impl InMemoryCounterpartyRepository {
    pub fn with_counterparties(counterparties: impl IntoIterator<Item = Counterparty>) -> Self {
        let counterparties = counterparties
            .into_iter()
            .map(|mut counterparty| {
                counterparty.address = normalize_address(&counterparty.address);
                (counterparty.id.0.clone(), counterparty)
            })
            .collect();
        Self { counterparties: RwLock::new(counterparties) }
    }
}

#[async_trait::async_trait]
impl CounterpartyRepository for InMemoryCounterpartyRepository {
    async fn add(&self, mut counterparty: Counterparty) -> Result<(), RepositoryError> {
        counterparty.address = normalize_address(&counterparty.address);
        let mut counterparties = self.counterparties.write().await;
        let taken = counterparties.contains_key(&counterparty.id.0)
            || counterparties.values().any(|existing| existing.address == counterparty.address);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "a counterparty with id {} or address {} already exists",
                counterparty.id, counterparty.address
            )));
        }
        counterparties.insert(counterparty.id.0.clone(), counterparty);
        Ok(())
    }

    async fn get(&self, id: &CounterpartyId) -> Result<Option<Counterparty>, RepositoryError> {
        let counterparties = self.counterparties.read().await;
        Ok(counterparties.get(&id.0).cloned())
    }

    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Counterparty>, RepositoryError> {
        let address = normalize_address(address);
        let counterparties = self.counterparties.read().await;
        Ok(counterparties.values().find(|counterparty| counterparty.address == address).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Counterparty>, RepositoryError> {
        let counterparties = self.counterparties.read().await;
        let mut active: Vec<Counterparty> =
            counterparties.values().filter(|counterparty| counterparty.active).cloned().collect();
        active.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(active)
    }

    async fn by_category(
        &self,
        categories: &[String],
    ) -> Result<Vec<Counterparty>, RepositoryError> {
        let wanted = normalize_categories(categories);
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|counterparty| !counterparty.categories.is_disjoint(&wanted))
            .collect())
    }

    async fn update_rating(&self, id: &CounterpartyId, rating: f64) -> Result<(), RepositoryError> {
        let mut counterparties = self.counterparties.write().await;
        let counterparty = counterparties
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("counterparty {id}")))?;
        counterparty.rating = rating;
        Ok(())
    }

    async fn deactivate(&self, id: &CounterpartyId) -> Result<(), RepositoryError> {
        let mut counterparties = self.counterparties.write().await;
        let counterparty = counterparties
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("counterparty {id}")))?;
        counterparty.active = false;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPurchaseMemoryRepository {
    records: RwLock<Vec<PurchaseRecord>>,
}

#[async_trait::async_trait]
impl PurchaseMemoryRepository for InMemoryPurchaseMemoryRepository {
    async fn save(&self, record: PurchaseRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<PurchaseRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut ordered: Vec<(usize, &PurchaseRecord)> = records.iter().enumerate().collect();
        ordered.sort_by(|(left_pos, left), (right_pos, right)| {
            right.created_at.cmp(&left.created_at).then(right_pos.cmp(left_pos))
        });
        Ok(ordered.into_iter().take(limit as usize).map(|(_, record)| record.clone()).collect())
    }

    async fn last(&self) -> Result<Option<PurchaseRecord>, RepositoryError> {
        Ok(self.recent(1).await?.into_iter().next())
    }
}
