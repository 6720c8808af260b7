use bson::Document;
use log::{debug, error, warn};

use crate::db::store::{DocumentStore, IndexKey, Query, StoreError};

/// What a read does once every strategy has failed or a non-index error
/// stopped the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    ReturnEmpty,
    Propagate,
}

/// A read declared as an ordered list of query strategies. The first entry is
/// the ideal query; later entries drop server-side constraints and the
/// missing filtering, ordering and limit are completed in memory by
/// evaluating the ideal query over what they return.
pub struct ReadPlan<P: 'static> {
    pub name: &'static str,
    pub strategies: &'static [fn(&P) -> Query],
    pub on_failure: OnFailure,
}

/// Which strategy answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier(pub usize);

impl Tier {
    pub fn is_degraded(self) -> bool {
        self.0 > 0
    }
}

impl<P: 'static> ReadPlan<P> {
    pub fn ideal(&self, params: &P) -> Option<Query> {
        self.strategies.first().map(|strategy| strategy(params))
    }

    /// Composite indexes this plan's strategies would need for `params`.
    pub fn index_keys(&self, params: &P) -> Vec<IndexKey> {
        self.strategies
            .iter()
            .filter_map(|strategy| strategy(params).index_key())
            .collect()
    }

    pub async fn run(&self, store: &dyn DocumentStore, params: &P) -> Result<Vec<Document>, StoreError> {
        self.run_traced(store, params)
            .await
            .map(|(documents, _)| documents)
    }

    pub async fn run_traced(
        &self,
        store: &dyn DocumentStore,
        params: &P,
    ) -> Result<(Vec<Document>, Tier), StoreError> {
        let Some(ideal) = self.ideal(params) else {
            return self.exhausted(StoreError::Backend(format!("{} has no strategies", self.name)));
        };

        let mut last_error = None;
        for (tier, strategy) in self.strategies.iter().enumerate() {
            let query = if tier == 0 { ideal.clone() } else { strategy(params) };
            match store.query(&query).await {
                Ok(documents) if tier == 0 => return Ok((documents, Tier(0))),
                Ok(documents) => {
                    debug!("{}: served by fallback tier {}", self.name, tier + 1);
                    return Ok((ideal.evaluate(documents), Tier(tier)));
                }
                Err(err) if err.is_index_not_ready() => {
                    warn!("{}: index not ready at tier {}, degrading", self.name, tier + 1);
                    last_error = Some(err);
                }
                Err(err) => return self.exhausted(err),
            }
        }

        let err = last_error.unwrap_or_else(|| StoreError::Backend(format!("{} exhausted", self.name)));
        self.exhausted(err)
    }

    fn exhausted(&self, err: StoreError) -> Result<(Vec<Document>, Tier), StoreError> {
        match self.on_failure {
            OnFailure::ReturnEmpty => {
                error!("{} failed, returning no results: {}", self.name, err);
                Ok((Vec::new(), Tier(self.strategies.len().saturating_sub(1))))
            }
            OnFailure::Propagate => {
                error!("{} failed: {}", self.name, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::store::{collections, Direction};
    use bson::doc;

    struct SlotParams {
        tour_id: &'static str,
    }

    fn full(params: &SlotParams) -> Query {
        Query::collection(collections::SLOTS)
            .where_eq("tourId", params.tour_id)
            .where_gt("availableSpots", 0)
            .order_by("date", Direction::Asc)
    }

    fn by_tour(params: &SlotParams) -> Query {
        Query::collection(collections::SLOTS).where_eq("tourId", params.tour_id)
    }

    const SLOTS: ReadPlan<SlotParams> = ReadPlan {
        name: "test slots",
        strategies: &[full, by_tour],
        on_failure: OnFailure::ReturnEmpty,
    };

    const STRICT: ReadPlan<SlotParams> = ReadPlan {
        name: "strict slots",
        strategies: &[full, by_tour],
        on_failure: OnFailure::Propagate,
    };

    async fn seeded(store: &MemoryStore) {
        let rows = [
            ("s1", "t1", "2026-11-03", 0),
            ("s2", "t1", "2026-11-02", 4),
            ("s3", "t1", "2026-11-01", 2),
            ("s4", "t2", "2026-11-01", 9),
        ];
        for (id, tour, date, spots) in rows {
            store
                .insert(
                    collections::SLOTS,
                    id,
                    doc! { "tourId": tour, "date": date, "availableSpots": spots },
                )
                .await
                .unwrap();
        }
    }

    fn ids(documents: &[Document]) -> Vec<String> {
        documents
            .iter()
            .map(|d| d.get_str("_id").unwrap().to_string())
            .collect()
    }

    #[actix_rt::test]
    async fn test_degraded_tier_matches_ideal_result() {
        let store = MemoryStore::new();
        seeded(&store).await;
        let params = SlotParams { tour_id: "t1" };

        let (ideal, tier) = SLOTS.run_traced(&store, &params).await.unwrap();
        assert_eq!(tier, Tier(0));

        store.set_index_enforcement(true);
        let (degraded, tier) = SLOTS.run_traced(&store, &params).await.unwrap();
        assert!(tier.is_degraded());
        assert_eq!(ids(&degraded), ids(&ideal));
        assert_eq!(ids(&degraded), vec!["s3", "s2"]);
    }

    #[actix_rt::test]
    async fn test_backend_failure_policy() {
        let store = MemoryStore::new();
        seeded(&store).await;
        store.fail_queries_on(collections::SLOTS);
        let params = SlotParams { tour_id: "t1" };

        assert!(SLOTS.run(&store, &params).await.unwrap().is_empty());
        assert!(matches!(
            STRICT.run(&store, &params).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn test_index_keys_skip_simple_strategies() {
        let keys = SLOTS.index_keys(&SlotParams { tour_id: "t1" });
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].collection, collections::SLOTS);
    }
}
