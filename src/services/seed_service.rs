use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::db::store::{
    collections, from_documents, new_id, to_document, DocumentStore, Query, StoreError, WriteBatch, ID_FIELD,
};
use crate::models::slot::AvailableSlot;
use crate::models::tour::Tour;
use crate::services::booking_service::BookingService;

pub const SEED_DAYS: i64 = 30;
pub const SLOT_TIMES: [&str; 3] = ["09:00", "13:00", "16:00"];
const SLOT_KEEP_PROBABILITY: f64 = 0.7;
const MIN_SEED_SPOTS: i32 = 5;

struct SampleTour {
    company: &'static str,
    location: &'static str,
    description: &'static str,
    highlights: [&'static str; 4],
    rating: f64,
    duration: i32,
    price: f64,
    max_attendees: i32,
    available_slots: i32,
    image: &'static str,
    popular: bool,
    trending: bool,
}

const SAMPLE_TOURS: [SampleTour; 6] = [
    SampleTour {
        company: "Apple",
        location: "Apple Park, Cupertino",
        description: "Explore the iconic Apple Park campus and visitor center",
        highlights: ["Innovation Hub", "Campus Walk", "Visitor Center", "Apple Store"],
        rating: 4.9,
        duration: 180,
        price: 89.0,
        max_attendees: 20,
        available_slots: 15,
        image: "/images/apple-park.jpg",
        popular: true,
        trending: false,
    },
    SampleTour {
        company: "Google",
        location: "Googleplex, Mountain View",
        description: "Discover the colorful world of Google's headquarters",
        highlights: ["Android Lawn", "Campus Tour", "Innovation Labs", "Google Store"],
        rating: 4.8,
        duration: 150,
        price: 79.0,
        max_attendees: 25,
        available_slots: 20,
        image: "/images/google-campus.jpg",
        popular: true,
        trending: true,
    },
    SampleTour {
        company: "Meta",
        location: "Meta HQ, Menlo Park",
        description: "Step into the future of social connection and VR",
        highlights: ["VR Experience", "Campus Walk", "Innovation Center", "Photo Ops"],
        rating: 4.7,
        duration: 120,
        price: 69.0,
        max_attendees: 20,
        available_slots: 18,
        image: "/images/meta-campus.jpg",
        popular: false,
        trending: true,
    },
    SampleTour {
        company: "Tesla",
        location: "Tesla Factory, Fremont",
        description: "Witness the future of sustainable transportation",
        highlights: ["Factory Tour", "Model Showcase", "Supercharger Demo", "Innovation Talk"],
        rating: 4.8,
        duration: 210,
        price: 99.0,
        max_attendees: 15,
        available_slots: 12,
        image: "/images/tesla-factory.jpg",
        popular: true,
        trending: false,
    },
    SampleTour {
        company: "Netflix",
        location: "Netflix HQ, Los Gatos",
        description: "Go behind the scenes of the streaming revolution",
        highlights: ["Studio Tour", "Content Creation", "Tech Demo", "Exclusive Previews"],
        rating: 4.6,
        duration: 120,
        price: 75.0,
        max_attendees: 15,
        available_slots: 10,
        image: "/images/netflix-studios.jpg",
        popular: false,
        trending: false,
    },
    SampleTour {
        company: "Stanford",
        location: "Stanford University, Stanford",
        description: "Explore the innovation hub where tech giants were born",
        highlights: ["Campus Tour", "Innovation Labs", "Startup Culture", "Historical Sites"],
        rating: 4.7,
        duration: 150,
        price: 65.0,
        max_attendees: 30,
        available_slots: 25,
        image: "/images/stanford-university.jpg",
        popular: false,
        trending: true,
    },
];

/// The six sample tours, each with a fresh id.
pub fn sample_tours() -> Vec<Tour> {
    SAMPLE_TOURS
        .iter()
        .map(|sample| Tour {
            id: new_id(),
            company: sample.company.to_string(),
            location: sample.location.to_string(),
            description: sample.description.to_string(),
            highlights: sample.highlights.iter().map(|h| h.to_string()).collect(),
            rating: sample.rating,
            duration: sample.duration,
            price: sample.price,
            max_attendees: sample.max_attendees,
            available_slots: sample.available_slots,
            image: sample.image.to_string(),
            popular: sample.popular,
            trending: sample.trending,
            active: true,
            created_at: None,
            updated_at: None,
        })
        .collect()
}

/// Slots for `SEED_DAYS` days from `start`, roughly seven in ten of the
/// daily times kept. Spots never exceed the tour's capacity.
pub fn generate_slots<R: Rng>(rng: &mut R, tour: &Tour, start: NaiveDate) -> Vec<AvailableSlot> {
    let mut slots = Vec::new();
    for day in 0..SEED_DAYS {
        let date = start + Duration::days(day);
        for time in SLOT_TIMES {
            if !rng.gen_bool(SLOT_KEEP_PROBABILITY) {
                continue;
            }
            let spots = rng.gen_range(0..tour.max_attendees.max(1)) + MIN_SEED_SPOTS;
            slots.push(AvailableSlot {
                id: new_id(),
                tour_id: tour.id.clone(),
                date,
                time: time.to_string(),
                available_spots: spots.min(tour.max_attendees),
                max_spots: tour.max_attendees,
                price: Some(tour.price),
                created_at: None,
                updated_at: None,
            });
        }
    }
    slots
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub tours_added: usize,
    pub slots_added: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSummary {
    pub tours: usize,
    pub active_tours: usize,
    pub slots: u64,
    pub bookings: u64,
    pub users: u64,
    pub tours_by_company: BTreeMap<String, usize>,
    pub duplicate_companies: Vec<String>,
}

#[derive(Clone)]
pub struct SeedService {
    store: Arc<dyn DocumentStore>,
}

impl SeedService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn seed(&self, today: NaiveDate) -> Result<SeedReport, StoreError> {
        self.seed_with(&mut StdRng::from_entropy(), today).await
    }

    /// Each tour is written together with its slots in one batch.
    pub async fn seed_with<R: Rng>(&self, rng: &mut R, today: NaiveDate) -> Result<SeedReport, StoreError> {
        info!("Starting database seeding");
        let mut report = SeedReport::default();

        for tour in sample_tours() {
            let slots = generate_slots(rng, &tour, today);

            let mut batch = WriteBatch::new();
            batch.insert(collections::TOURS, &tour.id, to_document(&tour)?);
            for slot in &slots {
                batch.insert(collections::SLOTS, &slot.id, to_document(slot)?);
            }
            self.store.commit(batch).await?;

            info!("Added tour {} with {} slots", tour.company, slots.len());
            report.tours_added += 1;
            report.slots_added += slots.len();
        }

        info!(
            "Seeding completed: {} tours, {} slots",
            report.tours_added, report.slots_added
        );
        Ok(report)
    }

    /// Seeds only an empty tours collection. `None` when data already exists.
    pub async fn check_and_seed(&self, today: NaiveDate) -> Result<Option<SeedReport>, StoreError> {
        let tours = self.store.count(collections::TOURS).await?;
        info!("Found {} tours in database", tours);

        let report = if tours == 0 {
            info!("No tours found, seeding database");
            Some(self.seed(today).await?)
        } else {
            info!("Database already has data, no seeding needed");
            None
        };

        let slots = self.store.count(collections::SLOTS).await?;
        let bookings = self.store.count(collections::BOOKINGS).await?;
        info!("Found {} available slots and {} bookings", slots, bookings);
        Ok(report)
    }

    async fn delete_all(&self, collection: &'static str) -> Result<usize, StoreError> {
        let documents = self.store.query(&Query::collection(collection)).await?;
        let mut deleted = 0;
        for document in documents {
            if let Ok(id) = document.get_str(ID_FIELD) {
                if self.store.delete(collection, id).await? {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    /// Replaces every tour and slot with one fresh tour per company.
    pub async fn reseed_unique(&self, today: NaiveDate) -> Result<SeedReport, StoreError> {
        let tours = self.delete_all(collections::TOURS).await?;
        let slots = self.delete_all(collections::SLOTS).await?;
        warn!("Cleared {} tours and {} slots before reseeding", tours, slots);
        self.seed(today).await
    }

    pub async fn inspect(&self) -> Result<DatabaseSummary, StoreError> {
        let tours: Vec<Tour> = from_documents(self.store.query(&Query::collection(collections::TOURS)).await?)?;

        let mut tours_by_company = BTreeMap::new();
        for tour in &tours {
            *tours_by_company.entry(tour.company.clone()).or_insert(0) += 1;
        }
        let duplicate_companies = tours_by_company
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(company, _)| company.clone())
            .collect();

        Ok(DatabaseSummary {
            tours: tours.len(),
            active_tours: tours.iter().filter(|tour| tour.active).count(),
            slots: self.store.count(collections::SLOTS).await?,
            bookings: self.store.count(collections::BOOKINGS).await?,
            users: self.store.count(collections::USERS).await?,
            tours_by_company,
            duplicate_companies,
        })
    }

    pub async fn ensure_indexes(&self) -> Result<usize, StoreError> {
        let keys = BookingService::required_indexes();
        self.store.ensure_indexes(&keys).await?;
        info!("Ensured {} composite indexes", keys.len());
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_generated_slots_respect_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        for tour in sample_tours() {
            let slots = generate_slots(&mut rng, &tour, today());
            assert!(slots.len() <= SEED_DAYS as usize * SLOT_TIMES.len());
            for slot in &slots {
                assert!(slot.available_spots >= 1 && slot.available_spots <= slot.max_spots);
                assert!(slot.date >= today() && slot.date < today() + Duration::days(SEED_DAYS));
                assert!(SLOT_TIMES.contains(&slot.time.as_str()));
                assert_eq!(slot.price, Some(tour.price));
            }
        }
    }

    #[actix_rt::test]
    async fn test_check_and_seed_only_seeds_once() {
        let store = Arc::new(MemoryStore::new());
        let seeder = SeedService::new(store.clone());

        let report = seeder.check_and_seed(today()).await.unwrap().unwrap();
        assert_eq!(report.tours_added, 6);
        assert_eq!(store.documents(collections::SLOTS).len(), report.slots_added);

        assert_eq!(seeder.check_and_seed(today()).await.unwrap(), None);
        assert_eq!(store.documents(collections::TOURS).len(), 6);
    }

    #[actix_rt::test]
    async fn test_reseed_unique_clears_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let seeder = SeedService::new(store.clone());
        let mut rng = StdRng::seed_from_u64(1);
        seeder.seed_with(&mut rng, today()).await.unwrap();
        seeder.seed_with(&mut rng, today()).await.unwrap();

        let summary = seeder.inspect().await.unwrap();
        assert_eq!(summary.tours, 12);
        assert_eq!(summary.duplicate_companies.len(), 6);

        let report = seeder.reseed_unique(today()).await.unwrap();
        let summary = seeder.inspect().await.unwrap();
        assert_eq!(summary.tours, 6);
        assert!(summary.duplicate_companies.is_empty());
        assert_eq!(summary.slots, report.slots_added as u64);
    }
}
