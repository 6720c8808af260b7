use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, Bson, Document};
use chrono::{NaiveDate, NaiveTime};
use log::{error, info};
use thiserror::Error;

use crate::db::fallback::{OnFailure, ReadPlan};
use crate::db::store::{
    collections, from_document, from_documents, new_id, to_document, Direction, DocumentStore,
    IndexKey, Query, StoreError, WriteBatch, CREATED_AT,
};
use crate::models::bookings::{Booking, BookingStatus, NewBooking};
use crate::models::review::Review;
use crate::models::slot::AvailableSlot;
use crate::models::stats::{BookingStats, SlotStats};
use crate::models::tour::{Tour, TourCursor, TourFilter};
use crate::models::user::{AuthUser, PreferencesUpdate, ProfileInput, UserProfile};
use crate::services::pricing_service::PricingService;

pub const DEFAULT_PAGE_SIZE: usize = 10;
const POPULAR_TOUR_COUNT: usize = 5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookingError {
    #[error("Failed to fetch tours")]
    FetchTours,
    #[error("Failed to fetch tour")]
    FetchTour,
    #[error("Failed to create booking")]
    CreateBooking,
    #[error("Failed to fetch booking")]
    FetchBooking,
    #[error("Failed to update booking status")]
    UpdateBookingStatus,
    #[error("Failed to create user profile")]
    CreateProfile,
    #[error("Failed to fetch user profile")]
    FetchProfile,
    #[error("Failed to update preferences")]
    UpdatePreferences,
    #[error("Failed to search tours")]
    SearchTours,
    #[error("Failed to fetch stats")]
    FetchStats,
    #[error("Failed to fetch available slots")]
    FetchSlots,
}

fn logged(kind: BookingError) -> impl FnOnce(StoreError) -> BookingError {
    move |err| {
        error!("{}: {}", kind, err);
        kind
    }
}

// Tours

fn tours_ideal(filter: &TourFilter) -> Query {
    let mut query = Query::collection(collections::TOURS);
    if let Some(active) = filter.active {
        query = query.where_eq("active", active);
    }
    if let Some(company) = &filter.company {
        query = query.where_eq("company", company.as_str());
    }
    if let Some(popular) = filter.popular {
        query = query.where_eq("popular", popular);
    }
    if let Some(max_price) = filter.max_price {
        query = query.where_lte("price", max_price);
    }
    query
        .order_by("popular", Direction::Desc)
        .order_by("rating", Direction::Desc)
}

fn tours_active_only(filter: &TourFilter) -> Query {
    let query = Query::collection(collections::TOURS);
    match filter.active {
        Some(active) => query.where_eq("active", active),
        None => query,
    }
}

const LIST_TOURS: ReadPlan<TourFilter> = ReadPlan {
    name: "list tours",
    strategies: &[tours_ideal, tours_active_only],
    on_failure: OnFailure::Propagate,
};

struct PageParams {
    page_size: usize,
    after: Option<TourCursor>,
}

fn page_ideal(params: &PageParams) -> Query {
    let query = Query::collection(collections::TOURS)
        .where_eq("active", true)
        .order_by("rating", Direction::Desc)
        .order_by("_id", Direction::Asc)
        .limit(params.page_size + 1);
    match &params.after {
        Some(cursor) => query.start_after(vec![
            Bson::Double(cursor.rating),
            Bson::String(cursor.id.clone()),
        ]),
        None => query,
    }
}

fn page_active_only(_: &PageParams) -> Query {
    Query::collection(collections::TOURS).where_eq("active", true)
}

const TOURS_PAGE: ReadPlan<PageParams> = ReadPlan {
    name: "list tours page",
    strategies: &[page_ideal, page_active_only],
    on_failure: OnFailure::Propagate,
};

fn search_ideal(_: &()) -> Query {
    Query::collection(collections::TOURS)
        .where_eq("active", true)
        .order_by("company", Direction::Asc)
        .order_by("rating", Direction::Desc)
}

fn search_active_only(_: &()) -> Query {
    Query::collection(collections::TOURS).where_eq("active", true)
}

const SEARCH_TOURS: ReadPlan<()> = ReadPlan {
    name: "search tours",
    strategies: &[search_ideal, search_active_only],
    on_failure: OnFailure::Propagate,
};

// Slots

struct SlotParams {
    tour_id: Option<String>,
    start: NaiveDate,
    end: NaiveDate,
}

fn with_tour(query: Query, params: &SlotParams) -> Query {
    match &params.tour_id {
        Some(tour_id) => query.where_eq("tourId", tour_id.as_str()),
        None => query,
    }
}

fn slots_ideal(params: &SlotParams) -> Query {
    with_tour(Query::collection(collections::SLOTS), params)
        .where_gt("availableSpots", 0)
        .where_gte("date", params.start.to_string())
        .where_lte("date", params.end.to_string())
        .order_by("date", Direction::Asc)
        .order_by("time", Direction::Asc)
}

fn slots_open(params: &SlotParams) -> Query {
    with_tour(Query::collection(collections::SLOTS), params).where_gt("availableSpots", 0)
}

fn slots_for_tour(params: &SlotParams) -> Query {
    with_tour(Query::collection(collections::SLOTS), params)
}

const AVAILABLE_SLOTS: ReadPlan<SlotParams> = ReadPlan {
    name: "list available slots",
    strategies: &[slots_ideal, slots_open, slots_for_tour],
    on_failure: OnFailure::Propagate,
};

fn slots_in_range(params: &SlotParams) -> Query {
    with_tour(Query::collection(collections::SLOTS), params)
        .where_gte("date", params.start.to_string())
        .where_lte("date", params.end.to_string())
}

const SLOTS_IN_RANGE: ReadPlan<SlotParams> = ReadPlan {
    name: "slot stats",
    strategies: &[slots_in_range, slots_for_tour],
    on_failure: OnFailure::Propagate,
};

// Bookings

struct UserBookingsParams {
    user_id: String,
    status: Option<BookingStatus>,
}

fn user_bookings_filtered(params: &UserBookingsParams) -> Query {
    let query = Query::collection(collections::BOOKINGS).where_eq("userId", params.user_id.as_str());
    match params.status {
        Some(status) => query.where_eq("status", status.as_str()),
        None => query,
    }
}

fn user_bookings_ideal(params: &UserBookingsParams) -> Query {
    user_bookings_filtered(params).order_by(CREATED_AT, Direction::Desc)
}

const USER_BOOKINGS: ReadPlan<UserBookingsParams> = ReadPlan {
    name: "list user bookings",
    strategies: &[user_bookings_ideal, user_bookings_filtered],
    on_failure: OnFailure::ReturnEmpty,
};

struct StatsParams {
    from_ms: i64,
    until_ms: i64,
}

impl StatsParams {
    /// Whole days, `start` through `end` inclusive, in UTC.
    fn days(start: NaiveDate, end: NaiveDate) -> Self {
        let from = start.and_time(NaiveTime::MIN).and_utc();
        let until = end
            .succ_opt()
            .unwrap_or(end)
            .and_time(NaiveTime::MIN)
            .and_utc();
        Self {
            from_ms: from.timestamp_millis(),
            until_ms: until.timestamp_millis(),
        }
    }
}

fn confirmed_in_range(params: &StatsParams) -> Query {
    Query::collection(collections::BOOKINGS)
        .where_eq("status", BookingStatus::Confirmed.as_str())
        .where_gte(CREATED_AT, params.from_ms)
        .where_lt(CREATED_AT, params.until_ms)
}

fn confirmed(_: &StatsParams) -> Query {
    Query::collection(collections::BOOKINGS).where_eq("status", BookingStatus::Confirmed.as_str())
}

const CONFIRMED_BOOKINGS: ReadPlan<StatsParams> = ReadPlan {
    name: "booking stats",
    strategies: &[confirmed_in_range, confirmed],
    on_failure: OnFailure::Propagate,
};

fn reviews_in_range(params: &StatsParams) -> Query {
    Query::collection(collections::REVIEWS)
        .where_gte(CREATED_AT, params.from_ms)
        .where_lt(CREATED_AT, params.until_ms)
}

fn all_reviews(_: &StatsParams) -> Query {
    Query::collection(collections::REVIEWS)
}

const REVIEWS_IN_RANGE: ReadPlan<StatsParams> = ReadPlan {
    name: "review stats",
    strategies: &[reviews_in_range, all_reviews],
    on_failure: OnFailure::Propagate,
};

fn profile_defaults(email: &str, first_name: &str, last_name: &str, phone: &str) -> Document {
    doc! {
        "email": email,
        "firstName": first_name,
        "lastName": last_name,
        "phone": phone,
        "preferences": { "favoriteCompanies": [], "preferredDates": [] },
        "bookingHistory": [],
    }
}

/// Domain reads and writes over the document store. Multi-constraint reads
/// go through a `ReadPlan` so a composite index that is still building
/// degrades the query instead of failing it.
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn DocumentStore>,
}

impl BookingService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Tours matching every filter, popular first, then by rating.
    pub async fn list_tours(&self, filter: &TourFilter) -> Result<Vec<Tour>, BookingError> {
        info!("Fetching tours with filter {:?}", filter);
        let documents = LIST_TOURS
            .run(self.store.as_ref(), filter)
            .await
            .map_err(logged(BookingError::FetchTours))?;
        from_documents(documents).map_err(logged(BookingError::FetchTours))
    }

    /// One tour per company, the earliest created winning, in `list_tours` order.
    pub async fn list_unique_tours_by_company(&self, filter: &TourFilter) -> Result<Vec<Tour>, BookingError> {
        let tours = self.list_tours(filter).await?;

        let mut earliest: HashMap<&str, &Tour> = HashMap::new();
        for tour in &tours {
            earliest
                .entry(tour.company.as_str())
                .and_modify(|current| {
                    if (tour.created_at, &tour.id) < (current.created_at, &current.id) {
                        *current = tour;
                    }
                })
                .or_insert(tour);
        }

        Ok(tours
            .iter()
            .filter(|tour| {
                earliest
                    .get(tour.company.as_str())
                    .map_or(false, |chosen| chosen.id == tour.id)
            })
            .cloned()
            .collect())
    }

    pub async fn get_tour(&self, id: &str) -> Result<Option<Tour>, BookingError> {
        let document = self
            .store
            .get(collections::TOURS, id)
            .await
            .map_err(logged(BookingError::FetchTour))?;
        document
            .map(from_document)
            .transpose()
            .map_err(logged(BookingError::FetchTour))
    }

    /// Active tours by rating desc then id, `page_size` at a time.
    pub async fn list_tours_page(
        &self,
        page_size: usize,
        after: Option<TourCursor>,
    ) -> Result<(Vec<Tour>, Option<TourCursor>), BookingError> {
        let params = PageParams {
            page_size: page_size.max(1),
            after,
        };
        let documents = TOURS_PAGE
            .run(self.store.as_ref(), &params)
            .await
            .map_err(logged(BookingError::FetchTours))?;
        let mut tours: Vec<Tour> = from_documents(documents).map_err(logged(BookingError::FetchTours))?;

        let next = if tours.len() > params.page_size {
            tours.truncate(params.page_size);
            tours.last().map(TourCursor::after)
        } else {
            None
        };
        Ok((tours, next))
    }

    /// Open slots of a tour between `start` and `end` inclusive, by date then
    /// time. Never fails: a store outage reads as "no slots".
    /// Never fails: a backend error reads as no availability.
    pub async fn list_available_slots(&self, tour_id: &str, start: NaiveDate, end: NaiveDate) -> Vec<AvailableSlot> {
        self.fetch_available_slots(tour_id, start, end)
            .await
            .unwrap_or_default()
    }

    /// Like `list_available_slots`, but reports a backend failure so callers
    /// can offer a retry instead of showing an empty calendar.
    pub async fn fetch_available_slots(
        &self,
        tour_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AvailableSlot>, BookingError> {
        let params = SlotParams {
            tour_id: Some(tour_id.to_string()),
            start,
            end,
        };
        let documents = AVAILABLE_SLOTS
            .run(self.store.as_ref(), &params)
            .await
            .map_err(logged(BookingError::FetchSlots))?;
        from_documents(documents).map_err(logged(BookingError::FetchSlots))
    }

    pub async fn get_slot(&self, id: &str) -> Result<Option<AvailableSlot>, BookingError> {
        let document = self
            .store
            .get(collections::SLOTS, id)
            .await
            .map_err(logged(BookingError::FetchTour))?;
        document
            .map(from_document)
            .transpose()
            .map_err(logged(BookingError::FetchTour))
    }

    /// Writes the booking, takes its guests off the slot and records it in
    /// the user's history as one atomic batch. A slot without enough spots
    /// left fails the whole batch.
    pub async fn create_booking(&self, booking: &NewBooking) -> Result<String, BookingError> {
        if booking.guest_count <= 0 {
            error!("Refusing booking with {} guests", booking.guest_count);
            return Err(BookingError::CreateBooking);
        }

        let id = new_id();
        let mut booking = booking.clone();
        booking.total_price = PricingService::round_to_cents(booking.total_price);
        let document = to_document(&booking).map_err(logged(BookingError::CreateBooking))?;
        let guest = &booking.guest_info;

        let mut batch = WriteBatch::new();
        batch
            .insert(collections::BOOKINGS, &id, document)
            .decrement(
                collections::SLOTS,
                &booking.slot_id,
                "availableSpots",
                i64::from(booking.guest_count),
            )
            .append(
                collections::USERS,
                &booking.user_id,
                "bookingHistory",
                id.as_str(),
                profile_defaults(&guest.email, &guest.first_name, &guest.last_name, &guest.phone),
            );

        self.store
            .commit(batch)
            .await
            .map_err(logged(BookingError::CreateBooking))?;
        info!(
            "Created booking {} for user {} on slot {}",
            id, booking.user_id, booking.slot_id
        );
        Ok(id)
    }

    pub async fn get_booking(&self, id: &str) -> Result<Option<Booking>, BookingError> {
        let document = self
            .store
            .get(collections::BOOKINGS, id)
            .await
            .map_err(logged(BookingError::FetchBooking))?;
        document
            .map(from_document)
            .transpose()
            .map_err(logged(BookingError::FetchBooking))
    }

    /// Newest first. Never fails: a store outage reads as "no bookings".
    pub async fn list_user_bookings(&self, user_id: &str, status: Option<BookingStatus>) -> Vec<Booking> {
        let params = UserBookingsParams {
            user_id: user_id.to_string(),
            status,
        };
        let documents = USER_BOOKINGS
            .run(self.store.as_ref(), &params)
            .await
            .unwrap_or_default();
        from_documents(documents).unwrap_or_else(|err| {
            error!("Failed to decode bookings for user {}: {}", user_id, err);
            Vec::new()
        })
    }

    pub async fn update_booking_status(&self, id: &str, status: BookingStatus) -> Result<(), BookingError> {
        self.store
            .update(collections::BOOKINGS, id, doc! { "status": status.as_str() })
            .await
            .map_err(logged(BookingError::UpdateBookingStatus))?;
        info!("Booking {} is now {}", id, status.as_str());
        Ok(())
    }

    pub async fn create_user_profile(&self, user_id: &str, input: &ProfileInput) -> Result<(), BookingError> {
        let mut document = profile_defaults(&input.email, &input.first_name, &input.last_name, &input.phone);
        let preferences = to_document(&input.preferences).map_err(logged(BookingError::CreateProfile))?;
        document.insert("preferences", preferences);

        self.store
            .insert(collections::USERS, user_id, document)
            .await
            .map_err(logged(BookingError::CreateProfile))
    }

    /// The user's profile, created from their account details on first use.
    pub async fn ensure_user_profile(&self, user: &AuthUser) -> Result<UserProfile, BookingError> {
        if let Some(profile) = self.get_user_profile(&user.uid).await? {
            return Ok(profile);
        }

        let (first_name, last_name) = user.name_parts();
        let input = ProfileInput {
            email: user.email.clone(),
            first_name,
            last_name,
            ..ProfileInput::default()
        };
        self.create_user_profile(&user.uid, &input).await?;
        self.get_user_profile(&user.uid)
            .await?
            .ok_or(BookingError::FetchProfile)
    }

    pub async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, BookingError> {
        let document = self
            .store
            .get(collections::USERS, user_id)
            .await
            .map_err(logged(BookingError::FetchProfile))?;
        document
            .map(from_document)
            .transpose()
            .map_err(logged(BookingError::FetchProfile))
    }

    /// Merges the given preference fields, leaving the others untouched.
    pub async fn update_user_preferences(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> Result<(), BookingError> {
        let mut fields = Document::new();
        if let Some(companies) = &update.favorite_companies {
            fields.insert("preferences.favoriteCompanies", companies.clone());
        }
        if let Some(dates) = &update.preferred_dates {
            fields.insert("preferences.preferredDates", dates.clone());
        }
        if let Some(max_price) = update.max_price {
            fields.insert("preferences.maxPrice", max_price);
        }

        self.store
            .update(collections::USERS, user_id, fields)
            .await
            .map_err(logged(BookingError::UpdatePreferences))
    }

    /// Naive case-insensitive substring search over active tours.
    pub async fn search_tours(&self, term: &str) -> Result<Vec<Tour>, BookingError> {
        let documents = SEARCH_TOURS
            .run(self.store.as_ref(), &())
            .await
            .map_err(logged(BookingError::SearchTours))?;
        let tours: Vec<Tour> = from_documents(documents).map_err(logged(BookingError::SearchTours))?;
        Ok(tours.into_iter().filter(|tour| tour.mentions(term)).collect())
    }

    pub async fn booking_stats(&self, start: NaiveDate, end: NaiveDate) -> Result<BookingStats, BookingError> {
        let params = StatsParams::days(start, end);
        let documents = CONFIRMED_BOOKINGS
            .run(self.store.as_ref(), &params)
            .await
            .map_err(logged(BookingError::FetchStats))?;
        let bookings: Vec<Booking> = from_documents(documents).map_err(logged(BookingError::FetchStats))?;

        let review_documents = REVIEWS_IN_RANGE
            .run(self.store.as_ref(), &params)
            .await
            .map_err(logged(BookingError::FetchStats))?;
        let reviews: Vec<Review> = from_documents(review_documents).map_err(logged(BookingError::FetchStats))?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for booking in &bookings {
            *counts.entry(booking.tour_name.as_str()).or_insert(0) += 1;
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let average_rating = if reviews.is_empty() {
            None
        } else {
            let sum: f64 = reviews.iter().map(|review| review.rating).sum();
            Some(sum / reviews.len() as f64)
        };

        Ok(BookingStats {
            total_bookings: bookings.len(),
            total_revenue: PricingService::round_to_cents(bookings.iter().map(|b| b.total_price).sum()),
            average_rating,
            popular_tours: ranked
                .into_iter()
                .take(POPULAR_TOUR_COUNT)
                .map(|(name, _)| name.to_string())
                .collect(),
        })
    }

    pub async fn slot_stats(
        &self,
        tour_id: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SlotStats, BookingError> {
        let params = SlotParams {
            tour_id: tour_id.map(str::to_string),
            start,
            end,
        };
        let documents = SLOTS_IN_RANGE
            .run(self.store.as_ref(), &params)
            .await
            .map_err(logged(BookingError::FetchStats))?;
        let slots: Vec<AvailableSlot> = from_documents(documents).map_err(logged(BookingError::FetchStats))?;

        let open_slots = slots.iter().filter(|slot| slot.available_spots > 0).count();
        let available_spots: i64 = slots.iter().map(|slot| i64::from(slot.available_spots.max(0))).sum();
        let capacity: i64 = slots.iter().map(|slot| i64::from(slot.max_spots)).sum();
        let utilization = if capacity > 0 {
            (capacity - available_spots) as f64 / capacity as f64
        } else {
            0.0
        };

        Ok(SlotStats {
            total_slots: slots.len(),
            open_slots,
            full_slots: slots.len() - open_slots,
            available_spots,
            capacity,
            utilization,
        })
    }

    /// Every composite index the read plans above can ask for.
    pub fn required_indexes() -> Vec<IndexKey> {
        let mut keys: Vec<IndexKey> = Vec::new();
        let mut collect = |found: Vec<IndexKey>| {
            for key in found {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        };

        for mask in 0..16u8 {
            let filter = TourFilter {
                active: (mask & 1 != 0).then_some(true),
                company: (mask & 2 != 0).then(|| "company".to_string()),
                popular: (mask & 4 != 0).then_some(true),
                max_price: (mask & 8 != 0).then_some(0.0),
            };
            collect(LIST_TOURS.index_keys(&filter));
        }
        collect(TOURS_PAGE.index_keys(&PageParams {
            page_size: DEFAULT_PAGE_SIZE,
            after: None,
        }));
        collect(SEARCH_TOURS.index_keys(&()));

        let today = NaiveDate::MIN;
        for tour_id in [None, Some("tour".to_string())] {
            let params = SlotParams {
                tour_id,
                start: today,
                end: today,
            };
            collect(AVAILABLE_SLOTS.index_keys(&params));
            collect(SLOTS_IN_RANGE.index_keys(&params));
        }

        for status in [None, Some(BookingStatus::Confirmed)] {
            collect(USER_BOOKINGS.index_keys(&UserBookingsParams {
                user_id: "user".to_string(),
                status,
            }));
        }
        let range = StatsParams::days(today, today);
        collect(CONFIRMED_BOOKINGS.index_keys(&range));
        collect(REVIEWS_IN_RANGE.index_keys(&range));

        keys
    }
}
