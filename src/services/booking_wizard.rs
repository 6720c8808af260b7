use chrono::{NaiveDate, NaiveDateTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FieldErrors;
use crate::models::bookings::{BookingStatus, NewBooking, PaymentStatus};
use crate::models::slot::AvailableSlot;
use crate::models::tour::Tour;
use crate::services::booking_state::{BookingState, StateError};
use crate::services::payment_validation::{validate_card, validate_guest, CardDetails, GuestDetails};
use crate::services::pricing_service::{PriceQuote, PricingService};
use crate::services::slot_selection::{SelectionError, SlotSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BookingStep {
    SelectTour,
    DateTime,
    GuestInfo,
    Payment,
    Confirmation,
}

impl BookingStep {
    /// 1-based position shown in the progress bar.
    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    fn previous(self) -> Option<BookingStep> {
        match self {
            BookingStep::SelectTour | BookingStep::Confirmation => None,
            BookingStep::DateTime => Some(BookingStep::SelectTour),
            BookingStep::GuestInfo => Some(BookingStep::DateTime),
            BookingStep::Payment => Some(BookingStep::GuestInfo),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WizardError {
    #[error("Finish the {expected:?} step first (currently at {actual:?})")]
    OutOfOrder {
        expected: BookingStep,
        actual: BookingStep,
    },
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("{0}")]
    Invalid(FieldErrors),
    #[error("This tour is not currently bookable")]
    TourInactive,
    #[error("Please sign in to complete your booking")]
    Unauthenticated,
    #[error("Failed to save your booking. Please try again.")]
    BookingFailed,
}

fn default_method() -> String {
    "card".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    #[serde(default = "default_method")]
    pub method: String,
    pub card: CardDetails,
    #[serde(default)]
    pub promo_code: Option<String>,
}

/// Payload of each step that takes input before payment.
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    Tour {
        tour: Tour,
        slots: Vec<AvailableSlot>,
    },
    Schedule {
        date: NaiveDate,
        time: String,
    },
    Guests(GuestDetails),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub booking_id: String,
    pub tour_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub guests: i32,
    pub payment_method: String,
    pub promo_applied: bool,
    pub quote: PriceQuote,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingDraft {
    pub tour: Option<Tour>,
    pub slots: Vec<AvailableSlot>,
    pub selection: SlotSelection,
    pub guest: Option<GuestDetails>,
    pub confirmation: Option<Confirmation>,
}

pub struct BookingWizard {
    step: BookingStep,
    draft: BookingDraft,
    preselected_company: Option<String>,
}

impl Default for BookingWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingWizard {
    pub fn new() -> Self {
        Self {
            step: BookingStep::SelectTour,
            draft: BookingDraft::default(),
            preselected_company: None,
        }
    }

    pub fn with_preselected_company(company: impl Into<String>) -> Self {
        Self {
            preselected_company: Some(company.into()),
            ..Self::new()
        }
    }

    pub fn step(&self) -> BookingStep {
        self.step
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    /// The tour matching the pre-selected company name, if any.
    pub fn preselected<'a>(&self, tours: &'a [Tour]) -> Option<&'a Tour> {
        let company = self.preselected_company.as_deref()?;
        tours
            .iter()
            .find(|tour| tour.company.eq_ignore_ascii_case(company.trim()))
    }

    fn expect(&self, expected: BookingStep) -> Result<(), WizardError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(WizardError::OutOfOrder {
                expected,
                actual: self.step,
            })
        }
    }

    pub fn apply(&mut self, input: StepInput, now: NaiveDateTime) -> Result<BookingStep, WizardError> {
        match input {
            StepInput::Tour { tour, slots } => self.select_tour(tour, slots)?,
            StepInput::Schedule { date, time } => {
                self.select_date(date, now)?;
                self.select_time(&time, now)?;
            }
            StepInput::Guests(guest) => self.submit_guest_info(guest)?,
        }
        Ok(self.step)
    }

    /// Picking a different tour throws away the schedule and guests chosen
    /// for the previous one.
    pub fn select_tour(&mut self, tour: Tour, slots: Vec<AvailableSlot>) -> Result<(), WizardError> {
        self.expect(BookingStep::SelectTour)?;
        if !tour.active {
            return Err(WizardError::TourInactive);
        }

        let changed = self.draft.tour.as_ref().map_or(true, |current| current.id != tour.id);
        if changed {
            self.draft.selection.clear();
            self.draft.guest = None;
        }
        self.draft.slots = slots.into_iter().filter(|slot| slot.tour_id == tour.id).collect();
        self.draft.tour = Some(tour);
        self.step = BookingStep::DateTime;
        Ok(())
    }

    pub fn select_date(&mut self, date: NaiveDate, now: NaiveDateTime) -> Result<(), WizardError> {
        self.expect(BookingStep::DateTime)?;
        self.draft.selection.select_date(&self.draft.slots, date, now)?;
        Ok(())
    }

    /// Completes the schedule step.
    pub fn select_time(&mut self, time: &str, now: NaiveDateTime) -> Result<(), WizardError> {
        self.expect(BookingStep::DateTime)?;
        self.draft.selection.select_time(&self.draft.slots, time, now)?;
        self.step = BookingStep::GuestInfo;
        Ok(())
    }

    pub fn submit_guest_info(&mut self, guest: GuestDetails) -> Result<(), WizardError> {
        self.expect(BookingStep::GuestInfo)?;
        let available = self
            .draft
            .selection
            .slot()
            .map_or(0, |slot| slot.available_spots);
        validate_guest(&guest, available).map_err(WizardError::Invalid)?;

        self.draft.guest = Some(guest);
        self.step = BookingStep::Payment;
        Ok(())
    }

    pub fn quote(&self, promo_code: Option<&str>) -> Option<PriceQuote> {
        let tour = self.draft.tour.as_ref()?;
        let slot = self.draft.selection.slot()?;
        let guest = self.draft.guest.as_ref()?;
        let unit_price = PricingService::unit_price(tour, Some(slot));
        Some(PricingService::quote(unit_price, guest.number_of_guests, promo_code))
    }

    /// Validates the card locally and books. Any failure leaves the wizard
    /// on the payment step so the guest can retry.
    pub async fn submit_payment(
        &mut self,
        state: &mut BookingState,
        payment: PaymentDetails,
        today: NaiveDate,
    ) -> Result<&Confirmation, WizardError> {
        self.expect(BookingStep::Payment)?;
        validate_card(&payment.card, today).map_err(WizardError::Invalid)?;

        let (Some(tour), Some(slot), Some(guest)) = (
            self.draft.tour.as_ref(),
            self.draft.selection.slot(),
            self.draft.guest.as_ref(),
        ) else {
            return Err(WizardError::OutOfOrder {
                expected: BookingStep::GuestInfo,
                actual: self.step,
            });
        };

        let promo_code = payment.promo_code.as_deref();
        let quote = PricingService::quote(
            PricingService::unit_price(tour, Some(slot)),
            guest.number_of_guests,
            promo_code,
        );
        let total = PricingService::round_to_cents(quote.total);
        let tour_name = format!("{} - {}", tour.company, tour.location);

        let booking = NewBooking {
            user_id: String::new(),
            tour_id: tour.id.clone(),
            slot_id: slot.id.clone(),
            tour_name: tour_name.clone(),
            date: slot.date,
            time: slot.time.clone(),
            guest_count: guest.number_of_guests,
            guest_info: guest.contact(),
            total_price: total,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            payment_method: payment.method.clone(),
            special_requests: guest.special_requests(),
        };
        let date = slot.date;
        let time = slot.time.clone();

        let booking_id = match state.create_booking(booking).await {
            Ok(id) => id,
            Err(StateError::Unauthenticated) => return Err(WizardError::Unauthenticated),
            Err(err) => {
                warn!("Booking failed, staying on payment: {}", err);
                return Err(WizardError::BookingFailed);
            }
        };
        info!("Booking {} confirmed for {} on {} {}", booking_id, tour_name, date, time);

        self.step = BookingStep::Confirmation;
        Ok(self.draft.confirmation.insert(Confirmation {
            booking_id,
            tour_name,
            date,
            time,
            guests: quote.guests,
            payment_method: payment.method,
            promo_applied: PricingService::is_valid_promo(promo_code),
            quote,
            total,
        }))
    }

    /// One step back. The confirmation step is final.
    pub fn back(&mut self) -> BookingStep {
        if let Some(previous) = self.step.previous() {
            self.step = previous;
        }
        self.step
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::store::{collections, to_document, DocumentStore};
    use crate::models::user::AuthUser;
    use crate::services::booking_service::BookingService;
    use crate::services::session::Session;

    fn tour() -> Tour {
        Tour {
            id: "apple".to_string(),
            company: "Apple".to_string(),
            location: "Apple Park, Cupertino".to_string(),
            description: "Explore the iconic Apple Park campus".to_string(),
            highlights: vec!["Visitor Center".to_string()],
            rating: 4.9,
            duration: 180,
            price: 89.0,
            max_attendees: 20,
            available_slots: 1,
            image: String::new(),
            popular: true,
            trending: false,
            active: true,
            created_at: None,
            updated_at: None,
        }
    }

    fn slot() -> AvailableSlot {
        AvailableSlot {
            id: "slot-1".to_string(),
            tour_id: "apple".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            time: "13:00".to_string(),
            available_spots: 5,
            max_spots: 20,
            price: Some(89.0),
            created_at: None,
            updated_at: None,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn guests(count: i32) -> GuestDetails {
        GuestDetails {
            full_name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone: "555-0100".to_string(),
            number_of_guests: count,
            special_requests: None,
        }
    }

    fn payment() -> PaymentDetails {
        PaymentDetails {
            method: "card".to_string(),
            card: CardDetails {
                card_number: "4242424242424242".to_string(),
                expiry_date: "12/28".to_string(),
                cvv: "123".to_string(),
                cardholder_name: "Jane Doe".to_string(),
            },
            promo_code: None,
        }
    }

    async fn state(store: Arc<MemoryStore>) -> BookingState {
        store
            .insert(collections::SLOTS, "slot-1", to_document(&slot()).unwrap())
            .await
            .unwrap();
        let session = Session::signed_in(AuthUser {
            uid: "user-1".to_string(),
            email: "jane@example.com".to_string(),
            display_name: Some("Jane Doe".to_string()),
            providers: vec!["password".to_string()],
        });
        BookingState::new(BookingService::new(store), session.subscribe())
    }

    fn at_payment() -> BookingWizard {
        let mut wizard = BookingWizard::new();
        wizard
            .apply(StepInput::Tour { tour: tour(), slots: vec![slot()] }, now())
            .unwrap();
        wizard
            .apply(
                StepInput::Schedule {
                    date: slot().date,
                    time: "13:00".to_string(),
                },
                now(),
            )
            .unwrap();
        wizard.apply(StepInput::Guests(guests(2)), now()).unwrap();
        wizard
    }

    #[actix_rt::test]
    async fn test_checkout_books_and_confirms() {
        let store = Arc::new(MemoryStore::new());
        let mut state = state(store.clone()).await;
        let mut wizard = at_payment();
        assert_eq!(wizard.step(), BookingStep::Payment);

        let confirmation = wizard
            .submit_payment(&mut state, payment(), now().date())
            .await
            .unwrap()
            .clone();
        assert_eq!(confirmation.total, 192.24);
        assert_eq!(wizard.step(), BookingStep::Confirmation);

        let slots = store.documents(collections::SLOTS);
        assert_eq!(slots[0].get_i32("availableSpots").unwrap(), 3);
        assert_eq!(state.bookings.data.len(), 1);
        assert_eq!(state.bookings.data[0].id, confirmation.booking_id);
    }

    #[actix_rt::test]
    async fn test_failed_booking_stays_on_payment() {
        let store = Arc::new(MemoryStore::new());
        let mut state = state(store.clone()).await;
        let mut wizard = at_payment();

        store.fail_next_batch_after(2);
        let result = wizard.submit_payment(&mut state, payment(), now().date()).await;
        assert_eq!(result.unwrap_err(), WizardError::BookingFailed);
        assert_eq!(wizard.step(), BookingStep::Payment);
        assert!(store.documents(collections::BOOKINGS).is_empty());
        assert_eq!(
            store.documents(collections::SLOTS)[0].get_i32("availableSpots").unwrap(),
            5
        );
    }

    #[actix_rt::test]
    async fn test_invalid_card_is_refused_before_booking() {
        let store = Arc::new(MemoryStore::new());
        let mut state = state(store.clone()).await;
        let mut wizard = at_payment();

        let mut bad = payment();
        bad.card.cvv = "12".to_string();
        match wizard.submit_payment(&mut state, bad, now().date()).await {
            Err(WizardError::Invalid(fields)) => assert!(fields.contains("cvv")),
            other => panic!("expected field errors, got {:?}", other),
        }
        assert!(store.documents(collections::BOOKINGS).is_empty());
    }

    #[test]
    fn test_steps_must_follow_order() {
        let mut wizard = BookingWizard::new();
        assert!(matches!(
            wizard.submit_guest_info(guests(1)),
            Err(WizardError::OutOfOrder { expected: BookingStep::GuestInfo, .. })
        ));
        assert_eq!(wizard.back(), BookingStep::SelectTour);
    }

    #[test]
    fn test_going_back_and_changing_date_clears_time() {
        let later = AvailableSlot {
            id: "slot-2".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 11, 3).unwrap(),
            ..slot()
        };
        let mut wizard = BookingWizard::new();
        wizard.select_tour(tour(), vec![slot(), later.clone()]).unwrap();
        wizard.select_date(slot().date, now()).unwrap();
        wizard.select_time("13:00", now()).unwrap();
        assert_eq!(wizard.step(), BookingStep::GuestInfo);

        assert_eq!(wizard.back(), BookingStep::DateTime);
        wizard.select_date(later.date, now()).unwrap();
        assert!(wizard.draft().selection.slot().is_none());
        assert_eq!(wizard.quote(None), None);
    }

    #[test]
    fn test_preselected_company() {
        let wizard = BookingWizard::with_preselected_company("apple");
        let tours = vec![tour()];
        assert_eq!(wizard.preselected(&tours).map(|t| t.id.as_str()), Some("apple"));
    }
}
