use chrono::NaiveDate;
use log::debug;
use thiserror::Error;

use crate::models::bookings::{Booking, BookingStatus, NewBooking};
use crate::models::slot::AvailableSlot;
use crate::models::tour::{Tour, TourCursor, TourFilter};
use crate::models::user::{AuthUser, PreferencesUpdate, UserProfile};
use crate::services::booking_service::{BookingError, BookingService};
use crate::services::session::SessionSubscription;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Please sign in to complete your booking")]
    Unauthenticated,
    #[error(transparent)]
    Booking(#[from] BookingError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loadable<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Loadable<T> {
    fn start(&mut self) {
        self.loading = true;
        self.error = None;
    }

    fn settle(&mut self, result: Result<T, BookingError>) -> Result<&T, StateError> {
        self.loading = false;
        match result {
            Ok(data) => {
                self.data = data;
                Ok(&self.data)
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Err(err.into())
            }
        }
    }
}

/// Per-request view over the data-access layer: who is signed in (read
/// through the session), what has been loaded, and what failed.
pub struct BookingState {
    service: BookingService,
    session: SessionSubscription,
    user: Option<AuthUser>,
    pub tours: Loadable<Vec<Tour>>,
    pub next_page: Option<TourCursor>,
    pub slots: Loadable<Vec<AvailableSlot>>,
    pub bookings: Loadable<Vec<Booking>>,
    pub profile: Loadable<Option<UserProfile>>,
}

impl BookingState {
    pub fn new(service: BookingService, session: SessionSubscription) -> Self {
        let user = session.current();
        Self {
            service,
            session,
            user,
            tours: Loadable::default(),
            next_page: None,
            slots: Loadable::default(),
            bookings: Loadable::default(),
            profile: Loadable::default(),
        }
    }

    /// The current user; user-scoped caches are dropped when it changes.
    pub fn user(&mut self) -> Option<&AuthUser> {
        if let Some(user) = self.session.take_change() {
            let same = user.as_ref().map(|u| &u.uid) == self.user.as_ref().map(|u| &u.uid);
            if !same {
                debug!("Session user changed, clearing user data");
                self.bookings = Loadable::default();
                self.profile = Loadable::default();
            }
            self.user = user;
        }
        self.user.as_ref()
    }

    fn require_user(&mut self) -> Result<AuthUser, StateError> {
        self.user().cloned().ok_or(StateError::Unauthenticated)
    }

    pub async fn fetch_tours(&mut self, filter: &TourFilter) -> Result<&[Tour], StateError> {
        self.tours.start();
        let result = self.service.list_tours(filter).await;
        self.next_page = None;
        self.tours.settle(result).map(Vec::as_slice)
    }

    /// Appends the next page of active tours; the first call starts over.
    pub async fn load_more_tours(&mut self, page_size: usize) -> Result<bool, StateError> {
        let after = self.next_page.take();
        let fresh = after.is_none();
        self.tours.start();

        let result = self.service.list_tours_page(page_size, after).await;
        let result = result.map(|(page, next)| {
            self.next_page = next;
            let mut tours = if fresh { Vec::new() } else { std::mem::take(&mut self.tours.data) };
            tours.extend(page);
            tours
        });
        self.tours.settle(result)?;
        Ok(self.next_page.is_some())
    }

    pub async fn search_tours(&mut self, term: &str) -> Result<&[Tour], StateError> {
        self.tours.start();
        let result = self.service.search_tours(term).await;
        self.next_page = None;
        self.tours.settle(result).map(Vec::as_slice)
    }

    pub async fn fetch_available_slots(&mut self, tour_id: &str, start: NaiveDate, end: NaiveDate) -> &[AvailableSlot] {
        self.slots.start();
        let slots = self.service.list_available_slots(tour_id, start, end).await;
        self.slots.loading = false;
        self.slots.data = slots;
        &self.slots.data
    }

    pub async fn fetch_user_bookings(&mut self, status: Option<BookingStatus>) -> Result<&[Booking], StateError> {
        let user = self.require_user()?;
        self.bookings.start();
        let bookings = self.service.list_user_bookings(&user.uid, status).await;
        self.bookings.settle(Ok(bookings)).map(Vec::as_slice)
    }

    pub async fn fetch_user_profile(&mut self) -> Result<Option<&UserProfile>, StateError> {
        let user = self.require_user()?;
        self.profile.start();
        let result = self.service.ensure_user_profile(&user).await.map(Some);
        self.profile.settle(result).map(Option::as_ref)
    }

    pub async fn update_user_preferences(&mut self, update: &PreferencesUpdate) -> Result<Option<&UserProfile>, StateError> {
        let user = self.require_user()?;
        self.service.ensure_user_profile(&user).await?;
        if let Err(err) = self.service.update_user_preferences(&user.uid, update).await {
            self.profile.error = Some(err.to_string());
            return Err(err.into());
        }
        self.fetch_user_profile().await
    }

    /// Books for the signed-in user, then refreshes their booking list.
    pub async fn create_booking(&mut self, booking: NewBooking) -> Result<String, StateError> {
        let user = self.require_user()?;
        let booking = NewBooking {
            user_id: user.uid.clone(),
            ..booking
        };

        let id = self.service.create_booking(&booking).await?;
        self.fetch_user_bookings(None).await?;
        Ok(id)
    }

    pub async fn update_booking_status(&mut self, id: &str, status: BookingStatus) -> Result<(), StateError> {
        self.require_user()?;
        self.service.update_booking_status(id, status).await?;
        self.fetch_user_bookings(None).await?;
        Ok(())
    }
}
