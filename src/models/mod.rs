pub mod account;
pub mod bookings;
pub mod review;
pub mod slot;
pub mod stats;
pub mod tour;
pub mod user;
