pub mod booking_service;
pub mod booking_state;
pub mod booking_wizard;
pub mod identity_service;
pub mod payment_validation;
pub mod pricing_service;
pub mod seed_service;
pub mod session;
pub mod slot_selection;
