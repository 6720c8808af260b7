use serde::Serialize;

use crate::models::{slot::AvailableSlot, tour::Tour};

pub const PROMO_CODE: &str = "WELCOME10";
pub const PROMO_DISCOUNT_RATE: f64 = 0.10;
pub const TAX_RATE: f64 = 0.08;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub unit_price: f64,
    pub guests: i32,
    pub subtotal: f64,
    pub discount: f64,
    pub taxes: f64,
    pub total: f64,
}

pub struct PricingService;

impl PricingService {
    /// Slot price when the slot overrides it, otherwise the tour's base price
    pub fn unit_price(tour: &Tour, slot: Option<&AvailableSlot>) -> f64 {
        slot.and_then(|slot| slot.price).unwrap_or(tour.price)
    }

    /// Promo codes compare case-insensitively, ignoring surrounding whitespace
    pub fn is_valid_promo(code: Option<&str>) -> bool {
        code.map_or(false, |code| code.trim().eq_ignore_ascii_case(PROMO_CODE))
    }

    /// Discount is taken off the subtotal before tax is applied
    pub fn quote(unit_price: f64, guests: i32, promo_code: Option<&str>) -> PriceQuote {
        let subtotal = unit_price * f64::from(guests);
        let discount = if Self::is_valid_promo(promo_code) {
            subtotal * PROMO_DISCOUNT_RATE
        } else {
            0.0
        };
        let discounted = subtotal - discount;

        PriceQuote {
            unit_price,
            guests,
            subtotal,
            discount,
            taxes: discounted * TAX_RATE,
            total: discounted * (1.0 + TAX_RATE),
        }
    }

    pub fn round_to_cents(amount: f64) -> f64 {
        (amount * 100.0).round() / 100.0
    }
}
