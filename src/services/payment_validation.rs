use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FieldErrors;
use crate::models::bookings::GuestContact;

pub const MAX_GUESTS: i32 = 8;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*$",
        )
        .expect("email pattern is valid")
    })
}

fn expiry_regex() -> &'static Regex {
    static EXPIRY: OnceLock<Regex> = OnceLock::new();
    EXPIRY.get_or_init(|| Regex::new(r"^(\d{2})/(\d{2})$").expect("expiry pattern is valid"))
}

fn name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Za-z ]+$").expect("name pattern is valid"))
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email.trim())
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub card_number: String,
    /// `MM/YY`
    pub expiry_date: String,
    pub cvv: String,
    pub cardholder_name: String,
}

/// Two-digit years follow the POSIX `%y` pivot: 69-99 are 1969-1999,
/// 00-68 are 2000-2068.
fn expiry_month(value: &str) -> Result<(i32, u32), &'static str> {
    let captures = expiry_regex()
        .captures(value.trim())
        .ok_or("Expiry date must be in MM/YY format")?;
    let month: u32 = captures[1].parse().map_err(|_| "Expiry date must be in MM/YY format")?;
    let short_year: i32 = captures[2].parse().map_err(|_| "Expiry date must be in MM/YY format")?;
    if !(1..=12).contains(&month) {
        return Err("Expiry month must be between 01 and 12");
    }
    let year = if short_year >= 69 { 1900 + short_year } else { 2000 + short_year };
    Ok((year, month))
}

/// Local shape checks only; no payment gateway is involved.
pub fn validate_card(card: &CardDetails, today: NaiveDate) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    let number: String = card.card_number.chars().filter(|c| !c.is_whitespace()).collect();
    if !all_digits(&number) || !(13..=19).contains(&number.len()) {
        errors.add("cardNumber", "Card number must be 13 to 19 digits");
    }

    match expiry_month(&card.expiry_date) {
        Ok((year, month)) if (year, month) < (today.year(), today.month()) => {
            errors.add("expiryDate", "Card has expired");
        }
        Ok(_) => {}
        Err(message) => errors.add("expiryDate", message),
    }

    let cvv = card.cvv.trim();
    if !all_digits(cvv) || !(3..=4).contains(&cvv.len()) {
        errors.add("cvv", "CVV must be 3 or 4 digits");
    }

    let name = card.cardholder_name.trim();
    let name_length = name.chars().count();
    if !(2..=50).contains(&name_length) || !name_regex().is_match(name) {
        errors.add("cardholderName", "Cardholder name must be 2 to 50 letters");
    }

    errors.into_result()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuestDetails {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub number_of_guests: i32,
    #[serde(default)]
    pub special_requests: Option<String>,
}

impl GuestDetails {
    /// First word is the first name, the rest the last name.
    pub fn contact(&self) -> GuestContact {
        let name = self.full_name.trim();
        let (first_name, last_name) = match name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
            None => (name.to_string(), String::new()),
        };
        GuestContact {
            first_name,
            last_name,
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }

    pub fn special_requests(&self) -> Option<String> {
        self.special_requests
            .as_deref()
            .map(str::trim)
            .filter(|requests| !requests.is_empty())
            .map(str::to_string)
    }
}

pub fn validate_guest(guest: &GuestDetails, available_spots: i32) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if guest.full_name.trim().is_empty() {
        errors.add("fullName", "Full name is required");
    }
    if guest.email.trim().is_empty() {
        errors.add("email", "Email is required");
    } else if !is_valid_email(&guest.email) {
        errors.add("email", "Please enter a valid email address");
    }
    if guest.phone.trim().is_empty() {
        errors.add("phone", "Phone number is required");
    }

    if !(1..=MAX_GUESTS).contains(&guest.number_of_guests) {
        errors.add("numberOfGuests", format!("Choose between 1 and {} guests", MAX_GUESTS));
    } else if guest.number_of_guests > available_spots {
        errors.add(
            "numberOfGuests",
            format!("Only {} spots left for this time", available_spots.max(0)),
        );
    }

    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn valid_card() -> CardDetails {
        CardDetails {
            card_number: "4242 4242 4242 4242".to_string(),
            expiry_date: "12/28".to_string(),
            cvv: "123".to_string(),
            cardholder_name: "Jane Doe".to_string(),
        }
    }

    #[test]
    fn test_accepts_valid_card() {
        assert!(validate_card(&valid_card(), today()).is_ok());
    }

    #[test]
    fn test_each_bad_field_is_reported() {
        let cases = [
            ("cardNumber", CardDetails { card_number: "123".into(), ..valid_card() }),
            ("expiryDate", CardDetails { expiry_date: "12/99".into(), ..valid_card() }),
            ("cvv", CardDetails { cvv: "12".into(), ..valid_card() }),
            ("cardholderName", CardDetails { cardholder_name: "J3".into(), ..valid_card() }),
        ];
        for (field, card) in cases {
            let errors = validate_card(&card, today()).unwrap_err();
            assert_eq!(errors.len(), 1, "{} should be the only error", field);
            assert!(errors.contains(field));
        }
    }

    #[test]
    fn test_expiry_edges() {
        let this_month = CardDetails { expiry_date: "10/26".into(), ..valid_card() };
        assert!(validate_card(&this_month, today()).is_ok());

        let last_month = CardDetails { expiry_date: "09/26".into(), ..valid_card() };
        assert_eq!(
            validate_card(&last_month, today()).unwrap_err().get("expiryDate"),
            Some("Card has expired")
        );

        for bad in ["13/27", "00/27", "1/27", "12-27"] {
            let card = CardDetails { expiry_date: bad.into(), ..valid_card() };
            assert!(validate_card(&card, today()).unwrap_err().contains("expiryDate"));
        }
    }

    #[test]
    fn test_card_number_lengths() {
        for (number, ok) in [("4242424242424", true), ("4242424242424242424", true), ("424242424242", false), ("4242x42424242424", false)] {
            let card = CardDetails { card_number: number.into(), ..valid_card() };
            assert_eq!(validate_card(&card, today()).is_ok(), ok, "{}", number);
        }
    }

    #[test]
    fn test_guest_rules() {
        let guest = GuestDetails {
            full_name: "Ada King Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "555-0100".into(),
            number_of_guests: 3,
            special_requests: Some("  ".into()),
        };
        assert!(validate_guest(&guest, 5).is_ok());
        assert!(validate_guest(&guest, 2).unwrap_err().contains("numberOfGuests"));
        assert_eq!(guest.contact().first_name, "Ada");
        assert_eq!(guest.contact().last_name, "King Lovelace");
        assert_eq!(guest.special_requests(), None);

        let too_many = GuestDetails { number_of_guests: 9, ..guest.clone() };
        assert!(validate_guest(&too_many, 20).unwrap_err().contains("numberOfGuests"));

        let missing = GuestDetails { email: "not-an-email".into(), phone: "".into(), ..guest };
        let errors = validate_guest(&missing, 5).unwrap_err();
        assert!(errors.contains("email"));
        assert!(errors.contains("phone"));
    }
}
