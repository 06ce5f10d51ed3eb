//! Common validation utilities.

use validator::ValidationError;

/// Number of digits in an IMEI (14 body digits plus a Luhn check digit).
const IMEI_LENGTH: usize = 15;

/// Number of digits in an Aadhaar national ID.
const NATIONAL_ID_LENGTH: usize = 12;

/// Validates that a latitude value is within valid range (-90 to 90).
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        let mut err = ValidationError::new("latitude_range");
        err.message = Some("Latitude must be between -90 and 90".into());
        Err(err)
    }
}

/// Validates that a longitude value is within valid range (-180 to 180).
pub fn validate_longitude(lon: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        let mut err = ValidationError::new("longitude_range");
        err.message = Some("Longitude must be between -180 and 180".into());
        Err(err)
    }
}

/// Validates that battery level is within valid range (0 to 100).
pub fn validate_battery_level(level: i32) -> Result<(), ValidationError> {
    if (0..=100).contains(&level) {
        Ok(())
    } else {
        let mut err = ValidationError::new("battery_range");
        err.message = Some("Battery level must be between 0 and 100".into());
        Err(err)
    }
}

/// Validates that a monetary amount is strictly positive and finite.
pub fn validate_amount(amount: f64) -> Result<(), ValidationError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("amount_range");
        err.message = Some("Amount must be greater than zero".into());
        Err(err)
    }
}

/// Computes the Luhn check digit for a string of ASCII digits.
///
/// Returns `None` if the input contains anything other than digits.
pub fn luhn_check_digit(body: &str) -> Option<u8> {
    let mut sum = 0u32;
    for (i, c) in body.chars().rev().enumerate() {
        let mut d = c.to_digit(10)?;
        if i % 2 == 0 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    Some(((10 - (sum % 10)) % 10) as u8)
}

/// Validates a 15-digit IMEI including its Luhn check digit.
pub fn validate_imei(imei: &str) -> Result<(), ValidationError> {
    let well_formed = imei.len() == IMEI_LENGTH && imei.chars().all(|c| c.is_ascii_digit());

    let valid = well_formed && {
        let (body, check) = imei.split_at(IMEI_LENGTH - 1);
        luhn_check_digit(body)
            .map(|expected| check.parse::<u8>().ok() == Some(expected))
            .unwrap_or(false)
    };

    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_imei");
        err.message = Some("IMEI must be 15 digits with a valid check digit".into());
        Err(err)
    }
}

/// Validates a mobile number: 10 digits, optionally prefixed with `+91`.
pub fn validate_mobile_no(mobile: &str) -> Result<(), ValidationError> {
    let digits = mobile.strip_prefix("+91").unwrap_or(mobile);
    if digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_mobile_no");
        err.message = Some("Mobile number must contain 10 digits".into());
        Err(err)
    }
}

/// Validates a 12-digit national ID. Spaces between digit groups are allowed.
pub fn validate_national_id(id: &str) -> Result<(), ValidationError> {
    let digits: String = id.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() == NATIONAL_ID_LENGTH && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_national_id");
        err.message = Some("National ID must contain 12 digits".into());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_latitude() {
        assert!(validate_latitude(0.0).is_ok());
        assert!(validate_latitude(90.0).is_ok());
        assert!(validate_latitude(-90.0).is_ok());
        assert!(validate_latitude(90.1).is_err());
        assert!(validate_latitude(-90.1).is_err());
    }

    #[test]
    fn test_validate_latitude_error_message() {
        let err = validate_latitude(100.0).unwrap_err();
        assert_eq!(
            err.message.unwrap().to_string(),
            "Latitude must be between -90 and 90"
        );
    }

    #[test]
    fn test_validate_longitude() {
        assert!(validate_longitude(0.0).is_ok());
        assert!(validate_longitude(180.0).is_ok());
        assert!(validate_longitude(-180.0).is_ok());
        assert!(validate_longitude(180.1).is_err());
        assert!(validate_longitude(-180.1).is_err());
    }

    #[test]
    fn test_validate_battery_level() {
        assert!(validate_battery_level(0).is_ok());
        assert!(validate_battery_level(100).is_ok());
        assert!(validate_battery_level(-1).is_err());
        assert!(validate_battery_level(101).is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(2500.0).is_ok());
        assert!(validate_amount(0.0).is_err());
        assert!(validate_amount(-1.0).is_err());
        assert!(validate_amount(f64::NAN).is_err());
    }

    #[test]
    fn test_luhn_check_digit() {
        assert_eq!(luhn_check_digit("49015420323751"), Some(8));
        assert_eq!(luhn_check_digit("35693803564380"), Some(9));
        assert_eq!(luhn_check_digit("12a4"), None);
    }

    #[test]
    fn test_validate_imei() {
        assert!(validate_imei("490154203237518").is_ok());
        assert!(validate_imei("356938035643809").is_ok());
        // wrong check digit
        assert!(validate_imei("490154203237517").is_err());
        // too short
        assert!(validate_imei("49015420323751").is_err());
        assert!(validate_imei("49015420323751x").is_err());
        assert!(validate_imei("").is_err());
    }

    #[test]
    fn test_validate_imei_error_message() {
        let err = validate_imei("123").unwrap_err();
        assert_eq!(
            err.message.unwrap().to_string(),
            "IMEI must be 15 digits with a valid check digit"
        );
    }

    #[test]
    fn test_validate_mobile_no() {
        assert!(validate_mobile_no("9876543210").is_ok());
        assert!(validate_mobile_no("+919876543210").is_ok());
        assert!(validate_mobile_no("98765").is_err());
        assert!(validate_mobile_no("98765432ab").is_err());
    }

    #[test]
    fn test_validate_national_id() {
        assert!(validate_national_id("123456789012").is_ok());
        assert!(validate_national_id("1234 5678 9012").is_ok());
        assert!(validate_national_id("12345678901").is_err());
        assert!(validate_national_id("12345678901a").is_err());
    }
}
