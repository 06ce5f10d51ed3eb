//! Identifier generation.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of the random suffix appended to generated identifiers.
const SUFFIX_LENGTH: usize = 9;

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LENGTH)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Generates a payment record id of the form `PAY-<epoch millis>-<suffix>`.
pub fn generate_payment_id() -> String {
    format!("PAY-{}-{}", Utc::now().timestamp_millis(), random_suffix())
}

/// Generates a device id of the form `DEV-<epoch millis>-<suffix>`.
pub fn generate_device_id() -> String {
    format!("DEV-{}-{}", Utc::now().timestamp_millis(), random_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_id_format() {
        let id = generate_payment_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "PAY");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), SUFFIX_LENGTH);
    }

    #[test]
    fn test_device_id_prefix() {
        assert!(generate_device_id().starts_with("DEV-"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(generate_payment_id(), generate_payment_id());
    }
}
