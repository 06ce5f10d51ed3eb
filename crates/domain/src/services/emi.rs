//! Installment bookkeeping.

use chrono::{DateTime, Months, NaiveDate, Utc};

use crate::models::{EmiDetails, NewPayment, PaymentRecord};

use super::device_store::StoreError;

/// Default due date for the next installment: one calendar month later,
/// clamped to the end of shorter months.
pub fn next_due_date_after(current: NaiveDate) -> NaiveDate {
    current
        .checked_add_months(Months::new(1))
        .unwrap_or(current)
}

/// Builds the immutable record for the next installment.
///
/// Fails when the loan is already settled, which keeps `paid_emis <= tenure`.
pub fn build_payment_record(
    emi: &EmiDetails,
    payment: NewPayment,
    recorded_at: DateTime<Utc>,
) -> Result<PaymentRecord, StoreError> {
    if emi.is_settled() {
        return Err(StoreError::Validation(format!(
            "All {} EMIs have already been paid",
            emi.tenure
        )));
    }

    Ok(PaymentRecord {
        id: payment.id.unwrap_or_else(shared::ids::generate_payment_id),
        emi_number: emi.paid_emis + 1,
        amount: payment.amount,
        paid_date: payment.paid_date,
        transaction_id: payment.transaction_id,
        payment_method: payment.payment_method,
        recorded_by: payment.recorded_by,
        recorded_at,
        notes: payment.notes,
    })
}

impl EmiDetails {
    /// Appends a payment, bumps the paid count and moves the due date.
    ///
    /// Returns the stored record.
    pub fn record_payment(
        &mut self,
        payment: NewPayment,
        next_due_date: Option<NaiveDate>,
        recorded_at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError> {
        let record = build_payment_record(self, payment, recorded_at)?;
        self.paid_emis += 1;
        self.next_due_date =
            next_due_date.unwrap_or_else(|| next_due_date_after(self.next_due_date));
        self.payment_history.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;
    use crate::services::test_support::sample_device;

    fn payment() -> NewPayment {
        NewPayment {
            id: None,
            amount: 2000.0,
            paid_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            transaction_id: "TXN-1".to_string(),
            payment_method: PaymentMethod::Upi,
            recorded_by: "admin".to_string(),
            notes: None,
        }
    }

    #[test]
    fn test_record_payment_increments_and_appends() {
        let mut emi = sample_device("D1").emi_details;
        emi.paid_emis = 3;
        let before = emi.paid_emis;

        let next = NaiveDate::from_ymd_opt(2026, 12, 5).unwrap();
        let record = emi.record_payment(payment(), Some(next), Utc::now()).unwrap();

        assert_eq!(emi.paid_emis, before + 1);
        assert_eq!(emi.payment_history.len(), 1);
        assert_eq!(record.emi_number, before + 1);
        assert_eq!(emi.payment_history[0], record);
        assert_eq!(emi.next_due_date, next);
        assert!(record.id.starts_with("PAY-"));
    }

    #[test]
    fn test_record_payment_defaults_due_date_to_next_month() {
        let mut emi = sample_device("D1").emi_details;
        emi.next_due_date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();

        emi.record_payment(payment(), None, Utc::now()).unwrap();

        assert_eq!(
            emi.next_due_date,
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()
        );
    }

    #[test]
    fn test_record_payment_rejects_settled_loan() {
        let mut emi = sample_device("D1").emi_details;
        emi.paid_emis = emi.tenure;

        let err = emi.record_payment(payment(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(emi.paid_emis, emi.tenure);
        assert!(emi.payment_history.is_empty());
    }

    #[test]
    fn test_record_payment_keeps_client_id() {
        let mut emi = sample_device("D1").emi_details;
        let mut p = payment();
        p.id = Some("PAY-client".to_string());
        let record = emi.record_payment(p, None, Utc::now()).unwrap();
        assert_eq!(record.id, "PAY-client");
    }

    #[test]
    fn test_final_payment_settles_loan() {
        let mut emi = sample_device("D1").emi_details;
        emi.tenure = 10;
        emi.paid_emis = 9;

        emi.record_payment(payment(), None, Utc::now()).unwrap();

        assert_eq!(emi.paid_emis, 10);
        assert!(emi.is_settled());
    }
}
