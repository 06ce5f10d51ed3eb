//! Fixtures shared by domain unit tests.

use chrono::{NaiveDate, Utc};

use crate::models::{CreateDeviceRequest, Device, NewDevice};

pub fn sample_device(id: &str) -> Device {
    let request: CreateDeviceRequest = serde_json::from_value(serde_json::json!({
        "id": id,
        "customerName": "Ravi Kumar",
        "mobileNo": "9876543210",
        "aadharNo": "123456789012",
        "address": "12 MG Road, Bengaluru",
        "imei1": "490154203237518",
        "deviceModel": "Redmi Note 13",
        "emiDetails": {
            "financeName": "Acme Finance",
            "totalAmount": 24000.0,
            "emiAmount": 2000.0,
            "tenure": 12,
            "nextDueDate": NaiveDate::from_ymd_opt(2026, 11, 5).unwrap()
        }
    }))
    .unwrap();

    NewDevice::from_request(request).into_device(Utc::now())
}
