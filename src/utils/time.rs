use chrono::{DateTime, NaiveDateTime, Utc};

pub fn to_iso(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).to_rfc3339()
}

pub fn to_iso_opt(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(to_iso)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn renders_naive_timestamps_as_utc() {
        let value = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(to_iso(value), "2024-05-01T08:30:00+00:00");
        assert_eq!(to_iso_opt(None), None);
    }
}
