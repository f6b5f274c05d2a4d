use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Parse a backend timestamp.
///
/// The backend is not consistent about the format: messages pushed over the
/// socket carry RFC 3339 strings, REST payloads often carry a zone-less
/// `LocalDateTime` (read as UTC), and some older endpoints send epoch millis
/// as a string.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    raw.parse::<i64>().ok().and_then(from_millis)
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// HH:MM in local time, used by the terminal client.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let local_dt: DateTime<Local> = ts.with_timezone(&Local);
    local_dt.format("%H:%M").to_string()
}

/// Serde adapter for timestamps in any of the formats accepted by [`parse_timestamp`].
pub mod flexible {
    use super::{from_millis, parse_timestamp};
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Millis(ms) => from_millis(ms)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", ms))),
            Raw::Text(s) => parse_timestamp(&s)
                .ok_or_else(|| de::Error::custom(format!("unrecognised timestamp: {}", s))),
        }
    }

    /// Same as the parent module, for nullable fields.
    pub mod option {
        use super::Raw;
        use chrono::{DateTime, SecondsFormat, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => s.serialize_some(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => s.serialize_none(),
            }
        }

        // Unparseable values become None: a broken "last message time" should not
        // make the whole conversation list fail to load.
        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
            Ok(match Option::<Raw>::deserialize(d)? {
                Some(Raw::Millis(ms)) => super::from_millis(ms),
                Some(Raw::Text(s)) => super::parse_timestamp(&s),
                None => None,
            })
        }
    }
}
