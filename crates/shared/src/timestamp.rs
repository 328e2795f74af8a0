//! Server timestamps arrive either as ISO-8601 strings (REST) or as
//! `{"$date": millis}` objects (stream payloads).

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Iso(DateTime<Utc>),
    Extended {
        #[serde(rename = "$date")]
        date: i64,
    },
    Millis(i64),
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawTimestamp>::deserialize(deserializer)?
        .map(|raw| match raw {
            RawTimestamp::Iso(ts) => Ok(ts),
            RawTimestamp::Extended { date } | RawTimestamp::Millis(date) => Utc
                .timestamp_millis_opt(date)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {date}"))),
        })
        .transpose()
}

pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => serializer.serialize_none(),
    }
}
