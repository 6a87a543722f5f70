//! Canonical wire form for instants: `YYYY-MM-DDTHH:MM:SSZ`.
//!
//! Every timestamp leaving the service goes through here so clients never see
//! fractional seconds or numeric offsets, whatever the store hands back.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serializer;

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format(ts))
}

pub mod option {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_some(&super::format(ts)),
            None => s.serialize_none(),
        }
    }
}
