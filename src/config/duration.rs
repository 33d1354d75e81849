use std::time::Duration;

use serde::{Deserialize, Deserializer, de::Error as _};
use serde_with::DeserializeAs;

/// Duration given either as a number of nanoseconds or as a human-readable string like `1h 30m`.
pub struct HumanDuration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Nanoseconds(u64),
    Fractional(f64),
    Text(String),
}

impl<'de> DeserializeAs<'de, Duration> for HumanDuration {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Nanoseconds(nanoseconds) => Ok(Duration::from_nanos(nanoseconds)),
            RawDuration::Fractional(nanoseconds) if nanoseconds.is_finite() && nanoseconds >= 0.0 => {
                #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let nanoseconds = nanoseconds as u64;
                Ok(Duration::from_nanos(nanoseconds))
            }
            RawDuration::Fractional(nanoseconds) => {
                Err(D::Error::custom(format!("invalid duration: {nanoseconds}")))
            }
            RawDuration::Text(text) => humantime::parse_duration(&text)
                .map_err(|error| D::Error::custom(format!("invalid duration `{text}`: {error}"))),
        }
    }
}
