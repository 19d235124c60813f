use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A decoded response body as delivered by the endpoint.
///
/// Endpoints answer requests for unknown entities with an explicit
/// "no data" marker rather than an error. That marker is a first-class
/// payload: it gets cached like any other response, so the next run
/// does not burn a network request on an entity known to be empty.
///
/// `NoData` is serialized as a JSON `null`. A literal `null` body is
/// mapped back to `NoData` on decode, which keeps cache round-trips
/// lossless.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The endpoint returned a JSON document
    Json(Value),
    /// The endpoint definitively reported that no data exists
    NoData,
}

impl Payload {
    /// Returns the JSON document if this payload carries one
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::NoData => None,
        }
    }

    /// Returns the JSON document, consuming the payload
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::NoData => None,
        }
    }

    /// Returns `true` if the endpoint reported that no data exists
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Payload::NoData)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::NoData,
            value => Payload::Json(value),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Payload::Json(value) => value.serialize(serializer),
            Payload::NoData => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Value::deserialize(deserializer)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_no_data_round_trips_as_null() {
        let serialized = serde_json::to_string(&Payload::NoData).unwrap();
        assert_eq!(serialized, "null");

        let payload: Payload = serde_json::from_str("null").unwrap();
        assert_eq!(payload, Payload::NoData);
    }

    #[test]
    fn test_json_round_trip() {
        let payload = Payload::Json(json!({"visits": [1, 2, 3]}));
        let serialized = serde_json::to_string(&payload).unwrap();
        let decoded: Payload = serde_json::from_str(&serialized).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_as_json() {
        assert_eq!(Payload::NoData.as_json(), None);
        assert_eq!(
            Payload::Json(json!(42)).as_json(),
            Some(&json!(42)),
            "JSON payloads expose their document"
        );
    }
}
