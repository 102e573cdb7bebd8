use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps provider redirect data (payment links, QR payloads) that may embed
/// signed tokens. `Debug` and `Display` never print the value, so a session
/// can be logged with `?session` safely. Serialization is transparent because
/// the host flow needs the real value to redirect the customer.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Masked(********)")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl From<String> for Masked<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Masked<String> {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_value() {
        let url: Masked<String> = "https://pay.example/checkout?token=abc".into();
        assert_eq!(format!("{:?}", url), "Masked(********)");
        assert_eq!(url.to_string(), "********");
    }

    #[test]
    fn test_serializes_real_value() {
        let url: Masked<String> = "https://pay.example/checkout?token=abc".into();
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"https://pay.example/checkout?token=abc\"");

        let back: Masked<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expose(), "https://pay.example/checkout?token=abc");
    }
}
