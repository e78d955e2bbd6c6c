use serde::{Deserialize, Serialize};

/// A field value as received from an upstream source. Missing or malformed
/// input becomes `Unknown` instead of being dropped, so row counts stay
/// auditable. `Unknown` serializes as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Observed<T> {
    Known(T),
    Unknown,
}

impl<T> Default for Observed<T> {
    fn default() -> Self {
        Observed::Unknown
    }
}

impl<T> From<Option<T>> for Observed<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Observed::Known(v),
            None => Observed::Unknown,
        }
    }
}

impl<T> Observed<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, Observed::Known(_))
    }

    pub fn is_unknown(&self) -> bool {
        !self.is_known()
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Observed::Known(v) => Some(v),
            Observed::Unknown => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Observed<U> {
        match self {
            Observed::Known(v) => Observed::Known(f(v)),
            Observed::Unknown => Observed::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_null_on_the_wire() {
        let value: Observed<u64> = Observed::Unknown;
        assert_eq!(serde_json::to_string(&value).unwrap(), "null");

        let back: Observed<u64> = serde_json::from_str("null").unwrap();
        assert_eq!(back, Observed::Unknown);

        let known: Observed<String> = serde_json::from_str("\"Valve\"").unwrap();
        assert_eq!(known, Observed::Known("Valve".to_string()));
    }
}
