//! Decoded transport parameters.
//!
//! The orchestrator never reads process-global request state; the caller
//! hands it the already-parsed form or query parameters, plus the raw
//! query string when signature verification must see the sender's exact
//! percent-encoding.

/// Parameters of one HTTP request, as parsed by the caller's framework.
#[derive(Debug, Clone, Default)]
pub struct HttpParams {
    pairs: Vec<(String, String)>,
    raw_query: Option<String>,
}

impl HttpParams {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from decoded name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            raw_query: None,
        }
    }

    /// Attaches the raw query string exactly as received on the wire.
    #[must_use]
    pub fn with_raw_query(mut self, raw_query: impl Into<String>) -> Self {
        self.raw_query = Some(raw_query.into());
        self
    }

    /// Adds a decoded parameter.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Looks up the first value for a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The raw query string, when the caller supplied it.
    #[must_use]
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_first_match() {
        let mut params = HttpParams::from_pairs([("a", "1"), ("b", "2")]);
        params.insert("a", "3");
        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(params.get("b"), Some("2"));
        assert_eq!(params.get("c"), None);
    }

    #[test]
    fn raw_query_is_optional() {
        let params = HttpParams::new();
        assert!(params.raw_query().is_none());
        let params = params.with_raw_query("SAMLRequest=abc");
        assert_eq!(params.raw_query(), Some("SAMLRequest=abc"));
    }
}
