use std::collections::HashMap;

/// Request options, normalized to an ordered list of key/value pairs.
/// Repeated keys are allowed (a GET like `?dataset=A&dataset=B` is valid),
/// which is why this isn't a map internally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions(Vec<(String, String)>);

impl RequestOptions {
    pub fn new() -> Self {
        RequestOptions(Vec::new())
    }

    pub fn push(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn from_map(map: HashMap<String, String>) -> Self {
        RequestOptions(map.into_iter().collect())
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        RequestOptions(pairs)
    }

    /// Parse a list of `"k=v"` strings into pairs. A string with no `=` is
    /// skipped.
    pub fn from_kv_strings(strings: &[String]) -> Self {
        RequestOptions(
            strings
                .iter()
                .filter_map(|s| s.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
                .collect(),
        )
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `k1=v1&k2=v2`, percent-encoded, suitable for a GET query string or an
    /// `application/x-www-form-urlencoded` POST body.
    pub fn to_url_encoded(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Repeated keys collapse into a JSON array in encounter order, the same
    /// way the remote's `format='json'` POST handling does (a bare value for
    /// a key seen once, a list once a second occurrence shows up) rather than
    /// silently keeping only the last value.
    pub fn to_json_object(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.0 {
            match map.get_mut(k) {
                None => {
                    map.insert(k.clone(), serde_json::Value::String(v.clone()));
                }
                Some(serde_json::Value::Array(values)) => {
                    values.push(serde_json::Value::String(v.clone()));
                }
                Some(existing) => {
                    let first = existing.clone();
                    map.insert(k.clone(), serde_json::Value::Array(vec![first, serde_json::Value::String(v.clone())]));
                }
            }
        }
        serde_json::Value::Object(map)
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_kv_strings_parses_and_skips_malformed() {
        let opts = RequestOptions::from_kv_strings(&["a=1".to_string(), "b=2".to_string(), "nope".to_string()]);
        assert_eq!(opts.pairs(), &[("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn url_encoded_joins_with_ampersand() {
        let opts = RequestOptions::new().push("node", "T1_US_FNAL").push("dataset", "/A/B/C");
        assert_eq!(opts.to_url_encoded(), "node=T1_US_FNAL&dataset=%2FA%2FB%2FC");
    }

    #[test]
    fn repeated_keys_are_preserved() {
        let opts = RequestOptions::new().push("dataset", "A").push("dataset", "B");
        assert_eq!(opts.pairs().len(), 2);
    }

    #[test]
    fn json_object_collapses_repeated_keys_into_an_array() {
        let opts = RequestOptions::new().push("dataset", "A").push("dataset", "B").push("node", "T1_US_FNAL");
        let json = opts.to_json_object();
        assert_eq!(json["dataset"], serde_json::json!(["A", "B"]));
        assert_eq!(json["node"], serde_json::json!("T1_US_FNAL"));
    }
}
