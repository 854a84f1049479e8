//! Header bag and envelope key-value glue.

use crate::rpc::KeyValue;

/// Ordered header bag with lowercase keys.
///
/// Insertion order is preserved; the transport appends user headers after
/// any adapter-owned entries, so user indices are stable across a round
/// trip through the wire key-value list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Keys are lowercased.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .push((key.into().to_ascii_lowercase(), value.into()));
    }

    /// First value recorded under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.insert(key, value);
        }
        headers
    }
}

/// Enumerate header entries, in order, into wire key-value pairs.
pub fn headers_to_kv(headers: &Headers) -> Vec<KeyValue> {
    headers
        .iter()
        .map(|(key, value)| KeyValue {
            key: key.to_owned(),
            value: value.to_owned(),
        })
        .collect()
}

/// Reconstruct a header bag. A missing list yields an empty bag.
pub fn kv_to_headers(entries: Option<&[KeyValue]>) -> Headers {
    let mut headers = Headers::new();
    for kv in entries.unwrap_or_default() {
        headers.insert(kv.key.clone(), kv.value.clone());
    }
    headers
}

/// Full method path, `/<service>/<method>`.
pub fn method_path(service: &str, method: &str) -> String {
    format!("/{service}/{method}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lowercases_keys() {
        let mut headers = Headers::new();
        headers.insert("X-Test", "1");
        assert_eq!(headers.get("x-test"), Some("1"));
        assert_eq!(headers.get("X-TEST"), Some("1"));
    }

    #[test]
    fn round_trip_preserves_order() {
        let mut headers = Headers::new();
        headers.insert("b", "2");
        headers.insert("a", "1");
        headers.insert("a", "3");

        let kv = headers_to_kv(&headers);
        assert_eq!(kv.len(), 3);
        assert_eq!(kv[0].key, "b");
        assert_eq!(kv[1].key, "a");
        assert_eq!(kv[2].key, "a");

        let back = kv_to_headers(Some(&kv));
        assert_eq!(back, headers);
    }

    #[test]
    fn missing_list_yields_empty_bag() {
        assert!(kv_to_headers(None).is_empty());
    }

    #[test]
    fn method_path_shape() {
        assert_eq!(method_path("echo.v1.EchoService", "Echo"), "/echo.v1.EchoService/Echo");
    }
}
