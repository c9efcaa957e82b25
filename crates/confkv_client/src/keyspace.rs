//! Service-name key namespacing.

/// Maps caller keys into the store key space of one service.
///
/// With a non-empty service name `svc`, key `k` is stored as `svc/k`. An
/// empty service name leaves keys untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KeySpace {
    prefix: Vec<u8>,
}

impl KeySpace {
    pub(crate) fn new(service_name: &str) -> Self {
        let mut prefix = Vec::new();
        if !service_name.is_empty() {
            prefix.extend_from_slice(service_name.as_bytes());
            prefix.push(b'/');
        }
        Self { prefix }
    }

    /// Returns the store key for `key`.
    pub(crate) fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_service_name_is_identity() {
        assert_eq!(KeySpace::new("").key(b"a/b"), b"a/b".to_vec());
    }

    #[test]
    fn service_name_prefixes_keys() {
        let space = KeySpace::new("config");
        assert_eq!(space.key(b"vn/1"), b"config/vn/1".to_vec());
        assert_ne!(space.key(b"x"), KeySpace::new("other").key(b"x"));
    }
}
