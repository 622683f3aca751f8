//! TransportRegistry - destination scheme -> Sender
//!
//! scheme を追加するのは Sender を 1 つ登録することであって、エンジン本体の変更ではない。

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::domain::CourierError;
use crate::ports::Sender;

#[derive(Clone, Default)]
pub struct TransportRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last registration for a scheme wins.
    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.scheme().to_string(), sender);
    }

    pub fn resolve(&self, destination: &Url) -> Result<Arc<dyn Sender>, CourierError> {
        self.senders
            .get(destination.scheme())
            .cloned()
            .ok_or_else(|| CourierError::UnknownScheme(destination.scheme().to_string()))
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.senders.keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::memory::InMemorySender;

    #[test]
    fn resolves_by_scheme() {
        let mut registry = TransportRegistry::new();
        registry.register(Arc::new(InMemorySender::new()));

        let sender = registry
            .resolve(&Url::parse("memory://inbox").unwrap())
            .unwrap();
        assert_eq!(sender.scheme(), "memory");
        assert_eq!(registry.schemes(), vec!["memory".to_string()]);
    }

    #[test]
    fn unknown_scheme_is_a_configuration_error() {
        let registry = TransportRegistry::new();
        let err = registry
            .resolve(&Url::parse("carrier-pigeon://roof").unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, CourierError::UnknownScheme(ref s) if s == "carrier-pigeon"));
        assert_eq!(err.kind(), crate::domain::ErrorKind::Configuration);
    }
}
