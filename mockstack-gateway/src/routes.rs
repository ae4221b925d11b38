//! Static service routing table
//!
//! Built once at startup, immutable afterwards, so sessions read it without
//! synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::ServiceHandler;

/// Mapping from credential service name to its handler
pub struct RoutingTable {
    entries: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder {
            entries: HashMap::new(),
        }
    }

    /// Resolve a service name to its handler
    pub fn resolve(&self, service: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.entries.get(service).cloned()
    }

    /// Registered service names, sorted
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builder for [`RoutingTable`]; registration happens only at startup
pub struct RoutingTableBuilder {
    entries: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl RoutingTableBuilder {
    pub fn register(
        mut self,
        service: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        self.entries.insert(service.into(), handler);
        self
    }

    pub fn build(self) -> RoutingTable {
        RoutingTable {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::StubHandler;

    fn table() -> RoutingTable {
        RoutingTable::builder()
            .register("sqs", Arc::new(StubHandler::new("sqs")))
            .register("s3", Arc::new(StubHandler::new("s3")))
            .build()
    }

    #[test]
    fn test_resolve_known_service() {
        assert!(table().resolve("sqs").is_some());
    }

    #[test]
    fn test_resolve_unknown_service() {
        assert!(table().resolve("dynamodb").is_none());
    }

    #[test]
    fn test_service_names_sorted() {
        assert_eq!(table().service_names(), vec!["s3", "sqs"]);
    }
}
