//! Endpoint, route and processor registries.
//!
//! Pure inserts keyed by ID; re-using an ID silently replaces the previous
//! entry. Routes carry a creation sequence so matching follows declaration
//! order regardless of hash-map iteration order.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use switchyard_types::endpoint::Endpoint;
use switchyard_types::route::{Route, RouteMetrics};

use super::delivery::BoxDeliverer;
use super::processor::BoxProcessor;

/// An endpoint plus its optional delivery capability.
///
/// Endpoints without a deliverer are notification-only sinks.
#[derive(Debug, Clone)]
pub struct RegisteredEndpoint {
    pub endpoint: Endpoint,
    pub deliverer: Option<BoxDeliverer>,
}

#[derive(Debug, Clone)]
struct RouteEntry {
    seq: u64,
    route: Route,
}

/// Owning component for the three lookup tables.
#[derive(Default)]
pub struct Registry {
    endpoints: DashMap<String, RegisteredEndpoint>,
    routes: DashMap<String, RouteEntry>,
    processors: DashMap<String, BoxProcessor>,
    route_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_endpoint(&self, endpoint: Endpoint, deliverer: Option<BoxDeliverer>) {
        self.endpoints.insert(
            endpoint.id.clone(),
            RegisteredEndpoint {
                endpoint,
                deliverer,
            },
        );
    }

    /// Insert a route with zeroed metrics, replacing any route with the same ID.
    pub fn create_route(&self, mut route: Route) -> Route {
        route.metrics = RouteMetrics::default();
        let seq = self.route_seq.fetch_add(1, Ordering::Relaxed);
        self.routes.insert(
            route.id.clone(),
            RouteEntry {
                seq,
                route: route.clone(),
            },
        );
        route
    }

    pub fn register_processor(&self, processor: BoxProcessor) {
        self.processors.insert(processor.id().to_string(), processor);
    }

    pub fn endpoint(&self, id: &str) -> Option<RegisteredEndpoint> {
        self.endpoints.get(id).map(|e| e.value().clone())
    }

    /// Resolve a destination URI to a registered endpoint.
    pub fn endpoint_by_uri(&self, uri: &str) -> Option<RegisteredEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.value().endpoint.uri == uri)
            .map(|e| e.value().clone())
    }

    pub fn route(&self, id: &str) -> Option<Route> {
        self.routes.get(id).map(|e| e.value().route.clone())
    }

    pub fn processor(&self, id: &str) -> Option<BoxProcessor> {
        self.processors.get(id).map(|p| p.value().clone())
    }

    /// Enabled routes accepting the given source/destination, in declaration order.
    pub fn matching_routes(&self, source: &str, destination: Option<&str>) -> Vec<Route> {
        let mut matched: Vec<(u64, Route)> = self
            .routes
            .iter()
            .filter(|e| e.value().route.matches(source, destination))
            .map(|e| (e.value().seq, e.value().route.clone()))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);
        matched.into_iter().map(|(_, route)| route).collect()
    }

    /// Fold one processing attempt into a route's metrics.
    pub fn record_route_attempt(
        &self,
        route_id: &str,
        success: bool,
        elapsed_ms: f64,
        now: DateTime<Utc>,
    ) {
        if let Some(mut entry) = self.routes.get_mut(route_id) {
            entry.route.metrics.record(success, elapsed_ms, now);
        }
    }

    pub fn route_metrics(&self, route_id: &str) -> Option<RouteMetrics> {
        self.routes
            .get(route_id)
            .map(|e| e.value().route.metrics.clone())
    }

    /// Enable or disable a route. Returns `false` if the route is unknown.
    pub fn set_route_enabled(&self, route_id: &str, enabled: bool) -> bool {
        match self.routes.get_mut(route_id) {
            Some(mut entry) => {
                entry.route.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn routes(&self) -> Vec<Route> {
        let mut all: Vec<(u64, Route)> = self
            .routes
            .iter()
            .map(|e| (e.value().seq, e.value().route.clone()))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, route)| route).collect()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("endpoints", &self.endpoints.len())
            .field("routes", &self.routes.len())
            .field("processors", &self.processors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::processor::{FnProcessor, ProcessOutcome};
    use switchyard_types::endpoint::EndpointRole;
    use switchyard_types::route::ProcessorKind;

    fn route(id: &str, from: &str) -> Route {
        Route::new(id, id, from, vec!["sink://a".into()], vec![])
    }

    #[test]
    fn create_route_zeroes_metrics() {
        let registry = Registry::new();
        let mut r = route("r1", "src://x");
        r.metrics.messages_processed = 99;
        let created = registry.create_route(r);
        assert_eq!(created.metrics, RouteMetrics::default());
        assert_eq!(registry.route_metrics("r1"), Some(RouteMetrics::default()));
    }

    #[test]
    fn reusing_id_overwrites() {
        let registry = Registry::new();
        registry.create_route(route("r1", "src://x"));
        registry.create_route(route("r1", "src://y"));
        assert_eq!(registry.routes().len(), 1);
        assert_eq!(registry.route("r1").unwrap().from, "src://y");

        let ep = Endpoint::new("e1", EndpointRole::Sink, "first", "sink://one");
        registry.register_endpoint(ep, None);
        let ep = Endpoint::new("e1", EndpointRole::Sink, "second", "sink://two");
        registry.register_endpoint(ep, None);
        assert_eq!(registry.endpoint_count(), 1);
        assert_eq!(registry.endpoint("e1").unwrap().endpoint.name, "second");
    }

    #[test]
    fn matching_routes_in_declaration_order() {
        let registry = Registry::new();
        registry.create_route(route("c", "*"));
        registry.create_route(route("a", "src://x"));
        registry.create_route(route("b", "src://other"));
        registry.create_route(route("d", "queue://billing"));

        let ids: Vec<String> = registry
            .matching_routes("src://x", Some("queue://billing"))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "d"]);
    }

    #[test]
    fn disabled_routes_excluded() {
        let registry = Registry::new();
        registry.create_route(route("a", "src://x"));
        assert!(registry.set_route_enabled("a", false));
        assert!(registry.matching_routes("src://x", None).is_empty());
        assert!(!registry.set_route_enabled("missing", false));
    }

    #[test]
    fn endpoint_by_uri_resolves() {
        let registry = Registry::new();
        registry.register_endpoint(
            Endpoint::new("audit", EndpointRole::Sink, "Audit", "sink://audit"),
            None,
        );
        assert_eq!(
            registry.endpoint_by_uri("sink://audit").unwrap().endpoint.id,
            "audit"
        );
        assert!(registry.endpoint_by_uri("sink://nope").is_none());
    }

    #[test]
    fn register_processor_keyed_by_id() {
        let registry = Registry::new();
        registry.register_processor(BoxProcessor::new(FnProcessor::new(
            "noop",
            ProcessorKind::Custom,
            |m| async move { Ok(ProcessOutcome::Forward(m)) },
        )));
        assert_eq!(registry.processor_count(), 1);
        assert_eq!(registry.processor("noop").unwrap().kind(), ProcessorKind::Custom);
        assert!(registry.processor("other").is_none());
    }

    #[test]
    fn record_route_attempt_updates_metrics() {
        let registry = Registry::new();
        registry.create_route(route("a", "src://x"));
        registry.record_route_attempt("a", true, 4.0, Utc::now());
        registry.record_route_attempt("a", false, 4.0, Utc::now());
        let m = registry.route_metrics("a").unwrap();
        assert_eq!(m.messages_processed, 1);
        assert_eq!(m.messages_failed, 1);
    }
}
