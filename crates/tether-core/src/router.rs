use tether_sdk::{Method, ServiceDescriptor};

use crate::plugin::ServiceHandler;

/// Result of matching a request line against a route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMatch<T> {
    Found(T),
    /// The path is known but not under this verb.
    MethodNotAllowed,
    NotFound,
}

/// Converts a request verb into a contract verb, if it is one.
pub fn contract_method(method: &http::Method) -> Option<Method> {
    match *method {
        http::Method::GET => Some(Method::Get),
        http::Method::POST => Some(Method::Post),
        _ => None,
    }
}

/// Exact path + verb lookup over a table of `(method, path)` keyed entries.
pub fn resolve<'a, T>(
    entries: impl IntoIterator<Item = (Method, &'a str, T)>,
    method: &http::Method,
    path: &str,
) -> RouteMatch<T> {
    let wanted = contract_method(method);
    let mut path_known = false;
    for (entry_method, entry_path, value) in entries {
        if entry_path != path {
            continue;
        }
        if Some(entry_method) == wanted {
            return RouteMatch::Found(value);
        }
        path_known = true;
    }
    if path_known {
        RouteMatch::MethodNotAllowed
    } else {
        RouteMatch::NotFound
    }
}

#[derive(Clone)]
pub struct ServiceRoute {
    pub descriptor: ServiceDescriptor,
    pub handler: ServiceHandler,
}

/// Dispatch table for the services a plugin declared.
#[derive(Clone, Default)]
pub struct ServiceRouter {
    routes: Vec<ServiceRoute>,
}

impl ServiceRouter {
    pub fn new(routes: Vec<ServiceRoute>) -> Self {
        Self { routes }
    }

    pub fn select(&self, method: &http::Method, path: &str) -> RouteMatch<&ServiceRoute> {
        resolve(
            self.routes
                .iter()
                .map(|route| (route.descriptor.method, route.descriptor.endpoint.as_str(), route)),
            method,
            path,
        )
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tether_sdk::ServiceCall;
    use tower::{service_fn, util::BoxCloneSyncService};

    use super::*;

    fn route(name: &str, endpoint: &str, method: Method) -> ServiceRoute {
        let reply = name.to_string();
        ServiceRoute {
            descriptor: ServiceDescriptor {
                name: name.into(),
                endpoint: endpoint.into(),
                method,
                description: None,
            },
            handler: BoxCloneSyncService::new(service_fn(move |_call: ServiceCall| {
                let reply = reply.clone();
                async move { Ok::<Value, anyhow::Error>(json!(reply)) }
            })),
        }
    }

    fn router() -> ServiceRouter {
        ServiceRouter::new(vec![
            route("metrics.report", "/metrics/report", Method::Post),
            route("metrics.dump", "/metrics/dump", Method::Get),
        ])
    }

    #[test]
    fn selects_exact_path_and_verb() {
        let router = router();
        match router.select(&http::Method::POST, "/metrics/report") {
            RouteMatch::Found(route) => assert_eq!(route.descriptor.name, "metrics.report"),
            _ => panic!("expected a match"),
        }
        assert!(matches!(
            router.select(&http::Method::GET, "/metrics/dump"),
            RouteMatch::Found(_)
        ));
    }

    #[test]
    fn wrong_verb_and_unknown_path_are_distinguished() {
        let router = router();
        assert!(matches!(
            router.select(&http::Method::GET, "/metrics/report"),
            RouteMatch::MethodNotAllowed
        ));
        assert!(matches!(
            router.select(&http::Method::PUT, "/metrics/dump"),
            RouteMatch::MethodNotAllowed
        ));
        assert!(matches!(
            router.select(&http::Method::POST, "/metrics/report/"),
            RouteMatch::NotFound
        ));
    }
}
