//! Advisory checks a plugin author runs before deploying.
//!
//! Nothing here fails: every problem becomes one human-readable line and the
//! caller decides whether to abort. The host applies a looser check of its own.

use std::collections::HashSet;

use serde_json::Value;

use crate::{
    identity::{PluginIdentity, PLACEHOLDER_NAME},
    metadata::build_metadata,
    paths,
    service::ServiceDescriptor,
};

/// Checks a typed identity and service list.
pub fn validate(identity: &PluginIdentity, services: &[ServiceDescriptor]) -> Vec<String> {
    match serde_json::to_value(build_metadata(identity, services)) {
        Ok(document) => validate_document(&document),
        Err(err) => vec![format!("metadata is not serializable: {err}")],
    }
}

/// Checks a metadata document as the host would receive it.
pub fn validate_document(document: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    match document.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() && name != PLACEHOLDER_NAME => {}
        _ => errors.push("plugin name is not set or is the default placeholder".to_string()),
    }

    let version = document.get("version").and_then(Value::as_str).unwrap_or("");
    if version.matches('.').count() < 2 {
        errors.push(format!("version should be X.Y.Z format: {version:?}"));
    }

    let Some(services) = document.get("services").and_then(Value::as_array) else {
        errors.push("services must be a list".to_string());
        return errors;
    };

    let mut seen = HashSet::new();
    let mut routes = HashSet::new();
    for (i, service) in services.iter().enumerate() {
        let Some(record) = service.as_object() else {
            errors.push(format!("service {i} is not an object"));
            continue;
        };

        for field in ["name", "endpoint", "method"] {
            if !record.contains_key(field) {
                errors.push(format!("service {i} missing '{field}'"));
            }
        }

        if let Some(endpoint) = record.get("endpoint") {
            match endpoint.as_str() {
                Some(path) if paths::is_reserved(path) => errors.push(format!(
                    "service {i} endpoint is reserved for the plugin lifecycle: {endpoint}"
                )),
                Some(path) if path.starts_with('/') => {}
                _ => errors.push(format!("service {i} endpoint should start with /: {endpoint}")),
            }
        }

        if let Some(method) = record.get("method") {
            if !matches!(method.as_str(), Some("GET" | "POST")) {
                errors.push(format!("service {i} method should be GET or POST: {method}"));
            }
        }

        if let Some(name) = record.get("name").and_then(Value::as_str) {
            if !seen.insert(name) {
                errors.push(format!("service {i} duplicates name '{name}'"));
            }
        }

        let endpoint = record.get("endpoint").and_then(Value::as_str);
        let method = record.get("method").and_then(Value::as_str);
        if let (Some(endpoint), Some(method)) = (endpoint, method) {
            if !routes.insert((endpoint, method)) {
                errors.push(format!(
                    "service {i} duplicates route {method} {endpoint}"
                ));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::service::ServiceRegistry;

    #[test]
    fn placeholder_name_is_reported() {
        let identity = PluginIdentity::new("unknown_plugin", "0.1.0");
        let errors = validate(&identity, &[]);
        assert!(!errors.is_empty());
        assert!(errors.iter().any(|e| e.contains("name")));
    }

    #[test]
    fn well_formed_identity_passes() {
        let identity = PluginIdentity::new("metrics", "1.0.0");
        assert!(validate(&identity, &[]).is_empty());
    }

    #[test]
    fn short_version_is_reported() {
        let identity = PluginIdentity::new("metrics", "1.0");
        let errors = validate(&identity, &[]);
        assert_eq!(errors, vec![r#"version should be X.Y.Z format: "1.0""#.to_string()]);
    }

    #[test]
    fn registered_services_pass() {
        let mut registry = ServiceRegistry::new();
        registry
            .register("metrics.report", "/metrics/report", "POST", None)
            .unwrap();
        let identity = PluginIdentity::new("metrics", "1.0.0");
        assert!(validate(&identity, registry.list()).is_empty());
    }

    #[test]
    fn structural_problems_in_raw_documents() {
        let doc = json!({
            "name": "metrics",
            "version": "1.0.0",
            "services": [
                "metrics.report",
                {"name": "a", "endpoint": "a", "method": "PUT"},
                {"endpoint": "/b"},
                {"name": "a", "endpoint": "/c", "method": "GET"}
            ]
        });
        let errors = validate_document(&doc);
        assert_eq!(
            errors,
            vec![
                "service 0 is not an object".to_string(),
                r#"service 1 endpoint should start with /: "a""#.to_string(),
                r#"service 1 method should be GET or POST: "PUT""#.to_string(),
                "service 2 missing 'name'".to_string(),
                "service 2 missing 'method'".to_string(),
                "service 3 duplicates name 'a'".to_string(),
            ]
        );
    }

    #[test]
    fn unreachable_routes_in_raw_documents() {
        let doc = json!({
            "name": "diag",
            "version": "1.0.0",
            "services": [
                {"name": "diag.status", "endpoint": "/plugin/status", "method": "GET"},
                {"name": "plugin.load_get", "endpoint": "/plugin/load", "method": "GET"},
                {"name": "dup.b", "endpoint": "/plugin/status", "method": "GET"},
                {"name": "diag.refresh", "endpoint": "/plugin/status", "method": "POST"}
            ]
        });
        assert_eq!(
            validate_document(&doc),
            vec![
                r#"service 1 endpoint is reserved for the plugin lifecycle: "/plugin/load""#
                    .to_string(),
                "service 2 duplicates route GET /plugin/status".to_string(),
            ]
        );
    }

    #[test]
    fn services_must_be_a_list() {
        let doc = json!({"name": "metrics", "version": "1.0.0", "services": {}});
        assert_eq!(validate_document(&doc), vec!["services must be a list".to_string()]);
    }

    #[test]
    fn empty_document_reports_everything_top_level() {
        let errors = validate_document(&json!({}));
        assert_eq!(errors.len(), 3);
    }
}
