use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, paths};

/// HTTP verbs a service may be exposed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Case-insensitive parse; anything besides GET and POST is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("GET") {
            Some(Method::Get)
        } else if raw.eq_ignore_ascii_case("POST") {
            Some(Method::Post)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability the plugin exposes for the host to forward calls to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// `namespace.action`, unique within one plugin.
    pub name: String,
    pub endpoint: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Append-only list of service declarations, kept in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a service. Must happen before the plugin's first `load`.
    ///
    /// The endpoint must begin with `/` and the method must be GET or POST in
    /// any letter case; the stored method is normalized. Lifecycle paths are
    /// off limits and each `(endpoint, method)` pair belongs to one service.
    /// A rejected call leaves the registry untouched.
    pub fn register(
        &mut self,
        name: &str,
        endpoint: &str,
        method: &str,
        description: Option<&str>,
    ) -> Result<&ServiceDescriptor, ConfigError> {
        if !endpoint.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint {
                service: name.to_string(),
                endpoint: endpoint.to_string(),
            });
        }
        let method = Method::parse(method).ok_or_else(|| ConfigError::UnsupportedMethod {
            service: name.to_string(),
            method: method.to_string(),
        })?;
        if paths::is_reserved(endpoint) {
            return Err(ConfigError::ReservedEndpoint {
                service: name.to_string(),
                endpoint: endpoint.to_string(),
            });
        }
        if self.get(name).is_some() {
            return Err(ConfigError::DuplicateService(name.to_string()));
        }
        if let Some(existing) = self
            .services
            .iter()
            .find(|service| service.endpoint == endpoint && service.method == method)
        {
            return Err(ConfigError::DuplicateEndpoint {
                service: name.to_string(),
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                existing: existing.name.clone(),
            });
        }

        self.services.push(ServiceDescriptor {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            method,
            description: description
                .filter(|text| !text.is_empty())
                .map(str::to_string),
        });
        Ok(&self.services[self.services.len() - 1])
    }

    pub fn list(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|service| service.name == name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
