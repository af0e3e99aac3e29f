//! The six boundary operations, each answered with a JSON body.
//!
//! Lifecycle errors are turned into `{status: "error", message}` here so the
//! transport never sees a plugin-specific failure.

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tether_sdk::{paths, LifecycleResponse, Method};

use crate::{
    lifecycle::Operation,
    plugin::RemotePlugin,
    router::{resolve, RouteMatch},
    runtime::PluginRuntime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Metadata,
    Health,
    Load,
    Start,
    Stop,
    Unload,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Metadata,
        Endpoint::Health,
        Endpoint::Load,
        Endpoint::Start,
        Endpoint::Stop,
        Endpoint::Unload,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Metadata => paths::METADATA,
            Endpoint::Health => paths::HEALTH,
            Endpoint::Load => paths::LOAD,
            Endpoint::Start => paths::START,
            Endpoint::Stop => paths::STOP,
            Endpoint::Unload => paths::UNLOAD,
        }
    }

    pub fn method(self) -> Method {
        match self {
            Endpoint::Metadata | Endpoint::Health => Method::Get,
            _ => Method::Post,
        }
    }

    pub fn operation(self) -> Option<Operation> {
        match self {
            Endpoint::Metadata | Endpoint::Health => None,
            Endpoint::Load => Some(Operation::Load),
            Endpoint::Start => Some(Operation::Start),
            Endpoint::Stop => Some(Operation::Stop),
            Endpoint::Unload => Some(Operation::Unload),
        }
    }

    pub fn for_operation(op: Operation) -> Self {
        match op {
            Operation::Load => Endpoint::Load,
            Operation::Start => Endpoint::Start,
            Operation::Stop => Endpoint::Stop,
            Operation::Unload => Endpoint::Unload,
        }
    }

    pub fn resolve(method: &http::Method, path: &str) -> RouteMatch<Endpoint> {
        resolve(
            Self::ALL
                .into_iter()
                .map(|endpoint| (endpoint.method(), endpoint.path(), endpoint)),
            method,
            path,
        )
    }
}

/// Status code plus JSON body, independent of the HTTP stack in use.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(err) => Self::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("response is not serializable: {err}"),
            ),
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::json(status, &LifecycleResponse::error(message))
    }
}

pub async fn handle<P: RemotePlugin>(runtime: &PluginRuntime<P>, endpoint: Endpoint) -> Reply {
    match endpoint.operation() {
        None if endpoint == Endpoint::Metadata => Reply::json(StatusCode::OK, &runtime.metadata()),
        None => Reply::json(StatusCode::OK, &runtime.health().await),
        Some(op) => transition(runtime, op).await,
    }
}

async fn transition<P: RemotePlugin>(runtime: &PluginRuntime<P>, op: Operation) -> Reply {
    match runtime.controller().apply(op).await {
        Ok(transition) => Reply::json(StatusCode::OK, &LifecycleResponse::ok(transition.message())),
        Err(err) => Reply::error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
