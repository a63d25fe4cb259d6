//! Client helpers.
//!
//! A helper extends the client with service-specific message handling. It
//! is registered for one service, claims a set of in-band message types and
//! receives every inbound message of those types that is not a response to
//! a pending request.

pub mod llm;

use parking_lot::RwLock;

use super::client::{RtviClient, WeakRtviClient};
use crate::errors::{RtviError, RtviResult};

pub use llm::{
    FunctionCallCallback, FunctionCallParams, LlmContext, LlmContextMessage, LlmFunctionCallData,
    LlmHelper, LlmMessageType,
};

/// Service-specific extension of an [`RtviClient`].
pub trait RtviClientHelper: Send + Sync {
    /// In-band message types this helper handles.
    fn message_types(&self) -> Vec<String>;

    /// Handle one inbound message of a claimed type.
    ///
    /// Runs on the client's event loop; long work must be spawned.
    fn handle_message(&self, message: &crate::core::messages::RtviMessage);

    /// Called once on registration with the owning client and the service
    /// the helper targets.
    fn attach(&self, client: WeakRtviClient, service: &str);
}

/// Client and service a helper was registered with.
#[derive(Default)]
pub struct HelperBinding {
    inner: RwLock<Option<(WeakRtviClient, String)>>,
}

impl HelperBinding {
    pub fn bind(&self, client: WeakRtviClient, service: &str) {
        *self.inner.write() = Some((client, service.to_string()));
    }

    pub fn is_bound(&self) -> bool {
        self.inner.read().is_some()
    }

    /// The owning client, if it is still alive.
    pub fn client(&self) -> RtviResult<RtviClient> {
        self.inner
            .read()
            .as_ref()
            .and_then(|(client, _)| client.upgrade())
            .ok_or_else(|| RtviError::Internal("helper is not attached to a client".to_string()))
    }

    /// Target service name.
    pub fn service(&self) -> RtviResult<String> {
        self.inner
            .read()
            .as_ref()
            .map(|(_, service)| service.clone())
            .ok_or_else(|| RtviError::Internal("helper is not attached to a client".to_string()))
    }
}
