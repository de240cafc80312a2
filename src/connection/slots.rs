//! The connection's two dispatch callbacks.
//!
//! Guarded by their own lock, independent of the outstanding table. The read
//! loop clones the `Arc` out and releases the lock before awaiting a handler,
//! so installing a new handler from inside a handler does not deadlock.

use std::sync::{Arc, RwLock};

use crate::handler::{EventHandler, RequestHandler};

#[derive(Default)]
pub(crate) struct HandlerSlots {
    request: RwLock<Option<Arc<dyn RequestHandler>>>,
    event: RwLock<Option<Arc<dyn EventHandler>>>,
}

impl HandlerSlots {
    pub(crate) fn set_request(&self, handler: Arc<dyn RequestHandler>) {
        *self
            .request
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    pub(crate) fn set_event(&self, handler: Arc<dyn EventHandler>) {
        *self
            .event
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    pub(crate) fn request(&self) -> Option<Arc<dyn RequestHandler>> {
        self.request
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn event(&self) -> Option<Arc<dyn EventHandler>> {
        self.event
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
