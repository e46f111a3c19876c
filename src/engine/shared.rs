//! Process-wide audio context
//!
//! Created on first use, handed out to every caller while it is alive, and
//! closed only on application teardown. A closed context is replaced on the
//! next request.

use std::sync::Arc;

use parking_lot::{const_mutex, Mutex};
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::context::AudioContext;
use crate::engine::transport::ContextState;

static SHARED: Mutex<Option<Arc<AudioContext>>> = const_mutex(None);

/// The shared context, creating it from `config` on first use
///
/// `config` only matters for the call that creates the context.
pub fn shared_context(config: &EngineConfig) -> Arc<AudioContext> {
    let mut slot = SHARED.lock();
    match slot.as_ref() {
        Some(ctx) if ctx.state() != ContextState::Closed => Arc::clone(ctx),
        _ => {
            let ctx = AudioContext::new(config);
            info!(context = ?ctx.id(), "[CONTEXT] shared context created");
            *slot = Some(Arc::clone(&ctx));
            ctx
        }
    }
}

/// Close and forget the shared context, if one exists
pub fn shutdown_shared_context() {
    if let Some(ctx) = SHARED.lock().take() {
        crate::bus::MasterBus::dispose_for(&ctx);
        ctx.close();
        info!(context = ?ctx.id(), "[CONTEXT] shared context shut down");
    }
}
