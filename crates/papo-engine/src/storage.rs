//! Best-effort storage access.
//!
//! Conversation history and presence writes never block or fail the state
//! machine; every storage error is logged and swallowed here.

use std::sync::{Arc, Mutex};

use tracing::warn;

use papo_store::Database;

/// Run a store operation, logging and discarding any failure.
pub(crate) fn with_db<T>(
    db: &Arc<Mutex<Database>>,
    what: &'static str,
    f: impl FnOnce(&Database) -> papo_store::Result<T>,
) -> Option<T> {
    let guard = match db.lock() {
        Ok(guard) => guard,
        Err(_) => {
            warn!(op = what, "storage mutex poisoned, skipping");
            return None;
        }
    };

    match f(&guard) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(op = what, error = %e, "storage operation failed");
            None
        }
    }
}
