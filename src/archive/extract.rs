//! Random access to a scanned entry by replaying its resume token.

use tracing::{error, warn};

use super::directory::EntryRecord;
use super::session::ArchiveSession;
use crate::error::{Error, Result};

/// Extract `record` from the session that listed it.
///
/// A token that no longer re-synchronises the decoder, or that lands on a
/// differently named entry, faults the session for good.
pub(crate) fn extract(session: &mut ArchiveSession, record: &EntryRecord) -> Result<Vec<u8>> {
    if session.is_faulted() {
        return Err(Error::Faulted);
    }

    if !session.parse_at(record.token) {
        error!(entry = record.name(), token = ?record.token, "resume token did not re-synchronise the decoder");
        session.mark_faulted();
        return Err(Error::Integrity {
            name: record.name().to_owned(),
        });
    }

    if session.current_name() != Some(record.name()) {
        error!(
            entry = record.name(),
            found = ?session.current_name(),
            "resume token landed on a different entry"
        );
        session.mark_faulted();
        return Err(Error::Integrity {
            name: record.name().to_owned(),
        });
    }

    // the live decoder is authoritative for the size
    let size = session.current_size();
    if size != record.size() {
        warn!(entry = record.name(), listed = record.size(), size, "entry size changed since scan");
    }

    session.extract_current()
}
