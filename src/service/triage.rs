use tracing::info;
use uuid::Uuid;

use crate::db::tick_after;
use crate::error::{AppError, AppResult};
use crate::models::{PrayerRequest, RequestStatus, TriageInput};
use crate::state::AppState;

/// Staff status/notes change. Sends nothing.
///
/// Only the reply pipeline may move a request into `replied`; re-applying
/// `replied` to a request that already is one is allowed (e.g. to edit notes).
pub fn triage(state: &AppState, id: Uuid, input: TriageInput) -> AppResult<PrayerRequest> {
    let current = state.db.get_request(id)?.ok_or(AppError::NotFound(id))?;

    if let Some(expected) = input.expected_version {
        if expected != current.version {
            return Err(AppError::Conflict(format!(
                "request {id} is at version {}, not {expected}",
                current.version
            )));
        }
    }

    let into_replied =
        input.status == RequestStatus::Replied && current.status != RequestStatus::Replied;
    if into_replied || !current.status.can_transition_to(input.status) {
        return Err(AppError::InvalidTransition {
            from: current.status,
            to: input.status,
        });
    }

    let updated_at = tick_after(current.updated_at);
    let applied = state.db.apply_triage(
        id,
        current.version,
        input.status,
        input.admin_notes.as_deref(),
        updated_at,
    )?;
    if !applied {
        return Err(AppError::Conflict(format!(
            "request {id} was modified concurrently"
        )));
    }

    info!(
        "Prayer request {} triaged: {} -> {}",
        id, current.status, input.status
    );
    state.db.get_request(id)?.ok_or(AppError::NotFound(id))
}
