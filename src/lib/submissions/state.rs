use super::types::Status;

/// `Running -> Queued` exists only for startup recovery of submissions that
/// were running when the previous process died.
pub fn valid_state_transition(src: Status, dst: Status) -> bool {
    match (src, dst) {
        (Status::Queued, Status::Running) => true,
        (Status::Queued, Status::Queued | Status::Completed | Status::Failed) => false,
        (Status::Running, Status::Completed | Status::Failed | Status::Queued) => true,
        (Status::Running, Status::Running) => false,
        (Status::Completed | Status::Failed, _) => false,
    }
}
