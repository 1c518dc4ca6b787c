/// State of an `Action`. Transitions form a DAG:
/// `READY -> (WAITINGPRE -> READY)* -> EXECUTING -> (COMPLETE | FAILED)`.
/// Once in `COMPLETE`/`FAILED`, only `done()` (a time-based predicate, not a
/// state transition) may change externally-observed behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionState {
    Ready,
    WaitingPre,
    WaitingPost,
    Executing,
    Complete,
    Failed,
}

impl ActionState {
    pub fn is_done(self) -> bool {
        matches!(self, ActionState::Complete | ActionState::Failed)
    }
}
