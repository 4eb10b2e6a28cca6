//! Status - message の状態機械
//!
//! 遷移表は [`MessageStatus`] を参照。sent と dead は終端状態です。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a message.
///
/// State transitions:
/// - (new) -> Scheduled | Pending
/// - Scheduled -> Pending (sweep promotes it)
/// - Pending -> Sending (a worker claims it)
/// - Sending -> Sent
/// - Sending -> Failed -> Pending | Scheduled (retry) | Dead
///
/// `Sent` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting in the scheduled index for its due time.
    Scheduled,

    /// Sitting in a priority lane, visible to workers.
    Pending,

    /// Claimed by a worker; a provider call is in flight.
    Sending,

    /// Delivered (terminal).
    Sent,

    /// Last attempt failed; the retry controller has not ruled yet.
    Failed,

    /// Dead-lettered (terminal).
    Dead,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Dead)
    }

    /// Can a worker claim a message in this status?
    pub fn is_dispatchable(self) -> bool {
        matches!(self, MessageStatus::Pending)
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Scheduled, Pending)
                | (Pending, Sending)
                | (Sending, Sent)
                | (Sending, Failed)
                | (Failed, Pending)
                | (Failed, Scheduled)
                | (Failed, Dead)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Scheduled => "scheduled",
            MessageStatus::Pending => "pending",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::promote(MessageStatus::Scheduled, MessageStatus::Pending)]
    #[case::claim(MessageStatus::Pending, MessageStatus::Sending)]
    #[case::success(MessageStatus::Sending, MessageStatus::Sent)]
    #[case::failure(MessageStatus::Sending, MessageStatus::Failed)]
    #[case::retry_lane(MessageStatus::Failed, MessageStatus::Pending)]
    #[case::retry_scheduled(MessageStatus::Failed, MessageStatus::Scheduled)]
    #[case::dead(MessageStatus::Failed, MessageStatus::Dead)]
    fn allowed_transitions(#[case] from: MessageStatus, #[case] to: MessageStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_claim(MessageStatus::Scheduled, MessageStatus::Sending)]
    #[case::sent_is_terminal(MessageStatus::Sent, MessageStatus::Pending)]
    #[case::dead_is_terminal(MessageStatus::Dead, MessageStatus::Pending)]
    #[case::no_direct_retry(MessageStatus::Sending, MessageStatus::Pending)]
    #[case::pending_cannot_die(MessageStatus::Pending, MessageStatus::Dead)]
    fn rejected_transitions(#[case] from: MessageStatus, #[case] to: MessageStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn only_sent_and_dead_are_terminal() {
        let terminal: Vec<_> = [
            MessageStatus::Scheduled,
            MessageStatus::Pending,
            MessageStatus::Sending,
            MessageStatus::Sent,
            MessageStatus::Failed,
            MessageStatus::Dead,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();

        assert_eq!(terminal, vec![MessageStatus::Sent, MessageStatus::Dead]);
    }

    #[test]
    fn serializes_snake_case() {
        let s = serde_json::to_string(&MessageStatus::Scheduled).unwrap();
        assert_eq!(s, "\"scheduled\"");
    }
}
