//! Domain - ドメインモデル
//!
//! message レコード、状態遷移、配送結果、リトライ判断を定義します。
//! I/O は一切持ちません。

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
pub mod outcome;
pub mod status;

pub use decision::{BackoffDecider, DeadLetterReason, Decider, Decision, RetryRoute};
pub use errors::{HeraldError, TransitionError, ValidationError};
pub use events::DomainEvent;
pub use ids::{MessageId, OrganizationId};
pub use message::{Message, Payload, PriorityLane};
pub use outcome::{DeliveryError, DeliveryReceipt, FailureCause};
pub use status::MessageStatus;
