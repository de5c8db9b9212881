pub mod errors;
pub mod events;
pub mod message;
pub mod requests;
pub mod user;

pub use errors::ErrorResponse;
pub use events::{
    CheckOnlinePayload, ClientEvent, DirectSendPayload, DirectTypingPayload, GroupPresenceNotice,
    GroupRef, GroupSendPayload, GroupTypingIndicator, MessageErrorPayload, MessageRef, PingPayload,
    PongPayload, PresenceNotice, SentMessage, ServerEvent, TypingIndicator,
};
pub use message::{AmbiguousTarget, Attachment, DeliveryStatus, Message, MessageTarget, has_payload};
pub use requests::{
    ConversationTarget, HistoryQuery, HistoryResponse, PollQuery, PollResponse,
    SendMessageRequest, SendMessageResponse,
};
pub use user::{OnlineStatus, OnlineUsersResponse, UserSummary};
