pub mod clock;
pub mod document;
pub mod errors;
pub mod ids;
pub mod metadata;
pub mod program;
pub mod store;
pub mod summary;
pub mod workout;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{Change, DocumentChange, DocumentPath, Participants, SessionSnapshot, Snapshot};
pub use errors::{StoreError, TransportError};
pub use ids::{ChannelId, SessionId, SummaryId, UserId};
pub use store::{ChangeStream, SessionStore, SummarySink};
pub use summary::SessionSummary;
