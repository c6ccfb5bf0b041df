pub mod achievements;
pub mod controller;
pub mod duration;
pub mod error;
pub mod mock;
pub mod progression;
pub mod rest_timer;
pub mod retry;
pub mod summary;
pub mod video;

pub use achievements::{AchievementSignaler, AchievementSink, NoAchievements};
pub use controller::{ControllerConfig, SessionController};
pub use error::{AchievementError, CoordinatorError, ProgressionError, Role};
pub use progression::{Action, Effect, Transition};
pub use retry::RetryPolicy;
pub use summary::{SummaryReadPolicy, SummaryReader, SummaryRecorder};
pub use video::{CallHandle, VideoCredentials, VideoEvent, VideoLifecycle, VideoTransport};
