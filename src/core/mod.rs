pub mod events;
pub mod logging;
pub mod session;
pub mod settings;

pub use events::{progress_percent, ModelCenterState, ModelRowState};
pub use session::DownloadSession;
pub use settings::{Settings, SettingsManager};
