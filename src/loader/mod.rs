//! Stream loading: backend access, sessions and the bounded executor

pub mod cancel;
pub mod executor;
pub mod backend;
pub mod recorded;
pub mod session;

pub use cancel::CancelToken;
pub use executor::{BoundedExecutor, ExecutorProgress, ProgressFn, TaskHandle};
pub use backend::{ChannelId, DownloadRequest, LoadQuery, MemoryBackend, ModelBackend, TileCountQuery};
pub use recorded::RecordedBackend;
pub use session::{LoaderSession, SessionOutput};
