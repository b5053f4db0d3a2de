//! WebSocket event hub (C11) and its periodic producer (C12), spec §4.7.

mod frame;
mod hub;
mod producer;
mod session;
mod snapshot;

pub use frame::{close_code, ClientFrame, ServerFrame};
pub use hub::Hub;
pub use producer::{PeriodicSource, Producer};
pub use session::{run as run_session, SessionTuning};
pub use snapshot::{EmptySnapshots, SnapshotProvider};
