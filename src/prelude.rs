pub use crate::comms::{CloseHandle, Listened, Requestor, Responder, pair};
pub use crate::config::PairConfig;
pub use crate::error::CommsError;
pub use crate::mux::{MuxError, MuxHandler, MuxRequest, Resolver};
pub use crate::spawn::{LoopHooks, SpawnConfig, spawn};
pub use crate::utils::logger::LoggerConfig;
pub use crate::utils::{CancelToken, SharedFlag, try_pin_core};
