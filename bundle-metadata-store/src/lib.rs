mod errors;
mod lock;
mod memory_store;
mod session;
mod store;
mod watch;

pub use errors::{MetadataError, Result};
pub use lock::{LockManager, ResourceLock};
pub use memory_store::MemoryStore;
pub use session::SessionEvent;
pub use store::{MetaOptions, MetadataStorage, MetadataStore};
pub use watch::{WatchEvent, WatchStream};
