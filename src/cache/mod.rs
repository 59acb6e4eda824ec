mod entry;
mod key;
pub mod record;
mod store;

pub use entry::{CacheEntry, unix_now, weak_validator};
pub use key::{CacheKey, InvalidKeyInput, KeyField};
pub use record::{CacheRecord, RecordError, RecordField};
pub use store::{RecordStore, StreamedRecord};
