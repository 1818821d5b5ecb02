pub mod store;

pub use store::{SessionRecord, Store};
