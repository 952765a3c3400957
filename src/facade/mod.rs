pub mod store;

pub use store::{EntityStore, EntityStoreBuilder};
