pub mod filter_store;

pub use filter_store::{FilterStore, FilterView};
