// Filter state and client-side search composition
pub mod filter;
pub mod search;

pub use filter::{ChunkedFilterRequest, DateRange, FilterState, QuantityRange};
pub use search::{RecordPredicate, SearchField, SearchFields};
