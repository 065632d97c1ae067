// Tabular views derived from forecast records
pub mod pivot;
pub mod weeks;

pub use pivot::{
    build_pivot, CollisionPolicy, Pivot, PivotOptions, PivotPage, PivotRow, DEFAULT_WINDOW_WEEKS,
    UNKNOWN_BRICK,
};
pub use weeks::{week_window, WeekDescriptor, WeekId, MAX_WINDOW_WEEKS};
