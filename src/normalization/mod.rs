pub mod fields;
pub mod scalars;

pub use fields::normalize_multi;
