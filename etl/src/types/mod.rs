//! Value, row and change types flowing from the source to the sink.

mod attribute;
mod modification;
mod row;
mod value;

pub use attribute::*;
pub use modification::*;
pub use row::*;
pub use value::*;
