pub mod array_binding;

pub use array_binding::{validate_columns, ArrayBinding, BoundArrays, ColumnArray, ColumnData};
