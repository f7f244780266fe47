pub mod catalog;
pub mod cell_reader;
pub mod core;
pub mod dae;
pub mod descriptor;
pub mod execute;
pub mod fetch;
pub mod lob;
pub mod scalar_binding;
pub mod statement;

pub use cell_reader::{BoundCell, ColumnReader};
pub use core::{validate_columns, ArrayBinding, BoundArrays, ColumnArray, ColumnData};
pub use descriptor::describe_columns;
pub use execute::{execute, execute_many, transpose_rows};
pub use fetch::{choose_batch_size, fetch_all, fetch_many, fetch_one, fetch_scroll, BATCH_LADDER};
pub use lob::{read_lob, read_lob_bytes, LOB_CHUNK_SIZE};
pub use scalar_binding::{bind_parameters, BoundParameters};
pub use statement::Cursor;
