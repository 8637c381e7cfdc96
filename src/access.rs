//! Access layer: typed values, schemas, tuples, and heap files.

pub mod heap;
pub mod schema;
pub mod tuple;
pub mod value;

pub use heap::{HeapFile, TableScan};
pub use schema::{Field, Schema};
pub use tuple::{Tuple, TupleId};
pub use value::{DataType, Value, TEXT_MAX_LEN};
