pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{Entity, EntityDescriptor, Member, Row, row_value};
pub use value::{DataType, Value};
