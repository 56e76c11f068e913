pub mod analysis;
pub mod database_sqlx;
pub mod errors;
pub mod feature_materializer;
pub mod models;
pub mod store;
pub mod tools;

pub use errors::{Result, ShareBasisError, ValuationError};
pub use feature_materializer::{materialize_as_of, value_code, MaterializationStats};
