//! Concrete backend implementations of the connector seam.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PgConnector;
