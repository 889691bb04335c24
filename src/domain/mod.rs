//! Domain Layer
//!
//! Entities, value objects and ports of the connector domain.

pub mod entities;
pub mod metric_names;
pub mod ports;
pub mod value_objects;
