//! Daytime load-management controller for discretionary household
//! appliances: a periodic loop that reads smoothed grid consumption and
//! nudges a set of managed devices up or down to keep net draw inside a
//! configured dead-band.

pub mod config;
pub mod device;
pub mod entities;
pub mod error;
pub mod increment;
pub mod manager;
pub mod numeric;
pub mod service;
pub mod stepping;
pub mod timer;
pub mod transition;

pub use error::{Error, Result};
pub use manager::DeviceLoadManager;
