//! Slave (server) side: a user-owned data map and the dispatcher that
//! answers queries against it.

mod data_map;
mod dispatcher;

pub use data_map::{DataMap, MAX_REPORT_SLAVE_ID_LEN};
pub use dispatcher::{manage, BROADCAST_ADDRESS};
