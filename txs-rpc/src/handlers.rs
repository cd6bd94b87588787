pub mod health_handler;
pub mod txs_handler;

pub use health_handler::health;
pub use txs_handler::{acting_user, TxsHandler, USER_HEADER};
