pub mod gatekeep;
pub mod rpc_guard;

pub use gatekeep::{gatekeep, Gatekeeper, OPERATION_ID_HEADER, TOKEN_HEADER};
pub use rpc_guard::{check_secret, rpc_guard, SECRET_HEADER};
