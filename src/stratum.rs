use super::*;

// Context selectors used by the submodules.
use error::ParseSnafu;

mod authorize;
mod error;
mod extranonce;
mod job_id;
mod message;
mod notify;
mod set_difficulty;
mod submit;
mod subscribe;

pub use {
    authorize::Authorize,
    error::{InternalError, JsonRpcError, StratumError},
    extranonce::Extranonce,
    job_id::JobId,
    message::{Id, Message},
    notify::Notify,
    set_difficulty::SetDifficulty,
    submit::Submit,
    subscribe::{Subscribe, SubscribeResult},
};
