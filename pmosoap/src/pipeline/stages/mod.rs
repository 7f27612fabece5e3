//! Étapes fournies par le runtime

mod addressing;
mod invoker;
mod logging;
mod must_understand;

pub use addressing::AddressingStage;
pub use invoker::{Invoker, InvokerStage, StatefulInvoker, StatefulInvokerStage};
pub use logging::LoggingStage;
pub use must_understand::MustUnderstandStage;

use std::fmt;

/// Côté de l'échange joué par un pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Server => f.write_str("server"),
        }
    }
}
