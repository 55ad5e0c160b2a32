//! Parse and query workers for logscope
//!
//! Each worker is an actor: a tokio task owning its state, fed through a
//! single typed inbox and answering on a typed outbox. Nothing is shared
//! between workers.

mod error;
mod message;
mod parse;
mod query;

pub use error::{Result, WorkerError};
pub use message::{
    Envelope, FileData, FileSource, ParseCommand, ParseEvent, QueryCommand, QueryEvent,
};
pub use parse::ParseWorker;
pub use query::QueryWorker;
