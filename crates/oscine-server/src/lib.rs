//! oscine server
//!
//! Everything between a socket and user callbacks:
//! - [`Dispatcher`]: maps address patterns to handlers
//! - [`Pipeline`]: decodes one packet, dispatches it and sends replies
//! - [`Executor`]: where packets run (sequential, worker pool, isolated
//!   processes, or a cooperative event loop)
//! - [`Server`]: UDP and stream accept loops with graceful shutdown
//! - [`DispatchClient`]: a TCP client that feeds server packets to a dispatcher

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod executor;
mod isolate;
pub mod pipeline;
pub mod server;

pub use client::DispatchClient;
pub use dispatcher::{
    AsyncHandler, Dispatcher, Handle, Handler, HandlerFuture, Routed, WithPeer,
};
pub use error::{DispatchError, Result, ServerError};
pub use executor::{
    executor_for, CooperativeExecutor, Executor, IsolatedExecutor, Policy, SequentialExecutor,
    WorkerExecutor,
};
pub use pipeline::{HandlerErrorPolicy, Job, Pipeline};
pub use server::{Server, ServerConfig};
