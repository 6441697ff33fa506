//! Run view core for the remediation pipeline.
//!
//! Turns the pipeline service's run artefacts and span graphs into one
//! canonical view for presentation code:
//!
//! - [`mod@normalize`] reconciles both run payload generations into a
//!   [`shared_types::RunView`]
//! - [`trace`] builds the action/component graphs and derives token cost,
//!   duration and trace ids
//! - [`thread`] keeps the live message timeline of the selected thread
//! - [`controller`] drives run loads with last-request-wins semantics
//! - [`api`] and [`ws`] talk to the service over HTTP and WebSocket

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod normalize;
pub mod telemetry;
pub mod thread;
pub mod trace;
pub mod view;
pub mod ws;

pub use api::PipelineClient;
pub use config::ClientConfig;
pub use controller::{LoadOutcome, LoadState, Modal, RunSource, RunViewController};
pub use error::ClientError;
pub use normalize::{normalize, normalize_for};
pub use thread::{ConnectionState, FeedFrame, MessageFeed, ThreadSnapshot, ThreadStream};
pub use view::RunDisplay;
