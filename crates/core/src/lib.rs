//! # geotrace-core
//!
//! A synthetic walking trace: a random walk over geographic coordinates,
//! ticked on a fixed period and fanned out to any number of live
//! subscribers plus one durable sink.

pub mod broadcast;
pub mod geodesy;
pub mod sink;
pub mod walker;

pub use api_types::{GeoPosition, GeoSample, TraceStats};
pub use broadcast::{
    BroadcastHub, BroadcastSettings, StreamBroadcaster, Subscription, SubscriptionId,
};
pub use sink::{MemorySink, SampleSink, SinkError, SqliteSink};
pub use walker::{PositionWalker, RandomSteps, ScriptedSteps, StepSource};
