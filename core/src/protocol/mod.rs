//! Wire protocol shared by the relay, the agent, and client adapters.
//!
//! Every transport message carries exactly one JSON [`Envelope`]. The
//! envelope body is adjacently tagged: the `type` field selects the payload
//! variant and the `payload` field carries its data.

pub mod codes;
mod envelope;

pub use envelope::{
    AuthPayload, Body, CommandPayload, Envelope, ErrorPayload, OutputPayload, Role, StatusKind,
    StatusPayload,
};
