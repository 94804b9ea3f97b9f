//! Capability traits for external collaborators

mod audit;
mod directory;
mod sfu;

pub use audit::{AuditEvent, AuditRecord, AuditSink};
pub use directory::{Directory, DirectoryUser};
pub use sfu::{Sfu, SfuConsumer, SfuProducer, SfuTransport, TransportOptions, TransportParameters};
