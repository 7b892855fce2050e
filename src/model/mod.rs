//! Data model: batches, requests, wire descriptors, and the entity facade.

pub mod batch;
pub mod descriptor;
pub mod entity;
pub mod request;

pub use batch::{Batch, BatchResult, SharedRequest};
pub use descriptor::{
    CallFlags, CallTarget, CsomOperation, Protocol, ProtocolFamily, WireCallDescriptor,
};
pub use entity::{
    DescriptorRegistry, Entity, EntityCollection, EntityDescriptor, EntityHandle, FieldDescriptor,
};
pub use request::{BatchRequest, HttpMethod, ResponseData, ResultCallback};
