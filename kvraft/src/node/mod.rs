//! The host-facing surface: a thin wrapper that turns the core's state
//! changes into [`Ready`] bundles for the host to persist, ship and apply.

mod raw_node;


pub use raw_node::RawNode;
pub use raw_node::Ready;
pub use raw_node::SoftState;
