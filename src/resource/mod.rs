use std::fmt::{Debug, Formatter};

pub mod delta;
pub mod link;
#[allow(clippy::module_inception)]
pub mod resource;
pub mod update_log;

/// Identifies a resource inside a peer. Ids are never reused, so a stale id refers to nothing
///  rather than to a different resource.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceId(pub u64);

impl Debug for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "res#{}", self.0)
    }
}
