//! Domain layer for fragment propagation.

mod bitmap;
mod broadcast;
mod entities;
mod pool;
mod value_objects;

pub use bitmap::Bitmap;
pub use broadcast::{assign_fragment_windows, split_by_latency};
pub use entities::{FragKind, FragmentRequest, FragmentSet};
pub use pool::{DecodedQueue, FragLine, FragPool, InsertOutcome, PendingRequest};
pub use value_objects::PropagationConfig;
