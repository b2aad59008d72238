//! Inbound binary stream handling: direct/legacy classification, the legacy
//! NAL router and the direct-mode handler.

pub mod classifier;
pub mod direct;
pub mod nal;
pub mod router;

pub use classifier::{Classified, StreamClassifier};
pub use direct::DirectHandler;
pub use router::NalRouter;
