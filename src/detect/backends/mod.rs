pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubBackendFactory, StubPlateDetector, StubPlateReader};

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackendFactory, TractModelSettings};
