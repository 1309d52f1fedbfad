pub mod conversion;
pub mod definition;
pub mod graph;
pub mod version;

pub use conversion::*;
pub use definition::*;
pub use graph::*;
pub use version::*;
