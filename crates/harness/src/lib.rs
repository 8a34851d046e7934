pub mod grid;
pub mod remote;

pub use grid::TestGrid;
pub use remote::{Call, LocalRemote, remote_error};
