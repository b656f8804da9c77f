mod paths;
mod target;

pub use paths::{AppPaths, AppPathsError};
pub use target::TargetPlatform;
