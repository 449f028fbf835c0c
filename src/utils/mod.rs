pub mod clock;
#[allow(clippy::module_inception)]
pub mod utils;
