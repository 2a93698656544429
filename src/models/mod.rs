pub mod enums;
pub mod patient;
pub mod prediction_log;

pub use enums::*;
pub use patient::*;
pub use prediction_log::*;
