pub mod booking;
pub mod dead_letter;
pub mod envelope;
pub mod heartbeat;
pub mod outcome;

pub use booking::*;
pub use dead_letter::*;
pub use envelope::*;
pub use heartbeat::*;
pub use outcome::*;
