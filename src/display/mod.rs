pub mod orientation;
pub mod surface;

pub use orientation::{display_rotation, Facing, Rotation};
pub use surface::{DisplayHint, DisplaySurface, NullSurface};
