//! MySQL wire primitives: frames, length-encoded values, C strings and
//! capability flags. Nothing in here touches a socket beyond a single frame.

pub mod capabilities;
pub mod frame;
pub mod lenenc;
pub mod read_cstr;

pub use capabilities::CapabilityFlags;
pub use frame::{Frame, FramingError, frame, put_frame, read_frame, write_frame};
pub use lenenc::{put_lenenc_bytes, put_lenenc_int, read_lenenc_int};
pub use read_cstr::{read_cstr, read_cstr_bytes};
