pub mod rtvi_error;

pub use rtvi_error::{RtviError, RtviResult};
