pub use std::collections::VecDeque;
pub use std::env;
pub use std::sync::Arc;
pub use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
pub use log::{debug, info, trace, warn};
pub use crate::util::*;
pub use crate::util::encode_parameter::{AFEncodeParameter, AFEncodeParameterPreset};
pub use crate::decode::decode::AFDecode;
pub use crate::encode::encode::AFEncode;
pub use crate::filter::graph::{AFGraph, AFGraphStatus};
pub use crate::mux::mux::AFMux;
pub use crate::init::initialize;
pub use crate::{averror, cstr, cstring};

pub mod session;
pub mod sync;
