pub use std::collections::VecDeque;
pub use std::env;
pub use log::{debug, info, trace, warn};
pub use crate::util::*;
pub use crate::util::encode_parameter::{AFEncodeParameter, AFEncodeParameterPreset};
pub use crate::init::initialize;
pub use crate::{averror, cstr, cstring};

pub mod encode;
