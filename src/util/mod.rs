pub use std::collections::{BTreeMap, HashMap};
pub use std::ffi::{c_char, c_int, c_uint, CStr, CString};
pub use std::ptr;
pub use std::time::Duration;
pub use anyhow::{anyhow, Result};
pub use rusty_ffmpeg::ffi::*;
pub use strum_macros::{Display, EnumString};

pub use crate::util::alias::*;
pub use crate::util::error::{AFError, AFErrorCode};
pub use crate::util::status::AFCodecStatus;

pub mod alias;
pub mod error;
pub mod status;
pub mod encode_parameter;

#[cfg(test)]
pub mod testlab;
