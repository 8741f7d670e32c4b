pub mod decode;
pub mod encode;
pub mod filter;
pub mod init;
pub mod mux;
pub mod probe;
pub mod session;
pub mod util;

#[macro_export]
macro_rules! cstring {
    ($path:expr) => {
        std::ffi::CString::new($path.clone()).unwrap_or_else(|err| {
            panic!("Failed to convert path to CString: {}", err)
        })
    };
}

#[macro_export]
macro_rules! cstr {
    ($ptr:expr) => {{
        unsafe {
            std::ffi::CStr::from_ptr($ptr).to_str().unwrap()
        }
    }};
}

#[macro_export]
macro_rules! averror {
    ($ret:expr) => {{
        let mut buffer = [0 as std::os::raw::c_char; 256];
        unsafe {
            rusty_ffmpeg::ffi::av_strerror($ret, buffer.as_mut_ptr(), buffer.len());
            std::ffi::CStr::from_ptr(buffer.as_ptr()).to_string_lossy().to_string()
        }
    }};
}
