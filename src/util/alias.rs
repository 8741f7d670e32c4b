use std::collections::HashMap;
use std::ffi::{c_char, c_int};
use std::fmt;
use std::fmt::Formatter;
use std::ptr;
use anyhow::{anyhow, Result};
use rusty_ffmpeg::ffi::*;
use crate::{averror, cstring};

// AFAVInputFormatContext
pub struct AFAVInputFormatContext(pub *mut AVFormatContext);

impl Default for AFAVInputFormatContext {
    fn default() -> Self {
        AFAVInputFormatContext(ptr::null_mut())
    }
}

impl Drop for AFAVInputFormatContext {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { avformat_close_input(&mut self.0); }
        }
    }
}

impl AFAVInputFormatContext {
    pub fn get(&self) -> &mut AVFormatContext {
        unsafe { self.0.as_mut().unwrap() }
    }
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

// AFAVOutputFormatContext
#[derive(Debug)]
pub struct AFAVOutputFormatContext(pub *mut AVFormatContext);

impl Default for AFAVOutputFormatContext {
    fn default() -> Self {
        AFAVOutputFormatContext(ptr::null_mut())
    }
}

impl Drop for AFAVOutputFormatContext {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe {
                let format_context = self.0.as_mut().unwrap();
                if !format_context.pb.is_null() && !format_context.oformat.is_null()
                    && (*format_context.oformat).flags & AVFMT_NOFILE as c_int == 0 {
                    avio_closep(&mut format_context.pb);
                }
                avformat_free_context(self.0);
            }
        }
    }
}

impl AFAVOutputFormatContext {
    pub fn get(&self) -> &mut AVFormatContext {
        unsafe { self.0.as_mut().unwrap() }
    }
    pub fn set(&mut self, format_context: *mut AVFormatContext) {
        assert!(self.0.is_null());
        self.0 = format_context;
    }
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

// AFAVCodecContext
#[derive(Debug)]
pub struct AFAVCodecContext(pub *mut AVCodecContext);

impl Default for AFAVCodecContext {
    fn default() -> Self {
        AFAVCodecContext(ptr::null_mut())
    }
}

impl Drop for AFAVCodecContext {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { avcodec_free_context(&mut self.0); }
        }
    }
}

impl AFAVCodecContext {
    pub fn new(codec: *const AVCodec) -> Self {
        assert!(!codec.is_null());
        AFAVCodecContext(unsafe { avcodec_alloc_context3(codec) })
    }
    pub fn get(&self) -> &mut AVCodecContext {
        unsafe { self.0.as_mut().unwrap() }
    }
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

// AFAVFrame
pub struct AFAVFrame(pub *mut AVFrame);

impl Drop for AFAVFrame {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { av_frame_free(&mut self.0); }
        }
    }
}

impl AFAVFrame {
    pub fn new() -> Self {
        let frame = unsafe { av_frame_alloc() };
        assert!(!frame.is_null());
        AFAVFrame(frame)
    }
    pub fn get(&self) -> &mut AVFrame {
        unsafe { self.0.as_mut().unwrap() }
    }
    pub fn is_empty(&self) -> bool {
        let frame = self.get();
        frame.width == 0 && frame.nb_samples == 0
    }
    // shares the underlying data buffers by reference, copies all properties
    pub fn duplicate(&self) -> Result<AFAVFrame> {
        let frame = unsafe { av_frame_clone(self.0) };
        if frame.is_null() {
            return Err(anyhow!("clone frame failed"));
        }
        Ok(AFAVFrame(frame))
    }
}

impl fmt::Display for AFAVFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let frame = self.get();
        write!(f, "pts: {}, width: {}, height: {}, nb_samples: {}", frame.pts, frame.width, frame.height, frame.nb_samples)
    }
}

// AFAVPacket
#[derive(Debug)]
pub struct AFAVPacket(pub *mut AVPacket);

impl Drop for AFAVPacket {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { av_packet_free(&mut self.0); }
        }
    }
}

impl AFAVPacket {
    pub fn new() -> Self {
        let packet = unsafe { av_packet_alloc() };
        assert!(!packet.is_null());
        AFAVPacket(packet)
    }
    pub fn get(&self) -> &mut AVPacket {
        unsafe { self.0.as_mut().unwrap() }
    }
    pub fn unref(&self) {
        unsafe { av_packet_unref(self.0) };
    }
    pub fn is_valid(&self) -> bool {
        !self.0.is_null() && self.get().size >= 0
    }
}

impl fmt::Display for AFAVPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let packet = self.get();
        write!(f, "pts: {}, dts: {}, duration: {}, stream_index: {}", packet.pts, packet.dts, packet.duration, packet.stream_index)
    }
}

// AFAVDictionary
pub struct AFAVDictionary(pub *mut AVDictionary);

impl Default for AFAVDictionary {
    fn default() -> Self {
        AFAVDictionary(ptr::null_mut())
    }
}

impl Drop for AFAVDictionary {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { av_dict_free(&mut self.0); }
        }
    }
}

impl AFAVDictionary {
    pub fn new<T: ToString>(values: &HashMap<T, T>) -> Self {
        let mut dict: *mut AVDictionary = ptr::null_mut();
        unsafe {
            for (key, value) in values {
                av_dict_set(&mut dict, cstring!(key.to_string()).as_ptr(), cstring!(value.to_string()).as_ptr(), 0);
            }
        }
        AFAVDictionary(dict)
    }
    pub fn as_mut_ptr(&mut self) -> *mut *mut AVDictionary {
        &mut self.0
    }
}

// AFAVFilterGraph
pub struct AFAVFilterGraph(pub *mut AVFilterGraph);

impl Default for AFAVFilterGraph {
    fn default() -> Self {
        AFAVFilterGraph(ptr::null_mut())
    }
}

impl Drop for AFAVFilterGraph {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { avfilter_graph_free(&mut self.0); }
        }
    }
}

impl AFAVFilterGraph {
    pub fn new() -> Self {
        let graph = unsafe { avfilter_graph_alloc() };
        assert!(!graph.is_null());
        AFAVFilterGraph(graph)
    }
    pub fn get(&self) -> *mut AVFilterGraph {
        self.0
    }
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

// AFAVFilter, resolved from the registry by name
#[derive(Clone, Copy)]
pub struct AFAVFilter(pub *const AVFilter);

impl Default for AFAVFilter {
    fn default() -> Self {
        AFAVFilter(ptr::null())
    }
}

impl AFAVFilter {
    pub fn as_ptr(&self) -> *const AVFilter {
        self.0
    }
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl From<*const AVFilter> for AFAVFilter {
    fn from(value: *const AVFilter) -> Self {
        AFAVFilter(value)
    }
}

// AFAVFilterContext, owned by its graph
#[derive(Clone, Copy)]
pub struct AFAVFilterContext(pub *mut AVFilterContext);

impl Default for AFAVFilterContext {
    fn default() -> Self {
        AFAVFilterContext(ptr::null_mut())
    }
}

impl AFAVFilterContext {
    pub fn get(&self) -> *mut AVFilterContext {
        self.0
    }
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl From<*mut AVFilterContext> for AFAVFilterContext {
    fn from(value: *mut AVFilterContext) -> Self {
        AFAVFilterContext(value)
    }
}

// AFAVRational
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AFAVRational {
    pub num: i32,
    pub den: i32,
}

impl Default for AFAVRational {
    fn default() -> Self {
        AFAVRational { num: 0, den: 1 }
    }
}

impl From<AVRational> for AFAVRational {
    fn from(value: AVRational) -> Self {
        AFAVRational { num: value.num, den: value.den }
    }
}

impl AFAVRational {
    pub fn from_fps(fps: usize) -> Self {
        AFAVRational { num: fps as i32, den: 1 }
    }
    pub fn get(&self) -> AVRational {
        AVRational { num: self.num, den: self.den }
    }
    pub fn invert(&self) -> AFAVRational {
        AFAVRational { num: self.den, den: self.num }
    }
    pub fn is_zero(&self) -> bool {
        self.num == 0
    }
}

impl fmt::Display for AFAVRational {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// AFAVMediaType
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, strum_macros::Display)]
pub enum AFAVMediaType {
    #[strum(serialize = "video")]
    Video,
    #[strum(serialize = "audio")]
    Audio,
}

impl AFAVMediaType {
    pub fn get(&self) -> AVMediaType {
        match self {
            AFAVMediaType::Video => AVMEDIA_TYPE_VIDEO,
            AFAVMediaType::Audio => AVMEDIA_TYPE_AUDIO,
        }
    }
}

// AFAVCodecId
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AFAVCodecId(pub AVCodecID);

impl Default for AFAVCodecId {
    fn default() -> Self {
        AFAVCodecId(AV_CODEC_ID_NONE)
    }
}

impl From<AVCodecID> for AFAVCodecId {
    fn from(value: AVCodecID) -> Self {
        AFAVCodecId(value)
    }
}

impl AFAVCodecId {
    pub fn get(&self) -> AVCodecID {
        self.0
    }
    pub fn is_none(&self) -> bool {
        self.0 == AV_CODEC_ID_NONE
    }
}

impl fmt::Display for AFAVCodecId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = unsafe { avcodec_get_name(self.0) };
        if name.is_null() {
            write!(f, "none")
        } else {
            write!(f, "{}", unsafe { std::ffi::CStr::from_ptr(name).to_string_lossy() })
        }
    }
}

// AFAVPixelFormat
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AFAVPixelFormat(pub AVPixelFormat);

impl From<AVPixelFormat> for AFAVPixelFormat {
    fn from(value: AVPixelFormat) -> Self {
        AFAVPixelFormat(value)
    }
}

impl AFAVPixelFormat {
    pub fn get(&self) -> AVPixelFormat {
        self.0
    }
}

impl fmt::Display for AFAVPixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = unsafe { av_get_pix_fmt_name(self.0) };
        if name.is_null() {
            write!(f, "none")
        } else {
            write!(f, "{}", unsafe { std::ffi::CStr::from_ptr(name).to_string_lossy() })
        }
    }
}

// AFAVSampleFormat
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AFAVSampleFormat(pub AVSampleFormat);

impl From<AVSampleFormat> for AFAVSampleFormat {
    fn from(value: AVSampleFormat) -> Self {
        AFAVSampleFormat(value)
    }
}

impl AFAVSampleFormat {
    pub fn get(&self) -> AVSampleFormat {
        self.0
    }
}

impl fmt::Display for AFAVSampleFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = unsafe { av_get_sample_fmt_name(self.0) };
        if name.is_null() {
            write!(f, "none")
        } else {
            write!(f, "{}", unsafe { std::ffi::CStr::from_ptr(name).to_string_lossy() })
        }
    }
}

// AFAVChannelLayout
pub struct AFAVChannelLayout(pub AVChannelLayout);

impl Drop for AFAVChannelLayout {
    fn drop(&mut self) {
        unsafe { av_channel_layout_uninit(&mut self.0) };
    }
}

impl AFAVChannelLayout {
    pub fn from_channels(channels: usize) -> Self {
        let mut layout: AVChannelLayout = unsafe { std::mem::zeroed() };
        unsafe { av_channel_layout_default(&mut layout, channels as c_int) };
        AFAVChannelLayout(layout)
    }
    pub fn copy_from(source: &AVChannelLayout) -> Result<Self> {
        let mut layout: AVChannelLayout = unsafe { std::mem::zeroed() };
        let ret = unsafe { av_channel_layout_copy(&mut layout, source) };
        if ret < 0 {
            return Err(anyhow!("copy channel layout failed. error: {}", averror!(ret)));
        }
        Ok(AFAVChannelLayout(layout))
    }
    pub fn get(&self) -> &AVChannelLayout {
        &self.0
    }
    pub fn channels(&self) -> usize {
        self.0.nb_channels as usize
    }
    pub fn describe(&self) -> String {
        let mut buffer = [0 as c_char; 128];
        let ret = unsafe { av_channel_layout_describe(&self.0, buffer.as_mut_ptr(), buffer.len()) };
        if ret < 0 {
            return String::from("unknown");
        }
        unsafe { std::ffi::CStr::from_ptr(buffer.as_ptr()).to_string_lossy().to_string() }
    }
    pub fn duplicate(&self) -> Result<Self> {
        AFAVChannelLayout::copy_from(&self.0)
    }
}

impl fmt::Display for AFAVChannelLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_display_and_invert() {
        let rate = AFAVRational::from_fps(25);
        assert_eq!(rate.to_string(), "25/1");
        assert_eq!(rate.invert().to_string(), "1/25");
        assert!(!rate.is_zero());
        assert!(AFAVRational::default().is_zero());
    }

    #[test]
    fn media_type_display() {
        assert_eq!(AFAVMediaType::Video.to_string(), "video");
        assert_eq!(AFAVMediaType::Audio.to_string(), "audio");
        assert_ne!(AFAVMediaType::Video.get(), AFAVMediaType::Audio.get());
    }

    #[test]
    fn channel_layout_default() {
        let layout = AFAVChannelLayout::from_channels(2);
        assert_eq!(layout.channels(), 2);
        assert_eq!(layout.describe(), "stereo");
    }
}
