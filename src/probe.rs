//! Read-only media inspection, the lightweight counterpart of the
//! transcoding pipeline.

use log::debug;
use crate::util::*;
use crate::{averror, cstr, cstring};

#[derive(Debug)]
pub struct AFStreamInfo {
    pub media_type: Option<AFAVMediaType>,
    pub codec: String,
    pub width: usize,
    pub height: usize,
    pub frame_rate: f64,
    pub frames: i64,
    pub sample_rate: usize,
    pub channels: usize,
    pub duration: Duration,
    pub bit_rate: u64,
}

#[derive(Debug)]
pub struct AFMediaInfo {
    pub format_name: String,
    pub duration: Duration,
    pub bit_rate: u64,
    pub streams: Vec<AFStreamInfo>,
}

impl AFMediaInfo {
    pub fn stream(&self, media_type: AFAVMediaType) -> Option<&AFStreamInfo> {
        self.streams.iter().find(|s| s.media_type == Some(media_type))
    }
}

pub fn probe<T: ToString>(input_path: T) -> Result<AFMediaInfo> {
    let input_path = input_path.to_string();

    let mut format_context = AFAVInputFormatContext::default();
    let ret = unsafe { avformat_open_input(&mut format_context.0, cstring!(input_path.clone()).as_ptr(), ptr::null(), ptr::null_mut()) };
    if ret < 0 {
        return Err(AFError::new_with_string(AFErrorCode::SourceOpenFailed,
                                            format!("open input failed. path: {}, error: {}", input_path, averror!(ret))).into());
    }
    let ret = unsafe { avformat_find_stream_info(format_context.get(), ptr::null_mut()) };
    if ret < 0 {
        return Err(AFError::new_with_string(AFErrorCode::SourceOpenFailed,
                                            format!("find stream info failed. path: {}, error: {}", input_path, averror!(ret))).into());
    }

    let context = format_context.get();
    let mut streams = Vec::new();
    for index in 0..context.nb_streams as usize {
        let stream = unsafe { (*(context.streams.add(index))).as_ref().unwrap() };
        let par = unsafe { stream.codecpar.as_ref().unwrap() };

        let media_type = match par.codec_type {
            t if t == AVMEDIA_TYPE_VIDEO => Some(AFAVMediaType::Video),
            t if t == AVMEDIA_TYPE_AUDIO => Some(AFAVMediaType::Audio),
            _ => None,
        };
        let frame_rate = match AFAVRational::from(stream.avg_frame_rate) {
            r if r.is_zero() || r.den == 0 => 0.0,
            r => r.num as f64 / r.den as f64,
        };
        let duration = match stream.duration {
            d if d <= 0 || stream.time_base.den == 0 => Duration::ZERO,
            d => Duration::from_secs_f64(d as f64 * stream.time_base.num as f64 / stream.time_base.den as f64),
        };
        let channel_layout = AFAVChannelLayout::copy_from(&par.ch_layout)?;

        streams.push(AFStreamInfo {
            media_type,
            codec: AFAVCodecId::from(par.codec_id).to_string(),
            width: par.width.max(0) as usize,
            height: par.height.max(0) as usize,
            frame_rate,
            frames: stream.nb_frames,
            sample_rate: par.sample_rate.max(0) as usize,
            channels: channel_layout.channels(),
            duration,
            bit_rate: par.bit_rate.max(0) as u64,
        });
    }

    let info = AFMediaInfo {
        format_name: cstr!((*context.iformat).name).to_string(),
        duration: Duration::from_micros(context.duration.max(0) as u64),
        bit_rate: context.bit_rate.max(0) as u64,
        streams,
    };
    debug!("probe media. path: {}, format: {}, duration: {:?}, streams: {}", input_path, info.format_name, info.duration, info.streams.len());
    Ok(info)
}
