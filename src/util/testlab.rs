//! Small fixtures generated on the fly, so the tests do not depend on
//! media files shipped with the repository.

use std::fs;
use std::path::{Path, PathBuf};
use crate::util::*;
use crate::cstring;

pub fn media_root() -> PathBuf {
    let root = std::env::temp_dir().join("avforge-testlab");
    fs::create_dir_all(&root).unwrap();
    root
}

// single gray frame, encoded with the png codec and written verbatim
pub fn write_png(path: &Path, width: usize, height: usize) -> Result<()> {
    let codec = unsafe { avcodec_find_encoder_by_name(cstring!("png").as_ptr()) };
    assert!(!codec.is_null());
    let codec_context = AFAVCodecContext::new(codec);
    {
        let ctx = codec_context.get();
        ctx.width = width as c_int;
        ctx.height = height as c_int;
        ctx.pix_fmt = AV_PIX_FMT_RGB24;
        ctx.time_base = AVRational { num: 1, den: 25 };
    }
    let ret = unsafe { avcodec_open2(codec_context.get(), codec, ptr::null_mut()) };
    assert!(ret >= 0, "open png encoder failed");

    let frame = AFAVFrame::new();
    {
        let f = frame.get();
        f.width = width as c_int;
        f.height = height as c_int;
        f.format = AV_PIX_FMT_RGB24 as c_int;
        let ret = unsafe { av_frame_get_buffer(frame.get(), 0) };
        assert!(ret >= 0, "alloc frame buffer failed");
    }
    unsafe {
        let f = frame.get();
        for y in 0..height {
            let line = f.data[0].add(y * f.linesize[0] as usize);
            for x in 0..(width * 3) {
                *line.add(x) = 0x80;
            }
        }
        f.pts = 0;
    }

    let mut bytes: Vec<u8> = Vec::new();
    unsafe {
        assert!(avcodec_send_frame(codec_context.get(), frame.get()) >= 0);
        assert!(avcodec_send_frame(codec_context.get(), ptr::null_mut()) >= 0);
        loop {
            let packet = AFAVPacket::new();
            let ret = avcodec_receive_packet(codec_context.get(), packet.get());
            if ret == AVERROR_EOF || ret == AVERROR(EAGAIN) {
                break;
            }
            assert!(ret >= 0, "receive png packet failed");
            let data = std::slice::from_raw_parts(packet.get().data, packet.get().size as usize);
            bytes.extend_from_slice(data);
        }
    }
    assert!(!bytes.is_empty());
    fs::write(path, bytes)?;
    Ok(())
}

// minimal mono 16-bit RIFF file filled with silence
pub fn write_silent_wav(path: &Path, seconds: u32, sample_rate: u32) -> Result<()> {
    let samples = seconds * sample_rate;
    let data_len = samples * 2;
    let mut bytes: Vec<u8> = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // pcm
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);
    fs::write(path, bytes)?;
    Ok(())
}

pub struct AFPacketStamp {
    pub stream_index: usize,
    pub media_type: Option<AFAVMediaType>,
    pub pts: i64,
    pub end_pts: i64,
    pub time_base: AFAVRational,
}

// raw packet walk over a finished container, file order preserved
pub fn read_packet_stamps(path: &Path) -> Result<Vec<AFPacketStamp>> {
    let mut format_context = AFAVInputFormatContext::default();
    let filepath = cstring!(path.to_string_lossy().to_string());
    let ret = unsafe { avformat_open_input(&mut format_context.0, filepath.as_ptr(), ptr::null(), ptr::null_mut()) };
    assert!(ret >= 0, "open input failed");
    let ret = unsafe { avformat_find_stream_info(format_context.get(), ptr::null_mut()) };
    assert!(ret >= 0, "find stream info failed");

    let mut stamps = Vec::new();
    let packet = AFAVPacket::new();
    loop {
        let ret = unsafe { av_read_frame(format_context.get(), packet.get()) };
        if ret == AVERROR_EOF {
            break;
        }
        assert!(ret >= 0, "read frame failed");
        let stream_index = packet.get().stream_index as usize;
        let stream = unsafe { (*(format_context.get().streams.add(stream_index))).as_ref().unwrap() };
        let media_type = match unsafe { (*stream.codecpar).codec_type } {
            t if t == AVMEDIA_TYPE_VIDEO => Some(AFAVMediaType::Video),
            t if t == AVMEDIA_TYPE_AUDIO => Some(AFAVMediaType::Audio),
            _ => None,
        };
        stamps.push(AFPacketStamp {
            stream_index,
            media_type,
            pts: packet.get().pts,
            end_pts: packet.get().pts.saturating_add(packet.get().duration.max(0)),
            time_base: AFAVRational::from(stream.time_base),
        });
        packet.unref();
    }
    Ok(stamps)
}

// allocated and zero filled yuv420p frame, black with neutral chroma
pub fn yuv_frame(width: usize, height: usize, pts: i64) -> AFAVFrame {
    let frame = AFAVFrame::new();
    {
        let f = frame.get();
        f.width = width as c_int;
        f.height = height as c_int;
        f.format = AV_PIX_FMT_YUV420P as c_int;
        let ret = unsafe { av_frame_get_buffer(frame.get(), 0) };
        assert!(ret >= 0, "alloc frame buffer failed");
    }
    unsafe {
        let f = frame.get();
        for y in 0..height {
            ptr::write_bytes(f.data[0].add(y * f.linesize[0] as usize), 0x10, width);
        }
        for plane in 1..=2 {
            for y in 0..(height / 2) {
                ptr::write_bytes(f.data[plane].add(y * f.linesize[plane] as usize), 0x80, width / 2);
            }
        }
        f.pts = pts;
    }
    frame
}
