use url::Url;
use crate::decode::*;
use crate::filter::graph_source::{AFGraphSourceAttribute, AFGraphSourceRely};

pub struct AFDecodeStreamContext {
    media_type: AFAVMediaType,
    stream_index: usize,
    codec_context: AFAVCodecContext,
    time_base: AFAVRational,
    end_of_file: bool,
    finished: bool,
}

#[derive(Default)]
pub struct AFDecode {
    input_path: String,
    input_format: Option<String>,

    // formation
    format_context_options: HashMap<String, String>,
    format_context: AFAVInputFormatContext,

    // open options
    expect_stream: HashMap<AFAVMediaType, Option<usize>>,

    // media information
    format_name: String,
    start_time: Duration,
    duration: Duration,
    bit_rate: u64,
    streams: BTreeMap<usize, AFDecodeStreamContext>,

    // state
    status: AFCodecStatus,
    position: Duration,
    // packet refused by a full decoder, resent once the caller drains
    pending_packet: Option<AFAVPacket>,
}

pub struct AFDecodeIterator<'a> {
    decode: &'a mut AFDecode,
}

impl<'a> Iterator for AFDecodeIterator<'a> {
    type Item = Result<(AFAVMediaType, AFAVFrame)>;

    fn next(&mut self) -> Option<Self::Item> {
        let decode = &mut self.decode;

        loop {
            if decode.status == AFCodecStatus::Ended {
                return None;
            }
            if let Err(err) = decode.stream_to_codec() {
                return Some(Err(err));
            }
            match decode.stream_from_codec() {
                Ok(f) => match f {
                    None => continue,
                    Some(frame) => return Some(Ok(frame)),
                },
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

// true when the path points at a remote source that deserves a read timeout
fn is_network_path(path: &str) -> bool {
    match Url::parse(path) {
        Ok(url) => url.has_host() && url.scheme() != "file",
        Err(_) => false,
    }
}

impl AFDecode {
    pub fn new<T: ToString>(input_path: T) -> Self {
        let input_path = input_path.to_string();
        let mut format_context_options = HashMap::new();
        format_context_options.insert(String::from("scan_all_pmts"), String::from("1"));
        if is_network_path(&input_path) {
            format_context_options.insert(String::from("rw_timeout"), String::from("10000000"));
        }

        AFDecode {
            input_path,
            format_context_options,
            ..Default::default()
        }
    }

    // explicit demuxer, for inputs the probe can not guess on its own
    pub fn set_input_format<T: ToString>(&mut self, format_name: T) -> &mut Self {
        assert_eq!(self.status, AFCodecStatus::None);
        self.input_format = Some(format_name.to_string());
        self
    }

    pub fn set_expect_stream(&mut self, expect_streams: HashMap<AFAVMediaType, Option<usize>>) -> &mut Self {
        assert!(matches!(self.status, AFCodecStatus::None | AFCodecStatus::Opened));
        self.expect_stream = expect_streams;
        self
    }

    pub fn open(&mut self) -> Result<()> {
        assert_eq!(self.status, AFCodecStatus::None);
        assert!(self.format_context.is_null());

        let input_format = match &self.input_format {
            None => ptr::null(),
            Some(format_name) => {
                let format = unsafe { av_find_input_format(cstring!(format_name.clone()).as_ptr()) };
                if format.is_null() {
                    return Err(AFError::new_with_string(AFErrorCode::SourceOpenFailed,
                                                       format!("input format not found. format: {}", format_name)).into());
                }
                format
            }
        };

        let mut format_context: *mut AVFormatContext = ptr::null_mut();
        let filepath: CString = cstring!(self.input_path.clone());
        let mut open_options = AFAVDictionary::new(&self.format_context_options);
        let ret = unsafe { avformat_open_input(&mut format_context, filepath.as_ptr(), input_format, open_options.as_mut_ptr()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::SourceOpenFailed,
                                                format!("open input failed. path: {}, error: {}", self.input_path, averror!(ret))).into());
        }
        self.format_context.0 = format_context;

        let ret = unsafe { avformat_find_stream_info(self.format_context.get(), ptr::null_mut()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::SourceOpenFailed,
                                                format!("find stream info failed. path: {}, error: {}", self.input_path, averror!(ret))).into());
        }

        // read information
        let format_context = self.format_context.get();
        self.format_name = cstr!((*format_context.iformat).name).to_string();
        self.start_time = Duration::from_micros({
            if format_context.start_time == AV_NOPTS_VALUE { 0 } else {
                format_context.start_time as u64
            }
        });
        self.duration = Duration::from_micros({
            if format_context.duration <= 0 { 0 } else {
                format_context.duration as u64
            }
        });
        self.bit_rate = format_context.bit_rate as u64;
        self.status = AFCodecStatus::Opened;

        info!("open input success. path: {}, format_name: {}, start_time: {:?}, duration: {:?}, bit_rate: {}",
            self.input_path, self.format_name, self.start_time, self.duration, self.bit_rate);
        Ok(())
    }

    pub fn find_streams(&mut self) -> Result<()> {
        assert_eq!(self.status, AFCodecStatus::Opened);

        for (media_type, expect_index) in self.expect_stream.iter() {
            let wanted = match expect_index {
                None => -1,
                Some(index) => *index as c_int,
            };
            let ret = unsafe { av_find_best_stream(self.format_context.get(), media_type.get(), wanted, -1, ptr::null_mut(), 0) };
            if ret < 0 {
                return Err(AFError::new_with_string(AFErrorCode::NoSuitableStream,
                                                    format!("no suitable stream. path: {}, media_type: {}", self.input_path, media_type)).into());
            }
            let stream_index = ret as usize;
            let stream = unsafe { (*(self.format_context.get().streams.add(stream_index))).as_mut().unwrap() };
            self.streams.insert(stream_index, AFDecodeStreamContext {
                media_type: *media_type,
                stream_index,
                codec_context: AFAVCodecContext::default(),
                time_base: AFAVRational::from(stream.time_base),
                end_of_file: false,
                finished: false,
            });
            debug!("match stream. media_type: {}, stream_index: {}", media_type, stream_index);
        }
        Ok(())
    }

    pub fn open_codec(&mut self) -> Result<()> {
        assert_eq!(self.status, AFCodecStatus::Opened);
        assert!(!self.streams.is_empty());

        let format_context = self.format_context.get();
        for (stream_index, stream_context) in self.streams.iter_mut() {
            let stream = unsafe { (*(format_context.streams.add(*stream_index))).as_mut().unwrap() };
            let codec = unsafe { avcodec_find_decoder((*stream.codecpar).codec_id) };
            if codec.is_null() {
                return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                    format!("find decoder failed. codec: {}", AFAVCodecId::from(unsafe { (*stream.codecpar).codec_id }))).into());
            }
            let codec_context = AFAVCodecContext::new(codec);
            let ret = unsafe { avcodec_parameters_to_context(codec_context.get(), stream.codecpar) };
            if ret < 0 {
                return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                    format!("copy codec parameters failed. error: {}", averror!(ret))).into());
            }
            codec_context.get().pkt_timebase = stream.time_base;
            let ret = unsafe { avcodec_open2(codec_context.get(), codec, ptr::null_mut()) };
            if ret < 0 {
                return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                    format!("open decoder failed. media_type: {}, error: {}", stream_context.media_type, averror!(ret))).into());
            }
            stream_context.codec_context = codec_context;
            debug!("open decoder. media_type: {}, stream_index: {}", stream_context.media_type, stream_index);
        }

        self.status = AFCodecStatus::Started;
        Ok(())
    }

    // seek against the whole file, backwards to the nearest key frame
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        assert!(matches!(self.status, AFCodecStatus::Opened | AFCodecStatus::Started));

        let timestamp = (self.start_time + position).as_micros() as i64;
        let ret = unsafe { av_seek_frame(self.format_context.get(), -1, timestamp, AVSEEK_FLAG_BACKWARD as c_int) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("seek failed. position: {:?}, error: {}", position, averror!(ret))).into());
        }
        if self.status == AFCodecStatus::Started {
            for (_, stream_context) in self.streams.iter() {
                unsafe { avcodec_flush_buffers(stream_context.codec_context.get()) };
            }
        }
        Ok(())
    }

    pub fn stream_to_codec(&mut self) -> Result<()> {
        assert_eq!(self.status, AFCodecStatus::Started);
        if self.streams.values().all(|v| v.end_of_file) {
            return Ok(());
        }

        if let Some(packet) = self.pending_packet.take() {
            return self.submit_packet(packet);
        }

        let packet = AFAVPacket::new();
        loop {
            let ret = unsafe { av_read_frame(self.format_context.get(), packet.get()) };
            if ret == AVERROR_EOF {
                // switch every decoder into draining mode
                for (stream_index, stream_context) in self.streams.iter_mut() {
                    if !stream_context.end_of_file {
                        unsafe { avcodec_send_packet(stream_context.codec_context.get(), ptr::null_mut()) };
                        stream_context.end_of_file = true;
                        debug!("input end of file. stream_index: {}", stream_index);
                    }
                }
                return Ok(());
            }
            if ret < 0 {
                return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                    format!("read frame failed. error: {}", averror!(ret))).into());
            }

            if !self.streams.contains_key(&(packet.get().stream_index as usize)) {
                // not a selected stream
                packet.unref();
                continue;
            }
            return self.submit_packet(packet);
        }
    }

    // decoders stop accepting input while they hold frames. a refused
    // packet is kept aside and resent on the next call instead of erroring
    fn submit_packet(&mut self, packet: AFAVPacket) -> Result<()> {
        let stream_index = packet.get().stream_index as usize;
        let stream_context = match self.streams.get_mut(&stream_index) {
            None => return Ok(()),
            Some(stream_context) => stream_context,
        };

        if packet.get().pts != AV_NOPTS_VALUE {
            let seconds = packet.get().pts as f64 * stream_context.time_base.num as f64 / stream_context.time_base.den as f64;
            if seconds > 0.0 {
                self.position = Duration::from_secs_f64(seconds);
            }
        }
        trace!("stream to codec. packet: {}", packet);
        let ret = unsafe { avcodec_send_packet(stream_context.codec_context.get(), packet.get()) };
        if ret == AVERROR(EAGAIN) {
            self.pending_packet = Some(packet);
            return Ok(());
        }
        packet.unref();
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("send packet failed. error: {}", averror!(ret))).into());
        }
        Ok(())
    }

    pub fn stream_from_codec(&mut self) -> Result<Option<(AFAVMediaType, AFAVFrame)>> {
        assert_eq!(self.status, AFCodecStatus::Started);

        for (_, stream_context) in self.streams.iter_mut() {
            if stream_context.finished {
                continue;
            }
            let frame = AFAVFrame::new();
            let ret = unsafe { avcodec_receive_frame(stream_context.codec_context.get(), frame.get()) };
            match ret {
                r if r >= 0 => {
                    if frame.get().pts == AV_NOPTS_VALUE {
                        frame.get().pts = frame.get().best_effort_timestamp;
                    }
                    trace!("stream from codec. media_type: {}, frame: {}", stream_context.media_type, frame);
                    return Ok(Some((stream_context.media_type, frame)));
                }
                r if r == AVERROR(EAGAIN) => continue,
                r if r == AVERROR_EOF => {
                    stream_context.finished = true;
                    debug!("decoder drained. stream_index: {}", stream_context.stream_index);
                    continue;
                }
                r => {
                    return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                        format!("receive frame failed. error: {}", averror!(r))).into());
                }
            }
        }

        if self.streams.values().all(|v| v.finished) {
            self.status = AFCodecStatus::Ended;
        }
        Ok(None)
    }

    pub fn stream_time_base(&self, media_type: &AFAVMediaType) -> Option<AFAVRational> {
        self.streams.values().find(|v| &v.media_type == media_type).map(|v| v.time_base)
    }

    pub fn get_status(&self) -> &AFCodecStatus {
        &self.status
    }

    pub fn get_duration(&self) -> Duration {
        self.duration
    }

    pub fn get_position(&self) -> Duration {
        self.position
    }
}

impl AFDecode {
    pub fn iter(&mut self) -> AFDecodeIterator {
        AFDecodeIterator {
            decode: self,
        }
    }
}

impl AFGraphSourceRely for AFDecode {
    fn get_source(&self, media_type: &AFAVMediaType) -> Result<AFGraphSourceAttribute> {
        assert_eq!(self.status, AFCodecStatus::Started);
        let stream_context = match self.streams.values().find(|v| &v.media_type == media_type) {
            None => return Err(anyhow!("no opened stream for media type. media_type: {}", media_type)),
            Some(stream_context) => stream_context,
        };
        let codec_context = stream_context.codec_context.get();

        let attribute = match media_type {
            AFAVMediaType::Video => {
                let stream = unsafe { (*(self.format_context.get().streams.add(stream_context.stream_index))).as_mut().unwrap() };
                let frame_rate = AFAVRational::from(unsafe { av_guess_frame_rate(self.format_context.get(), stream, ptr::null_mut()) });
                let pixel_aspect = match AFAVRational::from(codec_context.sample_aspect_ratio) {
                    r if r.is_zero() => AFAVRational { num: 0, den: 1 },
                    r => r,
                };
                AFGraphSourceAttribute::Video {
                    width: codec_context.width as usize,
                    height: codec_context.height as usize,
                    pix_fmt: AFAVPixelFormat::from(codec_context.pix_fmt),
                    time_base: stream_context.time_base,
                    frame_rate,
                    pixel_aspect,
                }
            }
            AFAVMediaType::Audio => {
                let channel_layout = AFAVChannelLayout::copy_from(&codec_context.ch_layout)?;
                AFGraphSourceAttribute::Audio {
                    sample_rate: codec_context.sample_rate as usize,
                    sample_fmt: AFAVSampleFormat::from(codec_context.sample_fmt),
                    channel_layout: channel_layout.describe(),
                    channels: channel_layout.channels(),
                    time_base: stream_context.time_base,
                }
            }
        };
        Ok(attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testlab;

    #[test]
    fn decode_single_image() {
        initialize();
        let path = testlab::media_root().join("decode_single.png");
        testlab::write_png(&path, 64, 48).unwrap();

        let mut decode = AFDecode::new(path.to_str().unwrap());
        decode.open().unwrap();

        let mut expect_streams = HashMap::new();
        expect_streams.insert(AFAVMediaType::Video, None);
        decode.set_expect_stream(expect_streams);
        decode.find_streams().unwrap();
        decode.open_codec().unwrap();

        let mut frames = 0;
        for get_frame in decode.iter() {
            let (media_type, frame) = get_frame.unwrap();
            assert_eq!(media_type, AFAVMediaType::Video);
            assert_eq!(frame.get().width, 64);
            assert_eq!(frame.get().height, 48);
            frames += 1;
        }
        assert_eq!(frames, 1);
        assert_eq!(decode.get_status(), &AFCodecStatus::Ended);
    }

    #[test]
    fn decode_audio_source_attributes() {
        initialize();
        let path = testlab::media_root().join("decode_attrs.wav");
        testlab::write_silent_wav(&path, 1, 44100).unwrap();

        let mut decode = AFDecode::new(path.to_str().unwrap());
        decode.open().unwrap();
        let mut expect_streams = HashMap::new();
        expect_streams.insert(AFAVMediaType::Audio, None);
        decode.set_expect_stream(expect_streams);
        decode.find_streams().unwrap();
        decode.open_codec().unwrap();

        use crate::filter::graph_source::{AFGraphSourceAttribute, AFGraphSourceRely};
        match decode.get_source(&AFAVMediaType::Audio).unwrap() {
            AFGraphSourceAttribute::Audio { sample_rate, channels, .. } => {
                assert_eq!(sample_rate, 44100);
                assert_eq!(channels, 1);
            }
            _ => panic!("expected audio attributes"),
        }
    }

    #[test]
    fn repeated_sends_wait_for_draining() {
        initialize();
        let path = testlab::media_root().join("decode_backpressure.wav");
        testlab::write_silent_wav(&path, 1, 8000).unwrap();

        let mut decode = AFDecode::new(path.to_str().unwrap());
        decode.open().unwrap();
        let mut expect_streams = HashMap::new();
        expect_streams.insert(AFAVMediaType::Audio, None);
        decode.set_expect_stream(expect_streams);
        decode.find_streams().unwrap();
        decode.open_codec().unwrap();

        // feed without draining in between, decoder backpressure must
        // stash the packet rather than fail
        decode.stream_to_codec().unwrap();
        decode.stream_to_codec().unwrap();
        decode.stream_to_codec().unwrap();

        let mut samples = 0i64;
        for get_frame in decode.iter() {
            samples += get_frame.unwrap().1.get().nb_samples as i64;
        }
        assert_eq!(samples, 8000);
        assert_eq!(decode.get_status(), &AFCodecStatus::Ended);
    }

    #[test]
    fn open_missing_file_reports_source_error() {
        initialize();
        let mut decode = AFDecode::new("/nonexistent/af_missing_input.mp4");
        let err = decode.open().unwrap_err();
        assert_eq!(crate::util::error::error_code_of(&err), Some(AFErrorCode::SourceOpenFailed));
    }

    #[test]
    fn missing_stream_kind_reports_no_suitable_stream() {
        initialize();
        let path = testlab::media_root().join("decode_no_video.wav");
        testlab::write_silent_wav(&path, 1, 8000).unwrap();

        let mut decode = AFDecode::new(path.to_str().unwrap());
        decode.open().unwrap();
        let mut expect_streams = HashMap::new();
        expect_streams.insert(AFAVMediaType::Video, None);
        decode.set_expect_stream(expect_streams);
        let err = decode.find_streams().unwrap_err();
        assert_eq!(crate::util::error::error_code_of(&err), Some(AFErrorCode::NoSuitableStream));
    }
}
