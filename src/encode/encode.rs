use crate::encode::*;
use crate::filter::graph::AFSinkConstraint;
use crate::filter::graph_source::AFGraphSourceAttribute;

const WARN_QUEUE_LIMIT: usize = 500;

#[derive(Debug)]
pub struct AFEncode {
    media_type: AFAVMediaType,
    parameter: AFEncodeParameter,
    codec: *const AVCodec,
    codec_context: AFAVCodecContext,

    // state
    end_of_file: bool,
    flushed: bool,
    status: AFCodecStatus,
    packets: VecDeque<AFAVPacket>,
}

pub struct AFEncodeIterator<'a> {
    encode: &'a mut AFEncode,
}

impl<'a> Iterator for AFEncodeIterator<'a> {
    type Item = Result<AFAVPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        let encode = &mut self.encode;

        if let Err(err) = encode.stream_from_encode() {
            return Some(Err(err));
        }
        encode.packets.pop_front().map(Ok)
    }
}

impl AFEncode {
    pub fn new(parameter: AFEncodeParameter, fallback_codec_id: AFAVCodecId) -> Result<Self> {
        let media_type = parameter.media_type();
        let codec = match parameter.codec_name() {
            Some(codec_name) => {
                let codec = unsafe { avcodec_find_encoder_by_name(cstring!(codec_name.clone()).as_ptr()) };
                if codec.is_null() {
                    return Err(AFError::new_with_string(AFErrorCode::ConfigurationInvalid,
                                                        format!("encoder not found. codec: {}", codec_name)).into());
                }
                codec
            }
            None => {
                if fallback_codec_id.is_none() {
                    return Err(AFError::new_with_string(AFErrorCode::ConfigurationInvalid,
                                                        format!("no default encoder for media type. media_type: {}", media_type)).into());
                }
                let codec = unsafe { avcodec_find_encoder(fallback_codec_id.get()) };
                if codec.is_null() {
                    return Err(AFError::new_with_string(AFErrorCode::ConfigurationInvalid,
                                                        format!("encoder not found. codec: {}", fallback_codec_id)).into());
                }
                codec
            }
        };
        debug!("resolve encoder. media_type: {}, codec: {}", media_type, cstr!(unsafe { (*codec).name }));

        Ok(AFEncode {
            media_type,
            parameter,
            codec,
            codec_context: AFAVCodecContext::new(codec),
            end_of_file: false,
            flushed: false,
            status: AFCodecStatus::Opened,
            packets: VecDeque::new(),
        })
    }

    // formats required on the filter sink so the encoder accepts its output
    pub fn sink_constraint(&self) -> AFSinkConstraint {
        assert!(!self.codec.is_null());
        match self.media_type {
            AFAVMediaType::Video => {
                let mut pix_fmts = Vec::new();
                unsafe {
                    let mut list = (*self.codec).pix_fmts;
                    while !list.is_null() && *list != AV_PIX_FMT_NONE {
                        pix_fmts.push(*list);
                        list = list.add(1);
                    }
                }
                AFSinkConstraint::Video { pix_fmts }
            }
            AFAVMediaType::Audio => {
                let mut sample_fmts = Vec::new();
                unsafe {
                    let mut list = (*self.codec).sample_fmts;
                    while !list.is_null() && *list != AV_SAMPLE_FMT_NONE {
                        sample_fmts.push(*list);
                        list = list.add(1);
                    }
                }
                let mut sample_rates = Vec::new();
                if let AFEncodeParameter::Audio { sample_rate: Some(rate), .. } = &self.parameter {
                    sample_rates.push(*rate as c_int);
                } else {
                    unsafe {
                        let mut list = (*self.codec).supported_samplerates;
                        while !list.is_null() && *list != 0 {
                            sample_rates.push(*list);
                            list = list.add(1);
                        }
                    }
                }
                let channel_layouts = match &self.parameter {
                    AFEncodeParameter::Audio { channels: Some(channels), .. } => {
                        Some(AFAVChannelLayout::from_channels(*channels).describe())
                    }
                    _ => None,
                };
                AFSinkConstraint::Audio { sample_fmts, sample_rates, channel_layouts }
            }
        }
    }

    pub fn enable_global_header(&mut self) {
        assert_eq!(self.status, AFCodecStatus::Opened);
        self.codec_context.get().flags |= AV_CODEC_FLAG_GLOBAL_HEADER as c_int;
    }

    // configure from the filtered stream attributes and open the codec
    pub fn open_with(&mut self, attribute: &AFGraphSourceAttribute) -> Result<()> {
        assert_eq!(self.status, AFCodecStatus::Opened);
        let codec_context = self.codec_context.get();

        match (&self.parameter, attribute) {
            (AFEncodeParameter::Video { frame_rate, gop_size, max_b_frames, crf, preset, .. },
                AFGraphSourceAttribute::Video { width, height, pix_fmt, pixel_aspect, .. }) => {
                codec_context.width = *width as c_int;
                codec_context.height = *height as c_int;
                codec_context.pix_fmt = pix_fmt.get();
                codec_context.sample_aspect_ratio = pixel_aspect.get();
                codec_context.framerate = frame_rate.get();
                codec_context.time_base = frame_rate.invert().get();
                codec_context.gop_size = *gop_size as c_int;
                codec_context.max_b_frames = *max_b_frames as c_int;

                let codec_name = cstr!(unsafe { (*self.codec).name });
                if codec_name.eq("libx264") || codec_name.eq("libx265") {
                    unsafe {
                        av_opt_set(codec_context.priv_data, cstring!("preset").as_ptr(), cstring!(preset.to_string()).as_ptr(), AV_OPT_SEARCH_CHILDREN as c_int);
                        if *crf != 0 {
                            av_opt_set(codec_context.priv_data, cstring!("crf").as_ptr(), cstring!(crf.to_string()).as_ptr(), AV_OPT_SEARCH_CHILDREN as c_int);
                        }
                    }
                }
            }
            (AFEncodeParameter::Audio { bit_rate, .. },
                AFGraphSourceAttribute::Audio { sample_rate, sample_fmt, channel_layout, .. }) => {
                codec_context.sample_rate = *sample_rate as c_int;
                codec_context.sample_fmt = sample_fmt.get();
                codec_context.time_base = AVRational { num: 1, den: *sample_rate as c_int };
                let ret = unsafe { av_channel_layout_from_string(&mut codec_context.ch_layout, cstring!(channel_layout.clone()).as_ptr()) };
                if ret < 0 {
                    return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                        format!("parse channel layout failed. layout: {}", channel_layout)).into());
                }
                if let Some(bit_rate) = bit_rate {
                    codec_context.bit_rate = *bit_rate as i64;
                }
            }
            _ => {
                return Err(AFError::new_with_string(AFErrorCode::ConfigurationInvalid,
                                                    format!("attribute media type mismatch. media_type: {}", self.media_type)).into());
            }
        }

        let ret = unsafe { avcodec_open2(codec_context, self.codec, ptr::null_mut()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("open encoder failed. media_type: {}, error: {}", self.media_type, averror!(ret))).into());
        }
        info!("open encoder. media_type: {}, codec: {}", self.media_type, cstr!(unsafe { (*self.codec).name }));

        self.status = AFCodecStatus::Started;
        Ok(())
    }

    pub fn stream_to_encode(&mut self, frame: AFAVFrame) -> Result<()> {
        assert!(!frame.is_empty());
        assert_eq!(self.status, AFCodecStatus::Started);
        assert!(!self.flushed);

        let ret = unsafe { avcodec_send_frame(self.codec_context.get(), frame.get()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("send frame failed. media_type: {}, error: {}", self.media_type, averror!(ret))).into());
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        assert!(matches!(self.status, AFCodecStatus::Started | AFCodecStatus::Ended));
        if self.flushed || self.end_of_file {
            return Ok(());
        }

        let ret = unsafe { avcodec_send_frame(self.codec_context.get(), ptr::null_mut()) };
        if ret < 0 && ret != AVERROR_EOF {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("flush encoder failed. error: {}", averror!(ret))).into());
        }
        self.flushed = true;
        debug!("encoder flushed. media_type: {}", self.media_type);
        Ok(())
    }

    pub fn stream_from_encode(&mut self) -> Result<()> {
        assert!(matches!(self.status, AFCodecStatus::Started | AFCodecStatus::Ended));
        if self.end_of_file {
            return Ok(());
        }

        loop {
            let packet = AFAVPacket::new();
            let ret = unsafe { avcodec_receive_packet(self.codec_context.get(), packet.get()) };
            match ret {
                r if r >= 0 => {
                    if self.packets.len() >= WARN_QUEUE_LIMIT {
                        warn!("encode queue length overlong. size: {}, media_type: {}", self.packets.len(), self.media_type);
                    }
                    trace!("receipt packet. media_type: {}, packet: {}", self.media_type, packet);
                    assert!(packet.is_valid());
                    self.packets.push_back(packet);
                }
                r if r == AVERROR(EAGAIN) => break,
                r if r == AVERROR_EOF => {
                    self.end_of_file = true;
                    self.status = AFCodecStatus::Ended;
                    debug!("encoder end of file. media_type: {}", self.media_type);
                    break;
                }
                r => {
                    return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                        format!("receive packet failed. error: {}", averror!(r))).into());
                }
            }
        }
        Ok(())
    }

    pub fn pop_packet(&mut self) -> Option<AFAVPacket> {
        self.packets.pop_front()
    }

    pub fn get_context(&self) -> &mut AVCodecContext {
        self.codec_context.get()
    }

    pub fn get_codec(&self) -> *const AVCodec {
        self.codec
    }

    pub fn time_base(&self) -> AFAVRational {
        AFAVRational::from(self.codec_context.get().time_base)
    }

    pub fn frame_size(&self) -> usize {
        assert!(matches!(self.status, AFCodecStatus::Started | AFCodecStatus::Ended));
        let frame_size = self.codec_context.get().frame_size;
        if frame_size > 0 { frame_size as usize } else { 0 }
    }

    pub fn media_type(&self) -> AFAVMediaType {
        self.media_type
    }

    pub fn is_drained(&self) -> bool {
        self.end_of_file
    }

    pub fn get_status(&self) -> &AFCodecStatus {
        &self.status
    }
}

impl AFEncode {
    pub fn iter(&mut self) -> AFEncodeIterator {
        AFEncodeIterator {
            encode: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::graph_source::AFGraphSourceAttribute;
    use crate::util::testlab;

    #[test]
    fn unknown_encoder_reports_configuration_error() {
        initialize();
        let parameter = match AFEncodeParameter::default(&AFAVMediaType::Video) {
            AFEncodeParameter::Video { frame_rate, gop_size, max_b_frames, crf, preset, metadata, .. } => {
                AFEncodeParameter::Video {
                    codec_name: Some("definitely_not_an_encoder".to_string()),
                    frame_rate, gop_size, max_b_frames, crf, preset, metadata,
                }
            }
            _ => unreachable!(),
        };
        let err = AFEncode::new(parameter, AFAVCodecId::default()).unwrap_err();
        assert_eq!(crate::util::error::error_code_of(&err), Some(AFErrorCode::ConfigurationInvalid));
    }

    #[test]
    fn encode_video_frames_to_packets() {
        initialize();
        let parameter = AFEncodeParameter::default(&AFAVMediaType::Video);
        let mut encode = AFEncode::new(parameter, AFAVCodecId::from(AV_CODEC_ID_MPEG4)).unwrap();

        let attribute = AFGraphSourceAttribute::Video {
            width: 64,
            height: 64,
            pix_fmt: AFAVPixelFormat::from(AV_PIX_FMT_YUV420P),
            time_base: AFAVRational { num: 1, den: 25 },
            frame_rate: AFAVRational::from_fps(25),
            pixel_aspect: AFAVRational { num: 0, den: 1 },
        };
        encode.open_with(&attribute).unwrap();

        for pts in 0..5 {
            encode.stream_to_encode(testlab::yuv_frame(64, 64, pts)).unwrap();
        }
        encode.flush().unwrap();

        let mut packets = 0;
        for packet in encode.iter() {
            let packet = packet.unwrap();
            assert!(packet.get().size > 0);
            packets += 1;
        }
        assert_eq!(packets, 5);
        assert!(encode.is_drained());
    }

    #[test]
    fn audio_encoder_exposes_frame_size() {
        initialize();
        let parameter = AFEncodeParameter::default(&AFAVMediaType::Audio);
        let mut encode = AFEncode::new(parameter, AFAVCodecId::from(AV_CODEC_ID_AAC)).unwrap();

        let attribute = AFGraphSourceAttribute::Audio {
            sample_rate: 44100,
            sample_fmt: AFAVSampleFormat::from(AV_SAMPLE_FMT_FLTP),
            channel_layout: "stereo".to_string(),
            channels: 2,
            time_base: AFAVRational { num: 1, den: 44100 },
        };
        encode.open_with(&attribute).unwrap();
        assert_eq!(encode.frame_size(), 1024);
        assert_eq!(encode.time_base(), AFAVRational { num: 1, den: 44100 });
    }
}
