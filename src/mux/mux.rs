use crate::mux::*;
use crate::encode::encode::AFEncode;

#[derive(Default, Eq, PartialEq, Debug)]
pub enum AFMuxStatus {
    #[default]
    Unopened,
    HeaderWritten,
    Ended,
}

#[derive(Debug)]
pub struct AFMuxStreamContext {
    media_type: AFAVMediaType,
    stream_index: usize,
    time_base: AFAVRational,
    encoder_time_base: AFAVRational,
    last_dts: Option<i64>,
    packets: usize,
}

// container writer. allocation is separated from opening so encoder
// configuration failures never leave a half written file on disk
#[derive(Default, Debug)]
pub struct AFMux {
    output_path: String,
    format_context_options: HashMap<String, String>,
    format_context: AFAVOutputFormatContext,
    metadata: BTreeMap<String, String>,
    streams: BTreeMap<AFAVMediaType, AFMuxStreamContext>,
    status: AFMuxStatus,
}

impl AFMux {
    pub fn new<T: ToString>(output_path: T, output_format: Option<T>) -> Result<Self> {
        let output_path = output_path.to_string();

        let mut format_context: *mut AVFormatContext = ptr::null_mut();
        let format_name = output_format.map(|f| f.to_string());
        let format_name_c = format_name.as_ref().map(|f| cstring!(f.clone()));
        let ret = unsafe {
            avformat_alloc_output_context2(&mut format_context,
                                           ptr::null_mut(),
                                           format_name_c.as_ref().map_or(ptr::null(), |f| f.as_ptr()),
                                           cstring!(output_path.clone()).as_ptr())
        };
        if ret < 0 || format_context.is_null() {
            return Err(AFError::new_with_string(AFErrorCode::ConfigurationInvalid,
                                                format!("guess output format failed. path: {}, error: {}", output_path, averror!(ret))).into());
        }

        let mut mux = AFMux::default();
        mux.output_path = output_path;
        mux.format_context.set(format_context);
        Ok(mux)
    }

    pub fn default_codec_id(&self, media_type: &AFAVMediaType) -> AFAVCodecId {
        let oformat = unsafe { self.format_context.get().oformat.as_ref().unwrap() };
        match media_type {
            AFAVMediaType::Video => AFAVCodecId::from(oformat.video_codec),
            AFAVMediaType::Audio => AFAVCodecId::from(oformat.audio_codec),
        }
    }

    pub fn needs_global_header(&self) -> bool {
        let oformat = unsafe { self.format_context.get().oformat.as_ref().unwrap() };
        oformat.flags & AVFMT_GLOBALHEADER as c_int != 0
    }

    pub fn set_metadata(&mut self, metadata: BTreeMap<String, String>) -> &mut Self {
        assert_eq!(self.status, AFMuxStatus::Unopened);
        self.metadata = metadata;
        self
    }

    pub fn add_stream(&mut self, encode: &AFEncode) -> Result<()> {
        assert_eq!(self.status, AFMuxStatus::Unopened);
        let media_type = encode.media_type();
        assert!(!self.streams.contains_key(&media_type));

        let stream = unsafe { avformat_new_stream(self.format_context.get(), encode.get_codec()) };
        if stream.is_null() {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("add stream failed. media_type: {}", media_type)).into());
        }
        let stream_ref = unsafe { stream.as_mut().unwrap() };

        let ret = unsafe { avcodec_parameters_from_context(stream_ref.codecpar, encode.get_context()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("copy parameters to stream failed. media_type: {}, error: {}", media_type, averror!(ret))).into());
        }
        stream_ref.time_base = encode.time_base().get();

        debug!("create stream. media_type: {}, stream_index: {}", media_type, stream_ref.index);
        self.streams.insert(media_type, AFMuxStreamContext {
            media_type,
            stream_index: stream_ref.index as usize,
            time_base: AFAVRational::from(stream_ref.time_base),
            encoder_time_base: encode.time_base(),
            last_dts: None,
            packets: 0,
        });
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        assert_eq!(self.status, AFMuxStatus::Unopened);
        assert!(!self.streams.is_empty());
        let format_context = self.format_context.get();

        if unsafe { (*format_context.oformat).flags } & AVFMT_NOFILE as c_int == 0 {
            let mut open_options = AFAVDictionary::new(&self.format_context_options);
            let ret = unsafe { avio_open2(&mut format_context.pb, cstring!(self.output_path.clone()).as_ptr(), AVIO_FLAG_WRITE as c_int, ptr::null(), open_options.as_mut_ptr()) };
            if ret < 0 {
                return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                    format!("open output failed. path: {}, error: {}", self.output_path, averror!(ret))).into());
            }
        }

        for (k, v) in self.metadata.iter() {
            unsafe { av_dict_set(&mut format_context.metadata, cstring!(k.clone()).as_ptr(), cstring!(v.clone()).as_ptr(), 0) };
        }

        let ret = unsafe { avformat_write_header(format_context, ptr::null_mut()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("write header failed. path: {}, error: {}", self.output_path, averror!(ret))).into());
        }

        // the muxer may adjust the stream time bases while writing the header
        for (_, stream_context) in self.streams.iter_mut() {
            let stream = unsafe { (*(format_context.streams.add(stream_context.stream_index))).as_mut().unwrap() };
            stream_context.time_base = AFAVRational::from(stream.time_base);
        }

        self.status = AFMuxStatus::HeaderWritten;
        info!("open output success. path: {}", self.output_path);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.status == AFMuxStatus::HeaderWritten
    }

    // rescale a fresh encoder packet onto its container stream, returning the
    // packet start and end timestamps in the stream time base
    pub fn prepare(&mut self, media_type: &AFAVMediaType, packet: &AFAVPacket) -> Result<(i64, i64, AFAVRational)> {
        assert_eq!(self.status, AFMuxStatus::HeaderWritten);
        let stream_context = match self.streams.get(media_type) {
            None => return Err(anyhow!("no stream for media type. media_type: {}", media_type)),
            Some(stream_context) => stream_context,
        };

        unsafe { av_packet_rescale_ts(packet.get(), stream_context.encoder_time_base.get(), stream_context.time_base.get()) };
        packet.get().stream_index = stream_context.stream_index as c_int;

        let pts = packet.get().pts;
        let end_pts = pts.saturating_add(packet.get().duration.max(0));
        Ok((pts, end_pts, stream_context.time_base))
    }

    pub fn write(&mut self, packet: AFAVPacket) -> Result<()> {
        assert_eq!(self.status, AFMuxStatus::HeaderWritten);
        assert!(packet.is_valid());

        let stream_index = packet.get().stream_index as usize;
        let dts = packet.get().dts;
        trace!("write packet. packet: {}", packet);
        let ret = unsafe { av_interleaved_write_frame(self.format_context.get(), packet.get()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("write packet failed. error: {}", averror!(ret))).into());
        }

        if let Some((_, stream_context)) = self.streams.iter_mut().find(|(_, v)| v.stream_index == stream_index) {
            stream_context.last_dts = Some(dts);
            stream_context.packets += 1;
        }
        Ok(())
    }

    pub fn packet_count(&self, media_type: &AFAVMediaType) -> usize {
        self.streams.get(media_type).map_or(0, |v| v.packets)
    }

    pub fn stream_time_base(&self, media_type: &AFAVMediaType) -> Option<AFAVRational> {
        self.streams.get(media_type).map(|v| v.time_base)
    }

    // safe to call more than once, later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if self.status != AFMuxStatus::HeaderWritten {
            return Ok(());
        }
        self.status = AFMuxStatus::Ended;

        let ret = unsafe { av_write_trailer(self.format_context.get()) };
        if ret < 0 {
            return Err(AFError::new_with_string(AFErrorCode::NativeOperationFailed,
                                                format!("write trailer failed. error: {}", averror!(ret))).into());
        }
        info!("close output success. path: {}", self.output_path);
        Ok(())
    }

    pub fn get_status(&self) -> &AFMuxStatus {
        &self.status
    }
}

// best effort trailer on early exits, close() already ran on the happy path
impl Drop for AFMux {
    fn drop(&mut self) {
        if self.status == AFMuxStatus::HeaderWritten {
            if let Err(err) = self.close() {
                warn!("close output on drop failed. path: {}, error: {}", self.output_path, err);
            }
        }
    }
}
