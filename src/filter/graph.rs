use crate::filter::*;
use crate::filter::filter::AFFilter;
use crate::filter::graph_source::{AFGraphSourceAttribute, AFGraphSourceRely};

#[derive(Default, Eq, PartialEq, Debug)]
pub enum AFGraphStatus {
    #[default]
    None,
    Created,
    Opened,
    Ended,
}

// format constraints applied on the sink, usually taken from the target encoder
pub enum AFSinkConstraint {
    Video {
        pix_fmts: Vec<AVPixelFormat>,
    },
    Audio {
        sample_fmts: Vec<AVSampleFormat>,
        sample_rates: Vec<c_int>,
        channel_layouts: Option<String>,
    },
}

pub struct AFGraph {
    filter_graph: AFAVFilterGraph,
    media_type: AFAVMediaType,
    source_context: AFAVFilterContext,
    sink_context: AFAVFilterContext,
    filter_description: Option<String>,
    audio_frame_size: Option<usize>,
    status: AFGraphStatus,
}

pub struct AFGraphIterator<'a> {
    graph: &'a mut AFGraph,
}

impl<'a> Iterator for AFGraphIterator<'a> {
    type Item = Result<AFAVFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let graph = &mut self.graph;

        match graph.stream_from_graph() {
            Ok(frame) => match frame {
                None => None,
                Some(f) => Some(Ok(f)),
            },
            Err(err) => Some(Err(err)),
        }
    }
}

impl AFGraph {
    pub fn new(media_type: &AFAVMediaType) -> Self {
        AFGraph {
            filter_graph: AFAVFilterGraph::new(),
            media_type: *media_type,
            source_context: Default::default(),
            sink_context: Default::default(),
            filter_description: None,
            audio_frame_size: None,
            status: Default::default(),
        }
    }

    // user supplied filter chain, inserted between the source and the sink
    pub fn set_filter_description<T: ToString>(&mut self, description: Option<T>) -> &mut Self {
        assert!(matches!(self.status, AFGraphStatus::None | AFGraphStatus::Created));
        self.filter_description = description.map(|d| d.to_string()).filter(|d| !d.trim().is_empty());
        self
    }

    pub fn injection_source(&mut self, source: &dyn AFGraphSourceRely) -> Result<()> {
        assert_eq!(self.status, AFGraphStatus::None);
        let filter = match source.get_source(&self.media_type)? {
            AFGraphSourceAttribute::Video { width, height, pix_fmt, time_base, frame_rate, pixel_aspect } => {
                assert_eq!(self.media_type, AFAVMediaType::Video);
                let mut arguments = BTreeMap::new();
                arguments.insert("width".to_string(), width.to_string());
                arguments.insert("height".to_string(), height.to_string());
                arguments.insert("pix_fmt".to_string(), pix_fmt.to_string());
                arguments.insert("time_base".to_string(), time_base.to_string());
                arguments.insert("frame_rate".to_string(), frame_rate.to_string());
                arguments.insert("pixel_aspect".to_string(), pixel_aspect.to_string());
                AFFilter::new("buffer", arguments)?
            }
            AFGraphSourceAttribute::Audio { sample_rate, sample_fmt, channel_layout, channels: _, time_base } => {
                assert_eq!(self.media_type, AFAVMediaType::Audio);
                let mut arguments = BTreeMap::new();
                arguments.insert("sample_rate".to_string(), sample_rate.to_string());
                arguments.insert("sample_fmt".to_string(), sample_fmt.to_string());
                arguments.insert("channel_layout".to_string(), channel_layout);
                arguments.insert("time_base".to_string(), time_base.to_string());
                AFFilter::new("abuffer", arguments)?
            }
        };
        self.source_context = filter.create_by_graph(&self.filter_graph)?;

        self.status = AFGraphStatus::Created;
        Ok(())
    }

    pub fn injection_sink(&mut self, constraint: Option<&AFSinkConstraint>) -> Result<()> {
        assert_eq!(self.status, AFGraphStatus::Created);
        let filter = match self.media_type {
            AFAVMediaType::Video => AFFilter::new("buffersink", BTreeMap::new())?,
            AFAVMediaType::Audio => AFFilter::new("abuffersink", BTreeMap::new())?,
        };
        self.sink_context = filter.create_by_graph(&self.filter_graph)?;

        if let Some(constraint) = constraint {
            self.apply_sink_constraint(constraint)?;
        }

        self.link()
    }

    fn apply_sink_constraint(&mut self, constraint: &AFSinkConstraint) -> Result<()> {
        assert!(!self.sink_context.is_null());
        let sink = self.sink_context.get() as *mut std::os::raw::c_void;
        unsafe {
            match constraint {
                AFSinkConstraint::Video { pix_fmts } => {
                    assert_eq!(self.media_type, AFAVMediaType::Video);
                    if !pix_fmts.is_empty() {
                        let ret = av_opt_set_bin(sink, cstring!("pix_fmts").as_ptr(),
                                                 pix_fmts.as_ptr() as *const u8,
                                                 (pix_fmts.len() * std::mem::size_of::<AVPixelFormat>()) as c_int,
                                                 AV_OPT_SEARCH_CHILDREN as c_int);
                        if ret < 0 { return Err(anyhow!("set sink pixel formats failed. error: {:?}", averror!(ret))); }
                    }
                }
                AFSinkConstraint::Audio { sample_fmts, sample_rates, channel_layouts } => {
                    assert_eq!(self.media_type, AFAVMediaType::Audio);
                    if !sample_fmts.is_empty() {
                        let ret = av_opt_set_bin(sink, cstring!("sample_fmts").as_ptr(),
                                                 sample_fmts.as_ptr() as *const u8,
                                                 (sample_fmts.len() * std::mem::size_of::<AVSampleFormat>()) as c_int,
                                                 AV_OPT_SEARCH_CHILDREN as c_int);
                        if ret < 0 { return Err(anyhow!("set sink sample formats failed. error: {:?}", averror!(ret))); }
                    }
                    if !sample_rates.is_empty() {
                        let ret = av_opt_set_bin(sink, cstring!("sample_rates").as_ptr(),
                                                 sample_rates.as_ptr() as *const u8,
                                                 (sample_rates.len() * std::mem::size_of::<c_int>()) as c_int,
                                                 AV_OPT_SEARCH_CHILDREN as c_int);
                        if ret < 0 { return Err(anyhow!("set sink sample rates failed. error: {:?}", averror!(ret))); }
                    }
                    if let Some(layouts) = channel_layouts {
                        let ret = av_opt_set(sink, cstring!("ch_layouts").as_ptr(), cstring!(layouts.clone()).as_ptr(),
                                             AV_OPT_SEARCH_CHILDREN as c_int);
                        if ret < 0 { return Err(anyhow!("set sink channel layouts failed. error: {:?}", averror!(ret))); }
                    }
                }
            }
        }
        Ok(())
    }

    fn link(&mut self) -> Result<()> {
        assert_eq!(self.status, AFGraphStatus::Created);
        assert!(!self.source_context.is_null());
        assert!(!self.sink_context.is_null());

        match self.filter_description.clone() {
            None => {
                let ret = unsafe { avfilter_link(self.source_context.get(), 0, self.sink_context.get(), 0) };
                if ret < 0 {
                    return Err(anyhow!("link source to sink failed. error: {:?}", averror!(ret)));
                }
            }
            Some(description) => {
                unsafe {
                    let mut outputs = avfilter_inout_alloc();
                    let mut inputs = avfilter_inout_alloc();
                    if outputs.is_null() || inputs.is_null() {
                        avfilter_inout_free(&mut outputs);
                        avfilter_inout_free(&mut inputs);
                        return Err(anyhow!("alloc filter inout failed"));
                    }
                    (*outputs).name = av_strdup(cstring!("in").as_ptr());
                    (*outputs).filter_ctx = self.source_context.get();
                    (*outputs).pad_idx = 0;
                    (*outputs).next = ptr::null_mut();
                    (*inputs).name = av_strdup(cstring!("out").as_ptr());
                    (*inputs).filter_ctx = self.sink_context.get();
                    (*inputs).pad_idx = 0;
                    (*inputs).next = ptr::null_mut();

                    let ret = avfilter_graph_parse_ptr(self.filter_graph.get(), cstring!(description.clone()).as_ptr(),
                                                       &mut inputs, &mut outputs, ptr::null_mut());
                    avfilter_inout_free(&mut inputs);
                    avfilter_inout_free(&mut outputs);
                    if ret < 0 {
                        return Err(anyhow!("parse filter description failed. description: {}, error: {:?}", description, averror!(ret)));
                    }
                }
            }
        }

        let ret = unsafe { avfilter_graph_config(self.filter_graph.get(), ptr::null_mut()) };
        if ret < 0 {
            return Err(anyhow!("config graph failed. error: {:?}", averror!(ret)));
        }

        self.status = AFGraphStatus::Opened;
        Ok(())
    }

    // only on audio graph
    pub fn set_frame_size(&mut self, frame_size: usize) -> Result<()> {
        assert_eq!(self.status, AFGraphStatus::Opened);
        assert_eq!(self.media_type, AFAVMediaType::Audio);
        if frame_size == 0 {
            return Ok(());
        }
        unsafe { av_buffersink_set_frame_size(self.sink_context.get(), frame_size as c_uint) };
        self.audio_frame_size = Some(frame_size);
        Ok(())
    }

    pub fn stream_to_graph(&mut self, frame: AFAVFrame) -> Result<()> {
        assert!(!frame.is_empty());
        assert_eq!(self.status, AFGraphStatus::Opened);
        trace!("stream to graph. frame pts: {}, media_type: {}", frame.get().pts, self.media_type);

        let ret = unsafe { av_buffersrc_add_frame(self.source_context.get(), frame.get()) };
        if ret < 0 {
            return Err(anyhow!("stream to graph failed. error: {:?}", averror!(ret)));
        }
        Ok(())
    }

    pub fn stream_from_graph(&mut self) -> Result<Option<AFAVFrame>> {
        assert!(matches!(self.status, AFGraphStatus::Opened | AFGraphStatus::Ended));
        if self.status == AFGraphStatus::Ended {
            return Ok(None);
        }

        let frame = AFAVFrame::new();
        let ret = unsafe { av_buffersink_get_frame(self.sink_context.get(), frame.get()) };
        match ret {
            _ if ret >= 0 => {
                trace!("stream from graph. media_type: {}, pts: {}", self.media_type, frame.get().pts);
                Ok(Some(frame))
            }
            _ if ret == AVERROR(EAGAIN) => Ok(None),
            _ if ret == AVERROR_EOF => {
                self.status = AFGraphStatus::Ended;
                Ok(None)
            }
            r => Err(anyhow!("stream from graph failed. error: {:?}", averror!(r))),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        assert_eq!(self.status, AFGraphStatus::Opened);
        let ret = unsafe { av_buffersrc_add_frame(self.source_context.get(), ptr::null_mut()) };
        if ret < 0 {
            return Err(anyhow!("flush stream to graph failed. error: {:?}", averror!(ret)));
        }
        Ok(())
    }

    pub fn sink_time_base(&self) -> AFAVRational {
        assert!(matches!(self.status, AFGraphStatus::Opened | AFGraphStatus::Ended));
        AFAVRational::from(unsafe { av_buffersink_get_time_base(self.sink_context.get()) })
    }

    pub fn get_sink_attribute(&self) -> Result<AFGraphSourceAttribute> {
        assert!(matches!(self.status, AFGraphStatus::Opened | AFGraphStatus::Ended));
        let sink = self.sink_context.get();

        let attribute = match self.media_type {
            AFAVMediaType::Video => {
                AFGraphSourceAttribute::Video {
                    width: unsafe { av_buffersink_get_w(sink) } as usize,
                    height: unsafe { av_buffersink_get_h(sink) } as usize,
                    pix_fmt: AFAVPixelFormat::from(unsafe { av_buffersink_get_format(sink) } as AVPixelFormat),
                    time_base: AFAVRational::from(unsafe { av_buffersink_get_time_base(sink) }),
                    frame_rate: AFAVRational::from(unsafe { av_buffersink_get_frame_rate(sink) }),
                    pixel_aspect: AFAVRational::from(unsafe { av_buffersink_get_sample_aspect_ratio(sink) }),
                }
            }
            AFAVMediaType::Audio => {
                let mut layout: AVChannelLayout = unsafe { std::mem::zeroed() };
                let ret = unsafe { av_buffersink_get_ch_layout(sink, &mut layout) };
                if ret < 0 {
                    return Err(anyhow!("get sink channel layout failed. error: {:?}", averror!(ret)));
                }
                let channel_layout = AFAVChannelLayout(layout);
                AFGraphSourceAttribute::Audio {
                    sample_rate: unsafe { av_buffersink_get_sample_rate(sink) } as usize,
                    sample_fmt: AFAVSampleFormat::from(unsafe { av_buffersink_get_format(sink) } as AVSampleFormat),
                    channels: channel_layout.channels(),
                    channel_layout: channel_layout.describe(),
                    time_base: AFAVRational::from(unsafe { av_buffersink_get_time_base(sink) }),
                }
            }
        };
        Ok(attribute)
    }

    pub fn get_status(&self) -> &AFGraphStatus {
        &self.status
    }
}

impl AFGraph {
    pub fn iter(&mut self) -> AFGraphIterator {
        AFGraphIterator {
            graph: self,
        }
    }

    // one-shot helper, runs a lone video frame through a filter expression
    // using a throwaway graph described by the frame itself
    pub fn transform_single(frame: AFAVFrame, description: &str) -> Result<Vec<AFAVFrame>> {
        let attribute = {
            let raw = frame.get();
            if raw.width <= 0 || raw.height <= 0 {
                return Err(anyhow!("transform requires a video frame"));
            }
            AFGraphSourceAttribute::Video {
                width: raw.width as usize,
                height: raw.height as usize,
                pix_fmt: AFAVPixelFormat::from(raw.format as AVPixelFormat),
                time_base: AFAVRational { num: 1, den: 25 },
                frame_rate: AFAVRational::from_fps(25),
                pixel_aspect: AFAVRational { num: 0, den: 1 },
            }
        };

        let mut graph = AFGraph::new(&AFAVMediaType::Video);
        graph.set_filter_description(Some(description));
        graph.injection_source(&attribute)?;
        graph.injection_sink(None)?;

        graph.stream_to_graph(frame)?;
        graph.flush()?;
        let mut frames = Vec::new();
        while let Some(filtered) = graph.stream_from_graph()? {
            frames.push(filtered);
        }
        Ok(frames)
    }
}
