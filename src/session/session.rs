use std::str::FromStr;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use crate::session::*;
use crate::session::sync::{AFAudioLane, AFSyncMode};

static ACTIVE_SESSIONS: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));

pub fn active_sessions() -> usize {
    ACTIVE_SESSIONS.load(Ordering::Relaxed)
}

struct AFSessionGuard;

impl AFSessionGuard {
    fn new() -> Self {
        ACTIVE_SESSIONS.fetch_add(1, Ordering::Relaxed);
        AFSessionGuard
    }
}

impl Drop for AFSessionGuard {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AFSessionOptions {
    pub output_format: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_filter: Option<String>,
    pub audio_filter: Option<String>,
    pub frame_rate: Option<f64>,
    pub crf: Option<u16>,
    pub preset: Option<String>,
    pub audio_channels: Option<usize>,
    pub audio_sample_rate: Option<usize>,
    pub audio_bit_rate: Option<usize>,
    pub start_time: Option<f64>,
    pub max_duration: Option<f64>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct AFSessionReport {
    pub video_frames: usize,
    pub video_packets: usize,
    pub audio_packets: usize,
    pub incomplete: bool,
}

// the video side of a session, driven directly by the transcode loop
struct AFVideoLane {
    graph: AFGraph,
    encode: AFEncode,
    source_time_base: AFAVRational,
    count: i64,
    // clone of the frame most recently pushed into the graph
    last_source: Option<AFAVFrame>,
    // filtered frames at or past this source timestamp are dropped
    cutoff: Option<(i64, AFAVRational)>,
}

impl AFVideoLane {
    fn handle_source_frame(&mut self, frame: AFAVFrame, mux: &mut AFMux, audio: &mut Option<AFAudioLane>, cancel: &AtomicBool) -> Result<()> {
        self.last_source = Some(frame.duplicate()?);
        self.graph.stream_to_graph(frame)?;
        self.drain_graph(mux, audio, cancel)
    }

    fn drain_graph(&mut self, mux: &mut AFMux, audio: &mut Option<AFAudioLane>, cancel: &AtomicBool) -> Result<()> {
        while let Some(frame) = self.graph.stream_from_graph()? {
            if let Some((cutoff_pts, cutoff_tb)) = self.cutoff {
                let sink_time_base = self.graph.sink_time_base();
                if unsafe { av_compare_ts(frame.get().pts, sink_time_base.get(), cutoff_pts, cutoff_tb.get()) } >= 0 {
                    trace!("drop tail duplicate output. pts: {}", frame.get().pts);
                    continue;
                }
            }

            if !mux.is_open() {
                // the first filtered frame fixes the output geometry
                self.encode.open_with(&self.graph.get_sink_attribute()?)?;
                mux.add_stream(&self.encode)?;
                mux.open()?;
            }

            frame.get().pts = self.count;
            frame.get().pict_type = AV_PICTURE_TYPE_NONE;
            self.count += 1;
            self.encode.stream_to_encode(frame)?;
            self.write_packets(mux, audio, cancel)?;
        }
        Ok(())
    }

    // every produced video packet first pulls the audio lane level with it
    fn write_packets(&mut self, mux: &mut AFMux, audio: &mut Option<AFAudioLane>, cancel: &AtomicBool) -> Result<()> {
        self.encode.stream_from_encode()?;
        while let Some(packet) = self.encode.pop_packet() {
            packet.get().duration = 1;
            let (pts, _, time_base) = mux.prepare(&AFAVMediaType::Video, &packet)?;
            if let Some(audio_lane) = audio.as_mut() {
                audio_lane.advance_to(mux, Some((pts, time_base)), AFSyncMode::Normal, cancel)?;
            }
            mux.write(packet)?;
        }
        Ok(())
    }

    fn finish(&mut self, mux: &mut AFMux, audio: &mut Option<AFAudioLane>, cancel: &AtomicBool) -> Result<()> {
        // push a retimestamped copy of the final frame so timestamp driven
        // filters release the real one, then drop the copy's own output
        if let Some(duplicate) = self.last_source.take() {
            let frame = duplicate.get();
            if frame.pts == AV_NOPTS_VALUE {
                frame.pts = 0;
            }
            frame.pts = frame.pts.saturating_add(frame.duration.max(1));
            self.cutoff = Some((frame.pts, self.source_time_base));
            self.graph.stream_to_graph(duplicate)?;
        }
        if self.graph.get_status() == &AFGraphStatus::Opened {
            self.graph.flush()?;
        }
        self.drain_graph(mux, audio, cancel)?;

        if self.count == 0 {
            return Err(AFError::new_with_str(AFErrorCode::ConfigurationInvalid, "no video frames produced from input").into());
        }

        self.encode.flush()?;
        self.write_packets(mux, audio, cancel)?;
        Ok(())
    }
}

pub struct AFSession {
    options: AFSessionOptions,
    cancel: Arc<AtomicBool>,
}

impl AFSession {
    pub fn new(options: AFSessionOptions) -> Self {
        AFSession {
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    // shared flag, flip it from another thread to abort the running job
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn video_parameter(&self) -> AFEncodeParameter {
        let frame_rate = match self.options.frame_rate {
            None => AFAVRational::from_fps(25),
            Some(fps) => AFAVRational::from(unsafe { av_d2q(fps, 100000) }),
        };
        let preset = self.options.preset.as_ref()
            .and_then(|p| AFEncodeParameterPreset::from_str(p).ok())
            .unwrap_or(AFEncodeParameterPreset::Medium);
        AFEncodeParameter::Video {
            codec_name: self.options.video_codec.clone(),
            frame_rate,
            gop_size: 25,
            max_b_frames: 0,
            crf: self.options.crf.unwrap_or(0),
            preset,
            metadata: BTreeMap::new(),
        }
    }

    fn audio_parameter(&self) -> AFEncodeParameter {
        AFEncodeParameter::Audio {
            codec_name: self.options.audio_codec.clone(),
            channels: self.options.audio_channels,
            sample_rate: self.options.audio_sample_rate,
            bit_rate: self.options.audio_bit_rate,
            metadata: BTreeMap::new(),
        }
    }

    fn open_decode(&self, input_path: &str, media_type: AFAVMediaType) -> Result<AFDecode> {
        let mut decode = AFDecode::new(input_path);
        decode.open()?;
        let mut expect_streams = HashMap::new();
        expect_streams.insert(media_type, None);
        decode.set_expect_stream(expect_streams);
        decode.find_streams()?;
        decode.open_codec()?;
        Ok(decode)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(AFError::new_with_str(AFErrorCode::Cancelled, "cancelled by caller").into());
        }
        Ok(())
    }

    /// Transcode one or more video inputs, with an optional audio track,
    /// into a single synchronized output file.
    ///
    /// Video inputs are concatenated in order and paced onto a fixed frame
    /// grid, each frame one tick apart. Audio is pulled level with every
    /// video packet before that packet is written.
    pub fn transcode<T: ToString>(&self, video_inputs: &[T], audio_input: Option<T>, output_path: T) -> Result<AFSessionReport> {
        initialize();
        let _guard = AFSessionGuard::new();
        let output_path = output_path.to_string();
        if video_inputs.is_empty() {
            return Err(AFError::new_with_str(AFErrorCode::ConfigurationInvalid, "no video input given").into());
        }

        let mut mux = AFMux::new(output_path.clone(), self.options.output_format.clone())?;
        mux.set_metadata(self.options.metadata.clone());

        // resolve every encoder before anything is written to disk
        let mut video_encode = Some(AFEncode::new(self.video_parameter(), mux.default_codec_id(&AFAVMediaType::Video))?);
        if mux.needs_global_header() {
            video_encode.as_mut().unwrap().enable_global_header();
        }

        let mut audio_lane = match audio_input {
            None => None,
            Some(audio_path) => {
                let decode = self.open_decode(&audio_path.to_string(), AFAVMediaType::Audio)?;
                let mut encode = AFEncode::new(self.audio_parameter(), mux.default_codec_id(&AFAVMediaType::Audio))?;
                if mux.needs_global_header() {
                    encode.enable_global_header();
                }
                let lane = AFAudioLane::new(decode, encode, self.options.audio_filter.clone())?;
                mux.add_stream(lane.encode_ref())?;
                Some(lane)
            }
        };

        let mut video_lane: Option<AFVideoLane> = None;
        let mut incomplete = false;
        for input in video_inputs {
            self.check_cancel()?;
            let input_path = input.to_string();
            let mut decode = self.open_decode(&input_path, AFAVMediaType::Video)?;

            if video_lane.is_none() {
                let encode = video_encode.take().unwrap();
                let mut graph = AFGraph::new(&AFAVMediaType::Video);
                graph.set_filter_description(self.options.video_filter.clone());
                graph.injection_source(&decode)?;
                graph.injection_sink(Some(&encode.sink_constraint()))?;
                video_lane = Some(AFVideoLane {
                    graph,
                    encode,
                    source_time_base: decode.stream_time_base(&AFAVMediaType::Video).unwrap_or_default(),
                    count: 0,
                    last_source: None,
                    cutoff: None,
                });
            }
            let lane = video_lane.as_mut().unwrap();

            loop {
                self.check_cancel()?;
                match decode.iter().next() {
                    None => break,
                    Some(Ok((_, frame))) => {
                        lane.handle_source_frame(frame, &mut mux, &mut audio_lane, &self.cancel)?;
                    }
                    Some(Err(err)) => {
                        // a broken tail is reported, not fatal
                        warn!("failed to complete input. path: {}, error: {}", input_path, err);
                        incomplete = true;
                        break;
                    }
                }
            }
        }

        let mut lane = video_lane.unwrap();
        lane.finish(&mut mux, &mut audio_lane, &self.cancel)?;
        if !lane.encode.is_drained() {
            // non-fatal, the file still carries everything that was written
            warn!("video encoder not drained after flush. path: {}", output_path);
            incomplete = true;
        }
        if let Some(audio_lane) = audio_lane.as_mut() {
            audio_lane.advance_to(&mut mux, None, AFSyncMode::ForceDrainAll, &self.cancel)?;
        }
        mux.close()?;

        if incomplete {
            warn!("output finished from incomplete input. path: {}", output_path);
        }
        let report = AFSessionReport {
            video_frames: lane.count as usize,
            video_packets: mux.packet_count(&AFAVMediaType::Video),
            audio_packets: mux.packet_count(&AFAVMediaType::Audio),
            incomplete,
        };
        info!("transcode finished. path: {}, video_frames: {}, audio_packets: {}", output_path, report.video_frames, report.audio_packets);
        Ok(report)
    }

    /// Convert a single audio input into a new container, honoring the
    /// configured start offset and maximum duration.
    pub fn convert_audio<T: ToString>(&self, input_path: T, output_path: T) -> Result<AFSessionReport> {
        initialize();
        let _guard = AFSessionGuard::new();
        let input_path = input_path.to_string();
        let output_path = output_path.to_string();

        let mut mux = AFMux::new(output_path.clone(), self.options.output_format.clone())?;
        mux.set_metadata(self.options.metadata.clone());

        let mut decode = self.open_decode(&input_path, AFAVMediaType::Audio)?;
        if let Some(start_time) = self.options.start_time {
            decode.seek(Duration::from_secs_f64(start_time))?;
        }
        let mut encode = AFEncode::new(self.audio_parameter(), mux.default_codec_id(&AFAVMediaType::Audio))?;
        if mux.needs_global_header() {
            encode.enable_global_header();
        }

        let mut lane = AFAudioLane::new(decode, encode, self.options.audio_filter.clone())?;
        if let Some(max_duration) = self.options.max_duration {
            let time_base = lane.stream_time_base();
            assert!(!time_base.is_zero());
            let end_seconds = self.options.start_time.unwrap_or(0.0) + max_duration;
            let limit = (end_seconds * time_base.den as f64 / time_base.num as f64) as i64;
            lane.set_limit(limit);
        }
        mux.add_stream(lane.encode_ref())?;
        mux.open()?;

        lane.advance_to(&mut mux, None, AFSyncMode::ForceDrainAll, &self.cancel)?;
        let incomplete = !lane.is_source_complete();
        mux.close()?;

        if incomplete {
            warn!("failed to complete input. path: {}", input_path);
        }
        let report = AFSessionReport {
            video_frames: 0,
            video_packets: 0,
            audio_packets: mux.packet_count(&AFAVMediaType::Audio),
            incomplete,
        };
        info!("audio convert finished. path: {}, audio_packets: {}", output_path, report.audio_packets);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe;
    use crate::util::testlab;

    fn write_image_set(prefix: &str, frames: usize) -> Vec<String> {
        let mut paths = Vec::new();
        for index in 0..frames {
            let path = testlab::media_root().join(format!("{}_{}.png", prefix, index));
            testlab::write_png(&path, 64, 64).unwrap();
            paths.push(path.to_str().unwrap().to_string());
        }
        paths
    }

    #[test]
    fn stills_become_exactly_that_many_frames() {
        initialize();
        let inputs = write_image_set("session_stills", 3);
        let output = testlab::media_root().join("session_stills.mp4");

        let session = AFSession::new(AFSessionOptions {
            frame_rate: Some(2.0),
            ..Default::default()
        });
        let report = session.transcode(&inputs, None, output.to_str().unwrap().to_string()).unwrap();
        assert_eq!(report.video_frames, 3);
        assert!(!report.incomplete);

        let info = probe::probe(output.to_str().unwrap()).unwrap();
        let video = info.stream(AFAVMediaType::Video).unwrap();
        assert_eq!(video.frames, 3);
        let duration = info.duration.as_secs_f64();
        assert!((duration - 1.5).abs() < 0.1, "duration: {}", duration);
    }

    #[test]
    fn video_with_audio_track_interleaves() {
        initialize();
        let inputs = write_image_set("session_av", 4);
        let audio = testlab::media_root().join("session_av.wav");
        testlab::write_silent_wav(&audio, 3, 44100).unwrap();
        let output = testlab::media_root().join("session_av.mp4");

        let session = AFSession::new(AFSessionOptions {
            frame_rate: Some(2.0),
            ..Default::default()
        });
        let report = session.transcode(&inputs,
                                       Some(audio.to_str().unwrap().to_string()),
                                       output.to_str().unwrap().to_string()).unwrap();
        assert_eq!(report.video_frames, 4);
        assert!(report.audio_packets > 0);

        let info = probe::probe(output.to_str().unwrap()).unwrap();
        let video_info = info.stream(AFAVMediaType::Video).unwrap();
        let audio_info = info.stream(AFAVMediaType::Audio).unwrap();
        assert_eq!(video_info.frames, 4);
        assert!(audio_info.duration.as_secs_f64() > 2.5, "audio duration: {:?}", audio_info.duration);
    }

    #[test]
    fn output_packets_stay_monotonic_and_interleaved() {
        initialize();
        let inputs = write_image_set("session_order", 4);
        let audio = testlab::media_root().join("session_order.wav");
        testlab::write_silent_wav(&audio, 3, 44100).unwrap();
        let output = testlab::media_root().join("session_order.mp4");

        let session = AFSession::new(AFSessionOptions {
            frame_rate: Some(2.0),
            ..Default::default()
        });
        session.transcode(&inputs,
                          Some(audio.to_str().unwrap().to_string()),
                          output.to_str().unwrap().to_string()).unwrap();

        let stamps = testlab::read_packet_stamps(&output).unwrap();
        assert!(!stamps.is_empty());

        let mut last_pts: HashMap<usize, i64> = HashMap::new();
        let mut last_video: Option<(i64, AFAVRational)> = None;
        for stamp in stamps {
            if let Some(previous) = last_pts.insert(stamp.stream_index, stamp.pts) {
                assert!(stamp.pts >= previous,
                        "stream {} went backwards. previous: {}, pts: {}", stamp.stream_index, previous, stamp.pts);
            }
            match stamp.media_type {
                Some(AFAVMediaType::Video) => last_video = Some((stamp.pts, stamp.time_base)),
                Some(AFAVMediaType::Audio) => {
                    if let Some((video_pts, video_tb)) = last_video {
                        let ordering = unsafe { av_compare_ts(stamp.end_pts, stamp.time_base.get(), video_pts, video_tb.get()) };
                        assert!(ordering >= 0,
                                "audio ending at {} written after video pts {}", stamp.end_pts, video_pts);
                    }
                }
                None => {}
            }
        }
    }

    #[test]
    fn video_filter_description_applies() {
        initialize();
        let inputs = write_image_set("session_vf", 2);
        let output = testlab::media_root().join("session_vf.mp4");

        let session = AFSession::new(AFSessionOptions {
            frame_rate: Some(2.0),
            video_filter: Some("scale=32:32".to_string()),
            ..Default::default()
        });
        session.transcode(&inputs, None, output.to_str().unwrap().to_string()).unwrap();

        let info = probe::probe(output.to_str().unwrap()).unwrap();
        let video = info.stream(AFAVMediaType::Video).unwrap();
        assert_eq!(video.width, 32);
        assert_eq!(video.height, 32);
    }

    #[test]
    fn audio_convert_honors_cutoff() {
        initialize();
        let input = testlab::media_root().join("session_cut.wav");
        testlab::write_silent_wav(&input, 4, 16000).unwrap();
        let output = testlab::media_root().join("session_cut_out.wav");

        let session = AFSession::new(AFSessionOptions {
            start_time: Some(1.0),
            max_duration: Some(1.0),
            ..Default::default()
        });
        let report = session.convert_audio(input.to_str().unwrap(), output.to_str().unwrap()).unwrap();
        assert!(report.audio_packets > 0);
        assert!(!report.incomplete);

        // the boundary packet may run slightly past the requested duration
        let info = probe::probe(output.to_str().unwrap()).unwrap();
        let duration = info.duration.as_secs_f64();
        assert!(duration >= 0.9, "duration: {}", duration);
        assert!(duration < 1.5, "duration: {}", duration);
    }

    #[test]
    fn unknown_video_codec_leaves_no_output_file() {
        initialize();
        let inputs = write_image_set("session_badcodec", 1);
        let output = testlab::media_root().join("session_badcodec.mp4");
        let _ = std::fs::remove_file(&output);

        let session = AFSession::new(AFSessionOptions {
            video_codec: Some("definitely_not_an_encoder".to_string()),
            ..Default::default()
        });
        let err = session.transcode(&inputs, None, output.to_str().unwrap().to_string()).unwrap_err();
        assert_eq!(crate::util::error::error_code_of(&err), Some(AFErrorCode::ConfigurationInvalid));
        assert!(!output.exists());
    }

    #[test]
    fn cancelled_session_reports_cancellation() {
        initialize();
        let inputs = write_image_set("session_cancel", 1);
        let output = testlab::media_root().join("session_cancel.mp4");

        let session = AFSession::new(AFSessionOptions::default());
        session.cancel_handle().store(true, Ordering::Relaxed);
        let err = session.transcode(&inputs, None, output.to_str().unwrap().to_string()).unwrap_err();
        assert_eq!(crate::util::error::error_code_of(&err), Some(AFErrorCode::Cancelled));
    }

    #[test]
    fn session_counter_returns_to_zero() {
        initialize();
        let before = active_sessions();
        let input = testlab::media_root().join("session_counter.wav");
        testlab::write_silent_wav(&input, 1, 8000).unwrap();
        let output = testlab::media_root().join("session_counter_out.wav");

        let session = AFSession::new(AFSessionOptions::default());
        session.convert_audio(input.to_str().unwrap(), output.to_str().unwrap()).unwrap();
        assert_eq!(active_sessions(), before);
    }
}
