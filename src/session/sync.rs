use crate::session::*;

/// How far [`AFAudioLane::advance_to`] is allowed to run.
///
/// `Normal` stops once the written audio covers the target timestamp,
/// `ForceFlush` stops feeding the decoder and drains the pipeline as it
/// stands, `ForceDrainAll` consumes the source to its end first.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AFSyncMode {
    Normal,
    ForceFlush,
    ForceDrainAll,
}

// the audio side of a synchronized session. owns its whole
// decode -> filter -> encode chain and writes straight into the muxer
pub struct AFAudioLane {
    decode: AFDecode,
    graph: AFGraph,
    encode: AFEncode,

    // end timestamp of the last written packet, in the container stream time base
    end_pts: Option<(i64, AFAVRational)>,
    // decoded frames at or past this timestamp stop the lane, decode stream time base.
    // the packet carrying the boundary is still written, so the output may run
    // one packet past the limit
    limit_pts: Option<i64>,
    limit_reached: bool,
    graph_flushed: bool,
    done: bool,
}

impl AFAudioLane {
    pub fn new(decode: AFDecode, mut encode: AFEncode, filter_description: Option<String>) -> Result<Self> {
        assert_eq!(decode.get_status(), &AFCodecStatus::Started);

        let mut graph = AFGraph::new(&AFAVMediaType::Audio);
        graph.set_filter_description(filter_description);
        graph.injection_source(&decode)?;
        graph.injection_sink(Some(&encode.sink_constraint()))?;

        encode.open_with(&graph.get_sink_attribute()?)?;
        graph.set_frame_size(encode.frame_size())?;

        Ok(AFAudioLane {
            decode,
            graph,
            encode,
            end_pts: None,
            limit_pts: None,
            limit_reached: false,
            graph_flushed: false,
            done: false,
        })
    }

    pub fn set_limit(&mut self, limit_pts: i64) -> &mut Self {
        self.limit_pts = Some(limit_pts);
        self
    }

    pub fn encode_ref(&self) -> &AFEncode {
        &self.encode
    }

    pub fn stream_time_base(&self) -> AFAVRational {
        self.decode.stream_time_base(&AFAVMediaType::Audio).unwrap_or_default()
    }

    pub fn end_position(&self) -> Option<(i64, AFAVRational)> {
        self.end_pts
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    // true when the source was read to its natural end or the cutoff fired
    pub fn is_source_complete(&self) -> bool {
        self.limit_reached || self.decode.get_status() == &AFCodecStatus::Ended
    }

    /// Run the audio chain until the written audio reaches `target`, a
    /// timestamp in another stream's time base. Passing `None` with a
    /// draining mode runs the chain to completion.
    pub fn advance_to(&mut self, mux: &mut AFMux, target: Option<(i64, AFAVRational)>, mode: AFSyncMode, cancel: &AtomicBool) -> Result<()> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(AFError::new_with_str(AFErrorCode::Cancelled, "cancelled while advancing audio").into());
            }
            if self.done {
                return Ok(());
            }
            if mode == AFSyncMode::Normal && self.caught_up(target) {
                return Ok(());
            }

            // write out whatever the encoder already produced
            self.encode.stream_from_encode()?;
            if let Some(packet) = self.encode.pop_packet() {
                let (_, end_pts, time_base) = mux.prepare(&AFAVMediaType::Audio, &packet)?;
                mux.write(packet)?;
                self.end_pts = Some((end_pts, time_base));
                continue;
            }
            if self.encode.is_drained() {
                self.done = true;
                debug!("audio lane drained. end_pts: {:?}", self.end_pts);
                return Ok(());
            }

            // feed the chain
            let allow_decode = mode != AFSyncMode::ForceFlush
                && !self.limit_reached
                && self.decode.get_status() != &AFCodecStatus::Ended;
            if allow_decode {
                self.step_decode()?;
                continue;
            }

            // nothing more is coming from the source, flush top down
            if !self.graph_flushed {
                if self.graph.get_status() == &AFGraphStatus::Opened {
                    self.graph.flush()?;
                }
                self.graph_flushed = true;
                self.pump_graph()?;
            }
            self.encode.flush()?;
        }
    }

    fn caught_up(&self, target: Option<(i64, AFAVRational)>) -> bool {
        let (target_pts, target_tb) = match target {
            None => return true,
            Some(t) => t,
        };
        match self.end_pts {
            None => false,
            Some((end_pts, end_tb)) => {
                unsafe { av_compare_ts(end_pts, end_tb.get(), target_pts, target_tb.get()) >= 0 }
            }
        }
    }

    // decode one packet worth of frames and push them through the graph
    fn step_decode(&mut self) -> Result<()> {
        self.decode.stream_to_codec()?;
        loop {
            let frame = match self.decode.stream_from_codec()? {
                None => break,
                Some((media_type, frame)) => {
                    assert_eq!(media_type, AFAVMediaType::Audio);
                    frame
                }
            };
            if let Some(limit) = self.limit_pts {
                if frame.get().pts != AV_NOPTS_VALUE && frame.get().pts >= limit {
                    self.limit_reached = true;
                    debug!("audio limit reached. pts: {}, limit: {}", frame.get().pts, limit);
                    break;
                }
            }
            self.graph.stream_to_graph(frame)?;
            self.pump_graph()?;
        }
        Ok(())
    }

    fn pump_graph(&mut self) -> Result<()> {
        while let Some(frame) = self.graph.stream_from_graph()? {
            self.encode.stream_to_encode(frame)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe;
    use crate::util::testlab;

    fn open_audio_decode(path: &std::path::Path) -> AFDecode {
        let mut decode = AFDecode::new(path.to_str().unwrap());
        decode.open().unwrap();
        let mut expect_streams = HashMap::new();
        expect_streams.insert(AFAVMediaType::Audio, None);
        decode.set_expect_stream(expect_streams);
        decode.find_streams().unwrap();
        decode.open_codec().unwrap();
        decode
    }

    #[test]
    fn drain_all_writes_full_source() {
        initialize();
        let input = testlab::media_root().join("sync_drain_all.wav");
        let output = testlab::media_root().join("sync_drain_all_out.wav");
        testlab::write_silent_wav(&input, 2, 16000).unwrap();

        let decode = open_audio_decode(&input);
        let mut mux = AFMux::new(output.to_str().unwrap(), None).unwrap();
        let encode = AFEncode::new(AFEncodeParameter::default(&AFAVMediaType::Audio),
                                   mux.default_codec_id(&AFAVMediaType::Audio)).unwrap();
        let mut lane = AFAudioLane::new(decode, encode, None).unwrap();
        mux.add_stream(lane.encode_ref()).unwrap();
        mux.open().unwrap();

        let cancel = AtomicBool::new(false);
        lane.advance_to(&mut mux, None, AFSyncMode::ForceDrainAll, &cancel).unwrap();
        assert!(lane.is_done());
        assert!(lane.is_source_complete());
        mux.close().unwrap();

        let info = probe::probe(output.to_str().unwrap()).unwrap();
        let duration = info.duration.as_secs_f64();
        assert!((duration - 2.0).abs() < 0.1, "duration: {}", duration);
    }

    #[test]
    fn normal_mode_stops_at_target() {
        initialize();
        let input = testlab::media_root().join("sync_target.wav");
        let output = testlab::media_root().join("sync_target_out.wav");
        testlab::write_silent_wav(&input, 3, 16000).unwrap();

        let decode = open_audio_decode(&input);
        let mut mux = AFMux::new(output.to_str().unwrap(), None).unwrap();
        let encode = AFEncode::new(AFEncodeParameter::default(&AFAVMediaType::Audio),
                                   mux.default_codec_id(&AFAVMediaType::Audio)).unwrap();
        let mut lane = AFAudioLane::new(decode, encode, None).unwrap();
        mux.add_stream(lane.encode_ref()).unwrap();
        mux.open().unwrap();

        // one second in a millisecond time base
        let cancel = AtomicBool::new(false);
        lane.advance_to(&mut mux, Some((1000, AFAVRational { num: 1, den: 1000 })), AFSyncMode::Normal, &cancel).unwrap();

        let (end_pts, end_tb) = lane.end_position().unwrap();
        let covered = end_pts as f64 * end_tb.num as f64 / end_tb.den as f64;
        assert!(covered >= 1.0, "covered: {}", covered);
        assert!(covered < 2.0, "covered: {}", covered);
        assert!(!lane.is_done());
        mux.close().unwrap();
    }

    #[test]
    fn cancellation_interrupts_advance() {
        initialize();
        let input = testlab::media_root().join("sync_cancel.wav");
        let output = testlab::media_root().join("sync_cancel_out.wav");
        testlab::write_silent_wav(&input, 1, 16000).unwrap();

        let decode = open_audio_decode(&input);
        let mut mux = AFMux::new(output.to_str().unwrap(), None).unwrap();
        let encode = AFEncode::new(AFEncodeParameter::default(&AFAVMediaType::Audio),
                                   mux.default_codec_id(&AFAVMediaType::Audio)).unwrap();
        let mut lane = AFAudioLane::new(decode, encode, None).unwrap();
        mux.add_stream(lane.encode_ref()).unwrap();
        mux.open().unwrap();

        let cancel = AtomicBool::new(true);
        let err = lane.advance_to(&mut mux, None, AFSyncMode::ForceDrainAll, &cancel).unwrap_err();
        assert_eq!(crate::util::error::error_code_of(&err), Some(AFErrorCode::Cancelled));
    }
}
