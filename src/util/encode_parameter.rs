use crate::util::*;

#[derive(Debug, Clone, Copy, Display, EnumString)]
pub enum AFEncodeParameterPreset {
    #[strum(serialize = "ultrafast")]
    UltraFast,
    #[strum(serialize = "veryfast")]
    VeryFast,
    #[strum(serialize = "medium")]
    Medium,
    #[strum(serialize = "slow")]
    Slow,
}

#[derive(Debug, Clone)]
pub enum AFEncodeParameter {
    Video {
        // encoder name, container default when empty
        codec_name: Option<String>,
        frame_rate: AFAVRational,
        gop_size: u16,
        max_b_frames: u16,
        // constant rate factor, encoder default when zero
        crf: u16,
        preset: AFEncodeParameterPreset,
        metadata: BTreeMap<String, String>,
    },
    Audio {
        codec_name: Option<String>,
        channels: Option<usize>,
        sample_rate: Option<usize>,
        bit_rate: Option<usize>,
        metadata: BTreeMap<String, String>,
    },
}

impl AFEncodeParameter {
    pub fn default(media_type: &AFAVMediaType) -> AFEncodeParameter {
        match media_type {
            AFAVMediaType::Video => {
                AFEncodeParameter::Video {
                    codec_name: None,
                    frame_rate: AFAVRational::from_fps(25),
                    gop_size: 25,
                    max_b_frames: 0,
                    crf: 0,
                    preset: AFEncodeParameterPreset::Medium,
                    metadata: BTreeMap::new(),
                }
            }
            AFAVMediaType::Audio => {
                AFEncodeParameter::Audio {
                    codec_name: None,
                    channels: None,
                    sample_rate: None,
                    bit_rate: None,
                    metadata: BTreeMap::new(),
                }
            }
        }
    }

    pub fn media_type(&self) -> AFAVMediaType {
        match self {
            AFEncodeParameter::Video { .. } => AFAVMediaType::Video,
            AFEncodeParameter::Audio { .. } => AFAVMediaType::Audio,
        }
    }

    pub fn codec_name(&self) -> &Option<String> {
        match self {
            AFEncodeParameter::Video { codec_name, .. } => codec_name,
            AFEncodeParameter::Audio { codec_name, .. } => codec_name,
        }
    }
}
