use crate::filter::*;

pub trait AFGraphSourceRely {
    fn get_source(&self, media_type: &AFAVMediaType) -> Result<AFGraphSourceAttribute>;
}

#[derive(Clone)]
pub enum AFGraphSourceAttribute {
    Video {
        width: usize,
        height: usize,
        pix_fmt: AFAVPixelFormat,
        time_base: AFAVRational,
        frame_rate: AFAVRational,
        pixel_aspect: AFAVRational,
    },
    Audio {
        sample_rate: usize,
        sample_fmt: AFAVSampleFormat,
        channel_layout: String,
        channels: usize,
        time_base: AFAVRational,
    },
}

impl AFGraphSourceAttribute {
    pub fn media_type(&self) -> AFAVMediaType {
        match self {
            AFGraphSourceAttribute::Video { .. } => AFAVMediaType::Video,
            AFGraphSourceAttribute::Audio { .. } => AFAVMediaType::Audio,
        }
    }
}

// an attribute set can stand in for a live source
impl AFGraphSourceRely for AFGraphSourceAttribute {
    fn get_source(&self, media_type: &AFAVMediaType) -> Result<AFGraphSourceAttribute> {
        if &self.media_type() != media_type {
            return Err(anyhow!("attribute media type mismatch. media_type: {}", media_type));
        }
        Ok(self.clone())
    }
}
