//! Production codec backends
//!
//! H.264 via Cisco's OpenH264 (bundled source build of the `openh264` crate),
//! AAC-LC via symphonia.

use bytes::Bytes;
use openh264::decoder::Decoder as H264Decoder;
use openh264::formats::YUVSource;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{self, CodecParameters, DecoderOptions, CODEC_TYPE_AAC};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::debug;

use super::convert::{i420_to_nv12, I420Planes};
use super::{
    AudioBlock, AudioCodec, AudioSpecificConfig, CodecError, CodecFactory, VideoCodec,
    VideoPicture,
};
use crate::protocol::VideoParams;

/// Samples per channel in one AAC-LC frame
const AAC_FRAME_SAMPLES: u64 = 1024;

/// Factory for the bundled software codecs
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodecs;

impl CodecFactory for DefaultCodecs {
    fn video(&self, params: &VideoParams) -> Result<Box<dyn VideoCodec>, CodecError> {
        debug!(
            "Creating H.264 decoder for {}x{}@{}",
            params.width, params.height, params.fps
        );
        Ok(Box::new(OpenH264Codec::new()?))
    }

    fn audio(&self, config: &AudioSpecificConfig) -> Result<Box<dyn AudioCodec>, CodecError> {
        Ok(Box::new(SymphoniaAac::new(config)?))
    }
}

pub struct OpenH264Codec {
    decoder: H264Decoder,
}

impl OpenH264Codec {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = H264Decoder::new()
            .map_err(|e| CodecError::Unavailable(format!("openh264: {}", e)))?;
        Ok(Self { decoder })
    }
}

impl VideoCodec for OpenH264Codec {
    fn configure(&mut self, parameter_sets: &[u8]) -> Result<(), CodecError> {
        self.decoder
            .decode(parameter_sets)
            .map(|_| ())
            .map_err(|e| CodecError::Corrupt(e.to_string()))
    }

    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<VideoPicture>, CodecError> {
        let Some(yuv) = self
            .decoder
            .decode(access_unit)
            .map_err(|e| CodecError::Corrupt(e.to_string()))?
        else {
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let nv12 = i420_to_nv12(&I420Planes {
            width,
            height,
            y: yuv.y(),
            u: yuv.u(),
            v: yuv.v(),
            y_stride,
            u_stride,
            v_stride,
        });

        Ok(Some(VideoPicture {
            width: width as u32,
            height: height as u32,
            stride: width as u32,
            fps: 0,
            data: Bytes::from(nv12),
        }))
    }
}

pub struct SymphoniaAac {
    decoder: Box<dyn codecs::Decoder>,
    /// Running packet timestamp in samples; symphonia only uses it for bookkeeping
    ts: u64,
    needs_reset: bool,
}

impl SymphoniaAac {
    pub fn new(config: &AudioSpecificConfig) -> Result<Self, CodecError> {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_AAC)
            .with_sample_rate(config.sample_rate())
            .with_extra_data(config.to_bytes().to_vec().into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| CodecError::Unavailable(format!("AAC decoder: {}", e)))?;

        Ok(Self {
            decoder,
            ts: 0,
            needs_reset: false,
        })
    }
}

impl AudioCodec for SymphoniaAac {
    fn decode(&mut self, frame: &[u8]) -> Result<Option<AudioBlock>, CodecError> {
        if std::mem::take(&mut self.needs_reset) {
            self.decoder.reset();
        }

        let packet = Packet::new_from_slice(0, self.ts, AAC_FRAME_SAMPLES, frame);
        self.ts += AAC_FRAME_SAMPLES;

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                return Err(CodecError::Corrupt(reason.to_string()));
            }
            Err(SymphoniaError::ResetRequired) => {
                self.needs_reset = true;
                return Err(CodecError::Corrupt("decoder reset required".to_string()));
            }
            Err(e) => return Err(CodecError::Corrupt(e.to_string())),
        };

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(None);
        }

        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<f32>::new(frames as u64, spec);
        samples.copy_planar_ref(decoded);

        Ok(Some(AudioBlock {
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
            samples_per_channel: frames,
            samples: samples.samples().to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AudioParams;

    #[test]
    fn test_aac_backend_accepts_lc_config() {
        let config = AudioSpecificConfig::from_params(&AudioParams::default());
        assert!(DefaultCodecs.audio(&config).is_ok());
    }

    #[test]
    fn test_h264_backend_survives_garbage() {
        let mut codec = DefaultCodecs.video(&VideoParams::default()).unwrap();
        // Not a valid access unit; must not panic or produce a picture
        let result = codec.decode(&[0, 0, 0, 1, 0x65, 0xFF, 0xFF]);
        assert!(!matches!(result, Ok(Some(_))));
    }
}
