/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! VP8 engine using libvpx.
//!
//! The encoder is created lazily on the first frame because the resolution
//! is only known then. Quality maps onto the quantizer range, bitrate onto
//! `rc_target_bitrate`, and scale onto the encoded resolution: the input
//! image is downsampled before it reaches libvpx and the encoder is rebuilt
//! whenever the scaled size changes.

use std::mem::MaybeUninit;
use std::os::raw::{c_int, c_ulong};
use std::ptr;

use vpx_sys::*;

use super::{DecodedImage, VideoDecoder, VideoEncoder, VideoEngine};
use crate::frame::VideoFrame;
use crate::{PipelineError, Result};

macro_rules! vpx {
    ($f:expr) => {{
        let res = unsafe { $f };
        let res_int = unsafe { std::mem::transmute::<vpx_sys::vpx_codec_err_t, i32>(res) };
        if res_int != 0 {
            return Err(PipelineError::Engine(format!(
                "vpx function error code ({}).",
                res_int
            )));
        }
        res
    }};
}

macro_rules! vpx_ptr {
    ($f:expr) => {{
        let res = unsafe { $f };
        if res.is_null() {
            return Err(PipelineError::Engine(
                "vpx function returned null pointer.".into(),
            ));
        }
        res
    }};
}

const FPS: c_int = 30;
const BEST_QUANTIZER: u32 = 4;
const WORST_QUANTIZER: u32 = 56;

#[derive(Debug, Default, Clone, Copy)]
pub struct Vp8Engine;

impl VideoEngine for Vp8Engine {
    fn name(&self) -> &str {
        "vp8"
    }

    fn create_encoder(&self) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(Vp8Encoder::new()))
    }

    fn create_decoder(&self) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(Vp8Decoder::new()?))
    }

    /// VP8 frame tag: bit 0 of the first byte is clear on keyframes.
    fn is_keyframe(&self, payload: &[u8]) -> bool {
        payload.first().is_some_and(|b| b & 0x01 == 0)
    }
}

struct EncoderContext {
    ctx: vpx_codec_ctx_t,
    cfg: vpx_codec_enc_cfg_t,
    width: u32,
    height: u32,
}

impl Drop for EncoderContext {
    fn drop(&mut self) {
        unsafe {
            vpx_codec_destroy(&mut self.ctx);
        }
    }
}

/// A VP8 encoder wrapping libvpx.
pub struct Vp8Encoder {
    context: Option<EncoderContext>,
    quality: f64,
    bitrate_kbps: u32,
    scale: f64,
    force_keyframe: bool,
    pts: i64,
    destroyed: bool,
}

// SAFETY: the libvpx context is only touched through `&mut self`.
unsafe impl Send for Vp8Encoder {}

impl Vp8Encoder {
    pub fn new() -> Self {
        Self {
            context: None,
            quality: 0.5,
            bitrate_kbps: 320,
            scale: 1.0,
            force_keyframe: false,
            pts: 0,
            destroyed: false,
        }
    }

    fn max_quantizer(&self) -> u32 {
        let span = (WORST_QUANTIZER - BEST_QUANTIZER) as f64;
        WORST_QUANTIZER - (span * self.quality).round() as u32
    }

    fn build(&self, width: u32, height: u32) -> Result<EncoderContext> {
        let iface = vpx_ptr!(vpx_codec_vp8_cx());
        let mut cfg = unsafe { MaybeUninit::zeroed().assume_init() };
        vpx!(vpx_codec_enc_config_default(iface, &mut cfg, 0));

        cfg.g_w = width;
        cfg.g_h = height;
        cfg.g_timebase.num = 1;
        cfg.g_timebase.den = FPS;
        cfg.rc_target_bitrate = self.bitrate_kbps;
        cfg.rc_min_quantizer = BEST_QUANTIZER;
        cfg.rc_max_quantizer = self.max_quantizer();
        cfg.g_threads = 2;
        cfg.g_lag_in_frames = 0;
        cfg.g_error_resilient = VPX_ERROR_RESILIENT_DEFAULT;
        cfg.g_pass = vpx_enc_pass::VPX_RC_ONE_PASS;
        cfg.rc_end_usage = vpx_rc_mode::VPX_CBR;
        cfg.kf_mode = vpx_kf_mode::VPX_KF_AUTO;
        cfg.kf_max_dist = 300;

        let mut ctx = unsafe { MaybeUninit::zeroed().assume_init() };
        vpx!(vpx_codec_enc_init_ver(
            &mut ctx,
            iface,
            &cfg,
            0,
            VPX_ENCODER_ABI_VERSION as i32
        ));
        unsafe {
            vpx_codec_control_(&mut ctx, vp8e_enc_control_id::VP8E_SET_CPUUSED as c_int, 8);
        }

        Ok(EncoderContext {
            ctx,
            cfg,
            width,
            height,
        })
    }

    fn reconfigure(&mut self) -> Result<()> {
        let max_quantizer = self.max_quantizer();
        let bitrate = self.bitrate_kbps;
        if let Some(context) = self.context.as_mut() {
            context.cfg.rc_target_bitrate = bitrate;
            context.cfg.rc_max_quantizer = max_quantizer;
            vpx!(vpx_codec_enc_config_set(&mut context.ctx, &context.cfg));
        }
        Ok(())
    }

    fn scaled_size(&self, width: u32, height: u32) -> (u32, u32) {
        let even = |v: u32| ((v as f64 * self.scale) as u32 & !1).max(2);
        (even(width), even(height))
    }
}

impl Default for Vp8Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for Vp8Encoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<u8>> {
        if self.destroyed {
            return Err(PipelineError::Destroyed("VP8 encoder"));
        }
        if frame.planes.len() < 3 {
            return Err(PipelineError::Engine(format!(
                "expected I420 input, got {} planes",
                frame.planes.len()
            )));
        }

        let (width, height) = self.scaled_size(frame.width, frame.height);
        let rebuild = self
            .context
            .as_ref()
            .map_or(true, |c| c.width != width || c.height != height);
        if rebuild {
            log::info!("Configuring VP8 encoder for {width}x{height}");
            self.context = None;
            self.context = Some(self.build(width, height)?);
            self.force_keyframe = true;
        }

        let i420 = scale_i420(frame, width, height);
        let flags = if std::mem::take(&mut self.force_keyframe) {
            VPX_EFLAG_FORCE_KF as _
        } else {
            0
        };
        let pts = self.pts;
        self.pts += 1;

        let Some(context) = self.context.as_mut() else {
            return Err(PipelineError::Engine("VP8 encoder context missing".into()));
        };

        let mut image = unsafe { MaybeUninit::zeroed().assume_init() };
        vpx_ptr!(vpx_img_wrap(
            &mut image,
            vpx_img_fmt::VPX_IMG_FMT_I420,
            width as _,
            height as _,
            1,
            i420.as_ptr() as _,
        ));
        vpx!(vpx_codec_encode(
            &mut context.ctx,
            &image,
            pts,
            1,
            flags,
            VPX_DL_REALTIME as c_ulong,
        ));

        let mut out = Vec::new();
        let mut iter: vpx_codec_iter_t = ptr::null();
        loop {
            let pkt = unsafe { vpx_codec_get_cx_data(&mut context.ctx, &mut iter) };
            if pkt.is_null() {
                break;
            }
            unsafe {
                if (*pkt).kind == vpx_codec_cx_pkt_kind::VPX_CODEC_CX_FRAME_PKT {
                    let f = &(*pkt).data.frame;
                    out.extend_from_slice(std::slice::from_raw_parts(
                        f.buf as *const u8,
                        f.sz as usize,
                    ));
                }
            }
        }
        Ok(out)
    }

    fn force_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    fn set_quality(&mut self, quality: f64) {
        self.quality = quality.clamp(0.0, 1.0);
        if let Err(e) = self.reconfigure() {
            log::warn!("VP8 quality update failed: {e}");
        }
    }

    fn set_bitrate_kbps(&mut self, bitrate_kbps: u32) {
        self.bitrate_kbps = bitrate_kbps;
        if let Err(e) = self.reconfigure() {
            log::warn!("VP8 bitrate update failed: {e}");
        }
    }

    fn set_scale(&mut self, scale: f64) {
        // takes effect on the next frame, which rebuilds the context
        self.scale = scale.clamp(f64::MIN_POSITIVE, 1.0);
    }

    fn destroy(&mut self) {
        self.context = None;
        self.destroyed = true;
    }
}

/// Nearest-neighbour resample of an I420 frame into a packed buffer of the
/// target size.
fn scale_i420(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut out = Vec::with_capacity(w * h + 2 * (w / 2) * (h / 2));
    for (index, plane) in frame.planes.iter().take(3).enumerate() {
        let (src_w, src_h, dst_w, dst_h) = if index == 0 {
            (frame.width as usize, frame.height as usize, w, h)
        } else {
            (
                (frame.width as usize).div_ceil(2),
                (frame.height as usize).div_ceil(2),
                w / 2,
                h / 2,
            )
        };
        for y in 0..dst_h {
            let src_y = (y * src_h / dst_h.max(1)).min(src_h.saturating_sub(1));
            for x in 0..dst_w {
                let src_x = (x * src_w / dst_w.max(1)).min(src_w.saturating_sub(1));
                out.push(
                    plane
                        .data
                        .get(src_y * plane.stride + src_x)
                        .copied()
                        .unwrap_or(0),
                );
            }
        }
    }
    out
}

/// A VP8 decoder using libvpx.
pub struct Vp8Decoder {
    context: Option<Box<vpx_codec_ctx_t>>,
}

// SAFETY: the libvpx context is only touched through `&mut self`.
unsafe impl Send for Vp8Decoder {}

impl Vp8Decoder {
    pub fn new() -> Result<Self> {
        let mut context: Box<vpx_codec_ctx_t> = Box::new(unsafe { std::mem::zeroed() });
        vpx!(vpx_codec_dec_init_ver(
            context.as_mut(),
            vpx_codec_vp8_dx(),
            ptr::null_mut(),
            0,
            VPX_DECODER_ABI_VERSION as i32,
        ));
        Ok(Self {
            context: Some(context),
        })
    }
}

impl VideoDecoder for Vp8Decoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Option<DecodedImage>> {
        let context = self
            .context
            .as_mut()
            .ok_or(PipelineError::Destroyed("VP8 decoder"))?;

        vpx!(vpx_codec_decode(
            context.as_mut(),
            payload.as_ptr(),
            payload.len() as u32,
            ptr::null_mut(),
            0,
        ));

        let mut iter: vpx_codec_iter_t = ptr::null();
        let mut image = None;
        loop {
            let img = unsafe { vpx_codec_get_frame(context.as_mut(), &mut iter) };
            if img.is_null() {
                break;
            }
            image = Some(unsafe {
                let width = (*img).d_w as usize;
                let height = (*img).d_h as usize;
                let uv_width = width.div_ceil(2);
                let uv_height = height.div_ceil(2);
                let dims = [(width, height), (uv_width, uv_height), (uv_width, uv_height)];
                let planes = dims
                    .iter()
                    .enumerate()
                    .map(|(i, &(w, h))| {
                        (
                            copy_plane((*img).planes[i], (*img).stride[i], w, h),
                            w,
                        )
                    })
                    .collect();
                DecodedImage {
                    width: width as u32,
                    height: height as u32,
                    rotation: 0,
                    planes,
                }
            });
        }
        Ok(image)
    }

    fn destroy(&mut self) {
        if let Some(mut context) = self.context.take() {
            unsafe {
                vpx_codec_destroy(context.as_mut());
            }
        }
    }
}

impl Drop for Vp8Decoder {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Copy a plane out of a `vpx_image_t`, dropping the stride padding.
unsafe fn copy_plane(plane: *const u8, stride: i32, width: usize, height: usize) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(width * height);
    let mut row = plane;
    for _ in 0..height {
        buffer.extend_from_slice(std::slice::from_raw_parts(row, width));
        row = row.offset(stride as isize);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VideoPlane;

    fn gray_frame(width: u32, height: u32) -> VideoFrame {
        let (w, h) = (width as usize, height as usize);
        VideoFrame::new(
            width,
            height,
            vec![
                VideoPlane {
                    data: vec![128; w * h],
                    stride: w,
                },
                VideoPlane {
                    data: vec![128; w * h / 4],
                    stride: w / 2,
                },
                VideoPlane {
                    data: vec![128; w * h / 4],
                    stride: w / 2,
                },
            ],
            0,
        )
    }

    #[test]
    fn test_scale_i420_halves_planes() {
        let frame = gray_frame(64, 48);
        let scaled = scale_i420(&frame, 32, 24);
        assert_eq!(scaled.len(), 32 * 24 + 2 * 16 * 12);
        assert!(scaled.iter().all(|&b| b == 128));
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let engine = Vp8Engine;
        let mut encoder = engine.create_encoder().unwrap();
        let mut decoder = engine.create_decoder().unwrap();
        let payload = encoder.encode(&gray_frame(64, 48)).unwrap();
        assert!(engine.is_keyframe(&payload));

        let image = decoder.decode(&payload).unwrap().unwrap();
        assert_eq!((image.width, image.height), (64, 48));
        decoder.destroy();
        decoder.destroy();
    }
}
