//! Byte-to-pixel decoders with auto-contrast
//!
//! The true sensor encoding is unknown, so the viewer offers four
//! interpretations of a frame and lets the user flip between them:
//!
//! - **Raw**: one byte per pixel
//! - **Deinterleave even/odd**: every second byte, starting at 0 or 1
//! - **16-bit LE**: byte pairs as little-endian samples
//!
//! Every mode stretches the observed `[min, max]` of its samples onto
//! `[0, 255]` and writes opaque gray ARGB8888 pixels.

use crate::config::DecodeMode;

/// Opaque gray pixel in ARGB8888
#[inline]
pub fn gray_argb(v: u8) -> u32 {
    let v = v as u32;
    0xFF00_0000 | (v << 16) | (v << 8) | v
}

/// Render `src` into `dst` as a `width x height` gray image
///
/// `dst` is cleared to black first, so pixels past the decoded sample count
/// stay black. Nothing outside `dst` or `src` is ever touched, whatever the
/// dimensions.
///
/// # Arguments
///
/// * `src` - Frame bytes (metadata already stripped)
/// * `dst` - Output ARGB buffer, at least `width * height` pixels to show
///   a full image
/// * `width` - Output width in pixels
/// * `height` - Output height in pixels
/// * `mode` - Byte interpretation
///
/// # Returns
///
/// Number of pixels written
pub fn render_frame(
    src: &[u8],
    dst: &mut [u32],
    width: usize,
    height: usize,
    mode: DecodeMode,
) -> usize {
    let npix = width.saturating_mul(height).min(dst.len());
    let dst = &mut dst[..npix];
    dst.fill(0);

    if src.len() < 2 {
        return 0;
    }

    match mode {
        DecodeMode::Raw => write_stretched(src.iter().map(|&b| b as u32), dst),
        DecodeMode::DeinterleaveEven => {
            write_stretched(src.iter().step_by(2).map(|&b| b as u32), dst)
        }
        DecodeMode::DeinterleaveOdd => {
            write_stretched(src.iter().skip(1).step_by(2).map(|&b| b as u32), dst)
        }
        DecodeMode::Le16 => write_stretched(
            src.chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as u32),
            dst,
        ),
    }
}

/// Contrast-stretch `samples` into `dst`, returns pixels written
fn write_stretched<I>(samples: I, dst: &mut [u32]) -> usize
where
    I: Iterator<Item = u32> + Clone,
{
    let limit = dst.len();
    let Some((min, max)) = samples
        .clone()
        .take(limit)
        .fold(None, |acc: Option<(u32, u32)>, s| match acc {
            None => Some((s, s)),
            Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
        })
    else {
        return 0;
    };
    let range = (max - min).max(1);

    let mut written = 0;
    for (pixel, sample) in dst.iter_mut().zip(samples) {
        let v = ((sample - min) * 255 / range).min(255) as u8;
        *pixel = gray_argb(v);
        written += 1;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BLACK: u32 = 0;

    fn gray(pixel: u32) -> u8 {
        (pixel & 0xFF) as u8
    }

    #[test]
    fn test_gray_argb() {
        assert_eq!(gray_argb(0), 0xFF00_0000);
        assert_eq!(gray_argb(0xFF), 0xFFFF_FFFF);
        assert_eq!(gray_argb(0x80), 0xFF80_8080);
    }

    #[test]
    fn test_raw_stretches_to_full_range() {
        let src = [10u8, 20, 30, 40];
        let mut dst = vec![0xDEAD_BEEFu32; 8];
        let written = render_frame(&src, &mut dst, 4, 2, DecodeMode::Raw);

        assert_eq!(written, 4);
        assert_eq!(gray(dst[0]), 0);
        assert_eq!(gray(dst[1]), 85);
        assert_eq!(gray(dst[2]), 170);
        assert_eq!(gray(dst[3]), 255);
        // Remainder cleared to black
        assert!(dst[4..].iter().all(|&p| p == BLACK));
    }

    #[test]
    fn test_uniform_input_is_defined() {
        let src = vec![0x77u8; 64];
        for mode in DecodeMode::ALL {
            let mut dst = vec![1u32; 64];
            render_frame(&src, &mut dst, 8, 8, mode);
            assert!(dst.iter().all(|&p| p == gray_argb(0) || p == BLACK));
        }
    }

    #[test]
    fn test_deinterleave_even_and_odd() {
        let src = [0u8, 200, 100, 150, 50, 100];
        let mut dst = vec![0u32; 3];

        assert_eq!(render_frame(&src, &mut dst, 3, 1, DecodeMode::DeinterleaveEven), 3);
        assert_eq!(
            dst.iter().map(|&p| gray(p)).collect::<Vec<_>>(),
            vec![0, 255, 127]
        );

        assert_eq!(render_frame(&src, &mut dst, 3, 1, DecodeMode::DeinterleaveOdd), 3);
        assert_eq!(
            dst.iter().map(|&p| gray(p)).collect::<Vec<_>>(),
            vec![255, 127, 0]
        );
    }

    #[test]
    fn test_deinterleave_odd_length_source() {
        // Even offsets of a 5-byte source: 3 samples; odd offsets: 2
        let src = [1u8, 2, 3, 4, 5];
        let mut dst = vec![0u32; 10];
        assert_eq!(render_frame(&src, &mut dst, 10, 1, DecodeMode::DeinterleaveEven), 3);
        assert_eq!(render_frame(&src, &mut dst, 10, 1, DecodeMode::DeinterleaveOdd), 2);
    }

    #[test]
    fn test_le16_uses_full_sample_range() {
        // 0x0000, 0x0100, 0x0200: high byte carries the signal
        let src = [0x00u8, 0x00, 0x00, 0x01, 0x00, 0x02, 0xFF];
        let mut dst = vec![0u32; 4];
        let written = render_frame(&src, &mut dst, 4, 1, DecodeMode::Le16);

        // Trailing odd byte ignored
        assert_eq!(written, 3);
        assert_eq!(gray(dst[0]), 0);
        assert_eq!(gray(dst[1]), 127);
        assert_eq!(gray(dst[2]), 255);
        assert_eq!(dst[3], BLACK);
    }

    #[test]
    fn test_short_source_clears_only() {
        let mut dst = vec![0x1234u32; 4];
        assert_eq!(render_frame(&[0xFF], &mut dst, 2, 2, DecodeMode::Raw), 0);
        assert!(dst.iter().all(|&p| p == BLACK));
    }

    #[test]
    fn test_never_writes_past_destination() {
        let src = vec![0xABu8; 10_000];
        let mut dst = vec![0u32; 16];
        for mode in DecodeMode::ALL {
            assert!(render_frame(&src, &mut dst, 642, 480, mode) <= 16);
        }
    }

    #[test]
    fn test_only_populated_region_cleared() {
        let mut dst = vec![7u32; 12];
        render_frame(&[1, 2, 3], &mut dst, 2, 2, DecodeMode::Raw);
        assert_eq!(&dst[4..], &[7u32; 8]);
    }

    #[test]
    fn test_stretch_uses_only_displayed_samples() {
        // The bright tail is not displayed and must not compress the range
        let mut src = vec![10u8, 20];
        src.extend_from_slice(&[250u8; 50]);
        let mut dst = vec![0u32; 2];
        render_frame(&src, &mut dst, 2, 1, DecodeMode::Raw);
        assert_eq!(gray(dst[0]), 0);
        assert_eq!(gray(dst[1]), 255);
    }

    proptest! {
        #[test]
        fn prop_pixels_are_opaque_gray(
            src in proptest::collection::vec(any::<u8>(), 0..2000),
            width in 0usize..64,
            height in 0usize..64,
            mode_index in 0usize..4,
        ) {
            let mode = DecodeMode::ALL[mode_index];
            let mut dst = vec![0u32; 1024];
            let written = render_frame(&src, &mut dst, width, height, mode);

            prop_assert!(written <= (width * height).min(dst.len()));
            for &p in &dst[..written] {
                prop_assert_eq!(p >> 24, 0xFF);
                let v = p & 0xFF;
                prop_assert_eq!((p >> 8) & 0xFF, v);
                prop_assert_eq!((p >> 16) & 0xFF, v);
            }
        }
    }
}
