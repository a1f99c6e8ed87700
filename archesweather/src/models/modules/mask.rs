//! Attention mask for cyclic-shifted 3D windows.

use core::ops::Range;

use burn::prelude::*;

use super::window::{window_partition, WindowGeometry};
use crate::error::{ArchesWeatherError, ArchesWeatherResult};

/// Additive score for token pairs that were not adjacent before the shift.
pub const MASKED_SCORE: f32 = -100.0;

/// Builds the additive attention mask for a shifted window layout.
///
/// Every position of the padded volume is labelled with the region it falls
/// into once the volume is rolled by `-shift`; two tokens of the same window
/// may attend to each other only if their labels agree. Levels and latitudes
/// are always labelled. Longitudes are labelled only for a limited-area
/// domain, a global grid being periodic in longitude.
///
/// # Arguments
/// - `padded`: `(Z, H, W)` of the padded volume, each a multiple of the window
/// - `shift`: the cyclic shift, one entry per axis
///
/// # Returns
/// `[Z/wz, (H/wh)·(W/ww), N, N]` with `N = wz·wh·ww`, filled with `0` or
/// [`MASKED_SCORE`].
///
/// # Errors
/// [`ArchesWeatherError::InvalidShiftSize`] unless `shift` has three entries.
pub fn generate_3d_attention_mask<B: Backend>(
    padded: [usize; 3],
    window: &WindowGeometry,
    shift: &[usize],
    limited_area: bool,
    device: &B::Device,
) -> ArchesWeatherResult<Tensor<B, 4>> {
    let shift: [usize; 3] = shift
        .try_into()
        .map_err(|_| ArchesWeatherError::InvalidShiftSize {
            shift: shift.to_vec(),
        })?;

    Ok(shifted_window_mask(padded, window, shift, limited_area, device))
}

pub(crate) fn shifted_window_mask<B: Backend>(
    padded: [usize; 3],
    window: &WindowGeometry,
    shift: [usize; 3],
    limited_area: bool,
    device: &B::Device,
) -> Tensor<B, 4> {
    let [z, h, w] = padded;
    let size = window.size();

    let level_regions = shift_regions(z, size[0], shift[0]);
    let lat_regions = shift_regions(h, size[1], shift[1]);
    let lon_regions = if limited_area {
        shift_regions(w, size[2], shift[2])
    } else {
        vec![0..w]
    };

    let mut img_mask: Tensor<B, 5> = Tensor::zeros([1, z, h, w, 1], device);
    let mut cnt = 0;
    for zr in &level_regions {
        for hr in &lat_regions {
            for wr in &lon_regions {
                if !zr.is_empty() && !hr.is_empty() && !wr.is_empty() {
                    img_mask = img_mask.slice_assign(
                        [0..1, zr.clone(), hr.clone(), wr.clone(), 0..1],
                        Tensor::full([1, zr.len(), hr.len(), wr.len(), 1], cnt, device),
                    );
                }
                cnt += 1;
            }
        }
    }

    let n = window.volume();
    let [nz, nh, nw] = window.counts(padded);
    let mask_windows = window_partition(img_mask, window).reshape([nz * nh * nw, n]);
    let diff: Tensor<B, 3> =
        mask_windows.clone().unsqueeze_dim(1) - mask_windows.unsqueeze_dim(2);

    Tensor::zeros([nz * nh * nw, n, n], device)
        .mask_fill(diff.not_equal_elem(0.0), MASKED_SCORE)
        .reshape([nz, nh * nw, n, n])
}

/// `[0, -window)`, `[-window, -shift)` and `[-shift, end)` as absolute ranges.
fn shift_regions(len: usize, window: usize, shift: usize) -> Vec<Range<usize>> {
    let window_start = len.saturating_sub(window);
    let shift_start = len.saturating_sub(shift);
    vec![0..window_start, window_start..shift_start, shift_start..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn mask_values(mask: Tensor<TestBackend, 4>) -> Vec<f32> {
        mask.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn mask_has_expected_shape() {
        let device = Default::default();
        let window = WindowGeometry::new([2, 6, 12]).unwrap();

        let mask = generate_3d_attention_mask::<TestBackend>(
            [8, 36, 72],
            &window,
            &window.shift(),
            false,
            &device,
        )
        .unwrap();

        assert_eq!(mask.dims(), [4, 6 * 6, 144, 144]);
    }

    #[test]
    fn shift_must_be_three_dimensional() {
        let device = Default::default();
        let window = WindowGeometry::new([2, 6, 12]).unwrap();

        let result = generate_3d_attention_mask::<TestBackend>(
            [8, 36, 72],
            &window,
            &[1, 3],
            false,
            &device,
        );

        assert_eq!(
            result.unwrap_err(),
            ArchesWeatherError::InvalidShiftSize { shift: vec![1, 3] }
        );
    }

    #[test]
    fn mask_is_symmetric_with_zero_diagonal() {
        let device = Default::default();
        let window = WindowGeometry::new([2, 2, 4]).unwrap();

        for limited_area in [false, true] {
            let mask = generate_3d_attention_mask::<TestBackend>(
                [4, 4, 8],
                &window,
                &window.shift(),
                limited_area,
                &device,
            )
            .unwrap();
            let [nz, nwin, n, _] = mask.dims();

            mask.clone()
                .to_data()
                .assert_eq(&mask.clone().swap_dims(2, 3).to_data(), true);

            let values = mask_values(mask);
            for w in 0..nz * nwin {
                for i in 0..n {
                    assert_eq!(values[w * n * n + i * n + i], 0.0);
                }
            }
            assert!(values.iter().all(|&v| v == 0.0 || v == MASKED_SCORE));
        }
    }

    #[test]
    fn interior_windows_are_unmasked() {
        let device = Default::default();
        let window = WindowGeometry::new([2, 2, 2]).unwrap();

        // Only the last window along each axis straddles the wrap-around.
        let mask = generate_3d_attention_mask::<TestBackend>(
            [4, 4, 4],
            &window,
            &window.shift(),
            true,
            &device,
        )
        .unwrap();

        let first = mask.clone().slice([0..1, 0..1, 0..8, 0..8]);
        assert_eq!(first.abs().sum().into_scalar(), 0.0);

        let last = mask.slice([1..2, 3..4, 0..8, 0..8]);
        assert!(last.abs().sum().into_scalar() > 0.0);
    }

    #[test]
    fn longitude_is_periodic_on_global_grid() {
        let device = Default::default();
        let window = WindowGeometry::new([1, 1, 4]).unwrap();

        // Level and latitude windows of 1 leave nothing to mask globally.
        let global = generate_3d_attention_mask::<TestBackend>(
            [1, 1, 8],
            &window,
            &window.shift(),
            false,
            &device,
        )
        .unwrap();
        assert_eq!(global.abs().sum().into_scalar(), 0.0);

        let limited = generate_3d_attention_mask::<TestBackend>(
            [1, 1, 8],
            &window,
            &window.shift(),
            true,
            &device,
        )
        .unwrap();
        let values = mask_values(limited);
        // The last longitude window mixes columns [6, 8) with wrapped columns [0, 2).
        let last = &values[16..32];
        assert_eq!(last[1], 0.0);
        assert_eq!(last[2], MASKED_SCORE);
        assert_eq!(last[2 * 4 + 3], 0.0);
    }
}
