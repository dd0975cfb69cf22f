//! Image resampling through a similarity transform.
//!
//! For every output pixel `(col, row)` the inverse transform gives a source
//! coordinate, which is sampled with the configured [`Interpolation`]. Source
//! coordinates that fall outside the image are handled by an explicit
//! [`Boundary`] policy.
//!
//! Cubic interpolation is a true B-spline interpolation: each channel plane
//! is prefiltered into spline coefficients (mirror-symmetric extension) so
//! that sampling at integer coordinates returns the original pixel values.

use image::{DynamicImage, ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transform::SimilarityTransform;

/// sqrt(3) - 2, the pole of the cubic B-spline prefilter.
const CUBIC_POLE: f64 = -0.267_949_192_431_122_7;

/// Truncation tolerance for the causal initialisation of the prefilter.
const PREFILTER_TOLERANCE: f64 = 1e-9;

/// Slack when deciding whether a coordinate lies inside the image.
const EDGE_EPSILON: f64 = 1e-6;

/// Resampling kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Order 0.
    Nearest,
    /// Order 1.
    Bilinear,
    /// Order 3, cubic B-spline.
    #[default]
    Bicubic,
}

impl Interpolation {
    pub fn order(&self) -> u8 {
        match self {
            Interpolation::Nearest => 0,
            Interpolation::Bilinear => 1,
            Interpolation::Bicubic => 3,
        }
    }

    pub fn from_order(order: u8) -> Option<Self> {
        match order {
            0 => Some(Interpolation::Nearest),
            1 => Some(Interpolation::Bilinear),
            3 => Some(Interpolation::Bicubic),
            _ => None,
        }
    }
}

/// What to produce for source coordinates outside `[0, w-1] x [0, h-1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Fill with a constant, given in the image's native value range.
    Constant(f32),
    /// Mirror the coordinate about the edge pixel centres.
    Reflect,
    /// Clamp the coordinate to the nearest edge pixel.
    Edge,
}

impl Default for Boundary {
    fn default() -> Self {
        Boundary::Constant(0.0)
    }
}

/// Conversion between a channel's native representation and `f32`.
pub trait Channel: Copy {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Channel for u8 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, u8::MAX as f32) as u8
    }
}

impl Channel for u16 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, u16::MAX as f32) as u16
    }
}

impl Channel for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(v: f32) -> Self {
        v
    }
}

/// One channel of an image, row-major.
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    #[inline]
    fn at(&self, x: i64, y: i64) -> f32 {
        let xi = mirror_index(x, self.width);
        let yi = mirror_index(y, self.height);
        self.data[yi * self.width + xi]
    }

    fn sample(&self, x: f64, y: f64, interpolation: Interpolation) -> f32 {
        match interpolation {
            Interpolation::Nearest => self.at(x.round() as i64, y.round() as i64),
            Interpolation::Bilinear => {
                let x0 = x.floor();
                let y0 = y.floor();
                let fx = (x - x0) as f32;
                let fy = (y - y0) as f32;
                let (x0, y0) = (x0 as i64, y0 as i64);

                let top = self.at(x0, y0) * (1.0 - fx) + self.at(x0 + 1, y0) * fx;
                let bottom = self.at(x0, y0 + 1) * (1.0 - fx) + self.at(x0 + 1, y0 + 1) * fx;
                top * (1.0 - fy) + bottom * fy
            }
            Interpolation::Bicubic => {
                let x0 = x.floor();
                let y0 = y.floor();
                let wx = bspline_weights(x - x0);
                let wy = bspline_weights(y - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);

                let mut acc = 0.0f64;
                for (j, wyj) in wy.iter().enumerate() {
                    let row = y0 - 1 + j as i64;
                    let mut line = 0.0f64;
                    for (i, wxi) in wx.iter().enumerate() {
                        line += *wxi * self.at(x0 - 1 + i as i64, row) as f64;
                    }
                    acc += *wyj * line;
                }
                acc as f32
            }
        }
    }
}

/// Whole-sample symmetric index folding: `... 2 1 | 0 1 2 ... n-1 | n-2 ...`.
#[inline]
fn mirror_index(i: i64, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let last = n as i64 - 1;
    let period = 2 * last;
    let m = i.rem_euclid(period);
    (if m > last { period - m } else { m }) as usize
}

fn reflect_coordinate(v: f64, n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let last = (n - 1) as f64;
    let m = v.rem_euclid(2.0 * last);
    if m > last {
        2.0 * last - m
    } else {
        m
    }
}

/// Cubic B-spline weights for taps at offsets -1, 0, 1, 2 from `floor(x)`.
#[inline]
fn bspline_weights(t: f64) -> [f64; 4] {
    let u = 1.0 - t;
    [
        u * u * u / 6.0,
        2.0 / 3.0 - t * t + t * t * t / 2.0,
        2.0 / 3.0 - u * u + u * u * u / 2.0,
        t * t * t / 6.0,
    ]
}

fn initial_causal_coefficient(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    let horizon = (PREFILTER_TOLERANCE.ln() / z.abs().ln()).ceil() as usize;

    if horizon < n {
        let mut zn = z;
        let mut sum = c[0];
        for v in &c[1..horizon] {
            sum += zn * v;
            zn *= z;
        }
        sum
    } else {
        let iz = 1.0 / z;
        let mut zn = z;
        let mut z2n = z.powi(n as i32 - 1);
        let mut sum = c[0] + z2n * c[n - 1];
        z2n *= z2n * iz;
        for v in &c[1..n - 1] {
            sum += (zn + z2n) * v;
            zn *= z;
            z2n *= iz;
        }
        sum / (1.0 - zn * zn)
    }
}

/// Turn samples into cubic B-spline coefficients in place.
fn prefilter_line(c: &mut [f64]) {
    let n = c.len();
    if n < 2 {
        return;
    }
    let z = CUBIC_POLE;
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    for v in c.iter_mut() {
        *v *= gain;
    }

    c[0] = initial_causal_coefficient(c, z);
    for k in 1..n {
        c[k] += z * c[k - 1];
    }

    c[n - 1] = (z / (z * z - 1.0)) * (z * c[n - 2] + c[n - 1]);
    for k in (0..n - 1).rev() {
        c[k] = z * (c[k + 1] - c[k]);
    }
}

fn prefilter_plane(plane: &mut Plane) {
    let (w, h) = (plane.width, plane.height);

    let mut line = vec![0.0f64; w];
    for y in 0..h {
        let row = &mut plane.data[y * w..(y + 1) * w];
        for (dst, src) in line.iter_mut().zip(row.iter()) {
            *dst = *src as f64;
        }
        prefilter_line(&mut line);
        for (dst, src) in row.iter_mut().zip(line.iter()) {
            *dst = *src as f32;
        }
    }

    let mut column = vec![0.0f64; h];
    for x in 0..w {
        for y in 0..h {
            column[y] = plane.data[y * w + x] as f64;
        }
        prefilter_line(&mut column);
        for y in 0..h {
            plane.data[y * w + x] = column[y] as f32;
        }
    }
}

fn split_planes<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> Vec<Plane>
where
    P: Pixel,
    P::Subpixel: Channel,
{
    let (w, h) = image.dimensions();
    let channels = P::CHANNEL_COUNT as usize;
    let mut planes: Vec<Plane> = (0..channels)
        .map(|_| Plane {
            width: w as usize,
            height: h as usize,
            data: Vec::with_capacity((w * h) as usize),
        })
        .collect();

    for pixel in image.pixels() {
        for (plane, value) in planes.iter_mut().zip(pixel.channels()) {
            plane.data.push(value.to_f32());
        }
    }
    planes
}

/// Smallest and largest source sample over all channels, widened to
/// include the constant fill.
fn value_range(planes: &[Plane], boundary: Boundary) -> (f32, f32) {
    let (mut lo, mut hi) = planes
        .iter()
        .flat_map(|p| p.data.iter().copied())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if let Boundary::Constant(fill) = boundary {
        lo = lo.min(fill);
        hi = hi.max(fill);
    }
    if lo > hi {
        return (f32::NEG_INFINITY, f32::INFINITY);
    }
    (lo, hi)
}

/// Resample `image` into an `output_size` raster.
///
/// `inverse` maps output pixel coordinates into source coordinates. The
/// result has the same pixel format as the input. Interpolated values are
/// clipped to the range spanned by the source samples (and the fill value
/// for [`Boundary::Constant`]), so cubic overshoot never leaves it. The only
/// failure is a zero output dimension.
pub fn warp<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    inverse: &SimilarityTransform,
    output_size: (u32, u32),
    interpolation: Interpolation,
    boundary: Boundary,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>>
where
    P: Pixel,
    P::Subpixel: Channel,
{
    let (out_w, out_h) = output_size;
    if out_w == 0 || out_h == 0 {
        return Err(Error::InvalidOutputSize {
            width: out_w,
            height: out_h,
        });
    }

    let (src_w, src_h) = image.dimensions();
    let mut output = ImageBuffer::<P, Vec<P::Subpixel>>::new(out_w, out_h);
    let fill = match boundary {
        Boundary::Constant(v) => v,
        _ => 0.0,
    };

    if src_w == 0 || src_h == 0 {
        for pixel in output.pixels_mut() {
            for c in pixel.channels_mut() {
                *c = P::Subpixel::from_f32(fill);
            }
        }
        return Ok(output);
    }

    let mut planes = split_planes(image);
    let (lo, hi) = value_range(&planes, boundary);
    if interpolation == Interpolation::Bicubic {
        for plane in planes.iter_mut() {
            prefilter_plane(plane);
        }
    }

    let max_x = (src_w - 1) as f64;
    let max_y = (src_h - 1) as f64;

    for (col, row, pixel) in output.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply_xy(col as f64, row as f64);

        let source = match boundary {
            Boundary::Constant(_) => {
                let inside = sx >= -EDGE_EPSILON
                    && sy >= -EDGE_EPSILON
                    && sx <= max_x + EDGE_EPSILON
                    && sy <= max_y + EDGE_EPSILON;
                inside.then(|| (sx.clamp(0.0, max_x), sy.clamp(0.0, max_y)))
            }
            Boundary::Reflect => Some((
                reflect_coordinate(sx, src_w as usize),
                reflect_coordinate(sy, src_h as usize),
            )),
            Boundary::Edge => Some((sx.clamp(0.0, max_x), sy.clamp(0.0, max_y))),
        };

        for (c, plane) in pixel.channels_mut().iter_mut().zip(planes.iter()) {
            let value = match source {
                Some((x, y)) => plane.sample(x, y, interpolation).clamp(lo, hi),
                None => fill,
            };
            *c = P::Subpixel::from_f32(value);
        }
    }

    Ok(output)
}

/// [`warp`] for any decoded image, preserving its pixel format.
///
/// Formats without a dedicated branch are resampled as 32-bit float RGBA.
pub fn warp_dynamic(
    image: &DynamicImage,
    inverse: &SimilarityTransform,
    output_size: (u32, u32),
    interpolation: Interpolation,
    boundary: Boundary,
) -> Result<DynamicImage> {
    let (inv, size, i, b) = (inverse, output_size, interpolation, boundary);

    Ok(match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageLuma16(buf) => DynamicImage::ImageLuma16(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageLumaA16(buf) => {
            DynamicImage::ImageLumaA16(warp(buf, inv, size, i, b)?)
        }
        DynamicImage::ImageRgb16(buf) => DynamicImage::ImageRgb16(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageRgba16(buf) => DynamicImage::ImageRgba16(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageRgb32F(buf) => DynamicImage::ImageRgb32F(warp(buf, inv, size, i, b)?),
        DynamicImage::ImageRgba32F(buf) => {
            DynamicImage::ImageRgba32F(warp(buf, inv, size, i, b)?)
        }
        other => DynamicImage::ImageRgba32F(warp(&other.to_rgba32f(), inv, size, i, b)?),
    })
}
