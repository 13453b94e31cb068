//! Host-side data model: the input raster and the artifacts a run produces.

use crate::error::EqualizeError;
use crate::profiling::ProfilingReport;
use crate::stages::BIN_COUNT;

/// Single-channel 8-bit raster, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreyImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GreyImage {
    /// Wrap a pixel buffer, checking it matches the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, EqualizeError> {
        let expected = width as u64 * height as u64;
        if pixels.len() as u64 != expected {
            return Err(EqualizeError::invalid_input(format!(
                "malformed pixel data: {}x{} image needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel_count(&self) -> u64 {
        self.pixels.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Frequency of each pixel value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    bins: [u32; BIN_COUNT],
}

impl Histogram {
    pub fn from_bins(bins: [u32; BIN_COUNT]) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u32; BIN_COUNT] {
        &self.bins
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().map(|&c| c as u64).sum()
    }
}

/// Inclusive prefix sum of a [`Histogram`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativeHistogram {
    bins: [u32; BIN_COUNT],
}

impl CumulativeHistogram {
    pub fn from_bins(bins: [u32; BIN_COUNT]) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u32; BIN_COUNT] {
        &self.bins
    }

    /// Count for the last bin, i.e. the total pixel count.
    pub fn last(&self) -> u32 {
        self.bins[BIN_COUNT - 1]
    }

    pub fn is_non_decreasing(&self) -> bool {
        self.bins.windows(2).all(|w| w[0] <= w[1])
    }
}

/// Tone curve from input pixel value to output pixel value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lut {
    entries: [u8; BIN_COUNT],
}

impl Lut {
    /// Build from device words, rejecting anything above `max_output`.
    pub fn from_words(words: &[u32; BIN_COUNT], max_output: u8) -> Option<Self> {
        let mut entries = [0u8; BIN_COUNT];
        for (entry, &word) in entries.iter_mut().zip(words.iter()) {
            if word > max_output as u32 {
                return None;
            }
            *entry = word as u8;
        }
        Some(Self { entries })
    }

    pub fn identity() -> Self {
        let mut entries = [0u8; BIN_COUNT];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = i as u8;
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[u8; BIN_COUNT] {
        &self.entries
    }

    pub fn get(&self, value: u8) -> u8 {
        self.entries[value as usize]
    }

    pub fn is_non_decreasing(&self) -> bool {
        self.entries.windows(2).all(|w| w[0] <= w[1])
    }
}

/// Everything a successful run hands back to the caller.
#[derive(Debug, Clone)]
pub struct Equalization {
    pub output: GreyImage,
    pub histogram: Histogram,
    pub cumulative: CumulativeHistogram,
    pub lut: Lut,
    pub max_output: u8,
    pub profile: ProfilingReport,
}

impl Equalization {
    /// Check every artifact invariant against the input the run consumed.
    ///
    /// Returns a description of the first violation found.
    pub fn verify(&self, input: &GreyImage) -> Result<(), String> {
        let pixel_count = input.pixel_count();

        if self.histogram.total() != pixel_count {
            return Err(format!(
                "histogram sums to {}, expected {}",
                self.histogram.total(),
                pixel_count
            ));
        }

        let mut running = 0u64;
        for (i, (&count, &cumulative)) in self
            .histogram
            .bins()
            .iter()
            .zip(self.cumulative.bins().iter())
            .enumerate()
        {
            running += count as u64;
            if cumulative as u64 != running {
                return Err(format!(
                    "cumulative[{}] = {}, expected {}",
                    i, cumulative, running
                ));
            }
        }
        if self.cumulative.last() as u64 != pixel_count {
            return Err(format!(
                "cumulative total {} differs from pixel count {}",
                self.cumulative.last(),
                pixel_count
            ));
        }

        if !self.lut.is_non_decreasing() {
            return Err("lookup table is not monotonic".to_string());
        }
        if let Some(i) = self.lut.entries().iter().position(|&e| e > self.max_output) {
            return Err(format!(
                "lut[{}] = {} exceeds {}",
                i,
                self.lut.entries()[i],
                self.max_output
            ));
        }

        if self.output.width() != input.width() || self.output.height() != input.height() {
            return Err(format!(
                "output is {}x{}, input is {}x{}",
                self.output.width(),
                self.output.height(),
                input.width(),
                input.height()
            ));
        }
        if let Some(p) = input
            .pixels()
            .iter()
            .zip(self.output.pixels())
            .position(|(&i, &o)| self.lut.get(i) != o)
        {
            return Err(format!(
                "output[{}] = {}, lut gives {}",
                p,
                self.output.pixels()[p],
                self.lut.get(input.pixels()[p])
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grey_image_rejects_length_mismatch() {
        let err = GreyImage::new(2, 2, vec![0; 3]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_grey_image_allows_empty() {
        let image = GreyImage::new(0, 5, vec![]).unwrap();
        assert!(image.is_empty());
        assert_eq!(image.pixel_count(), 0);
    }

    #[test]
    fn test_lut_from_words_checks_ceiling() {
        let mut words = [0u32; BIN_COUNT];
        words[3] = 200;
        assert!(Lut::from_words(&words, 100).is_none());
        let lut = Lut::from_words(&words, 255).unwrap();
        assert_eq!(lut.get(3), 200);
    }

    #[test]
    fn test_identity_lut_is_monotonic() {
        let lut = Lut::identity();
        assert!(lut.is_non_decreasing());
        assert_eq!(lut.get(0), 0);
        assert_eq!(lut.get(255), 255);
    }

    #[test]
    fn test_verify_detects_broken_substitution() {
        let input = GreyImage::new(2, 1, vec![0, 1]).unwrap();
        let mut hist = [0u32; BIN_COUNT];
        hist[0] = 1;
        hist[1] = 1;
        let mut cumulative = [2u32; BIN_COUNT];
        cumulative[0] = 1;

        let mut result = Equalization {
            output: GreyImage::new(2, 1, vec![0, 1]).unwrap(),
            histogram: Histogram::from_bins(hist),
            cumulative: CumulativeHistogram::from_bins(cumulative),
            lut: Lut::identity(),
            max_output: 255,
            profile: ProfilingReport::default(),
        };
        assert!(result.verify(&input).is_ok());

        result.output = GreyImage::new(2, 1, vec![0, 9]).unwrap();
        let message = result.verify(&input).unwrap_err();
        assert!(message.contains("output[1]"));
    }

    #[test]
    fn test_verify_detects_wrong_total() {
        let input = GreyImage::new(1, 1, vec![4]).unwrap();
        let result = Equalization {
            output: input.clone(),
            histogram: Histogram::from_bins([0; BIN_COUNT]),
            cumulative: CumulativeHistogram::from_bins([0; BIN_COUNT]),
            lut: Lut::identity(),
            max_output: 255,
            profile: ProfilingReport::default(),
        };
        assert!(result.verify(&input).unwrap_err().contains("histogram sums"));
    }
}
