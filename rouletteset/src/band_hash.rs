// MIT License
//
// Copyright (c) 2025 Jai Veilleux
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use crate::roulette_set::{SetError, SetResult};

/// Maps a weight to the index of its dyadic band.
///
/// Band $k$ covers one octave, $[w_{\min} 2^k, w_{\min} 2^{k+1})$, so
/// `band_of` is $\lfloor \log_2(w / w_{\min}) \rfloor$. When the span
/// $w_{\max}/w_{\min}$ is an exact power of two, $w_{\max}$ would hash one
/// past the last band; it is folded back so the top band closes at
/// $w_{\max}$ exactly.
#[derive(Debug, Clone)]
pub(crate) struct BandHash {
    min_weight: f64,
    max_weight: f64,
    pow_two_span: bool,
}

impl BandHash {
    pub fn new(min_weight: f64, max_weight: f64) -> SetResult<Self> {
        if !(min_weight > 0.0) || !max_weight.is_finite() || max_weight < min_weight {
            return Err(SetError::InvalidRange {
                min: min_weight,
                max: max_weight,
            });
        }

        Ok(BandHash {
            min_weight,
            max_weight,
            pow_two_span: is_pow_two_f64(max_weight / min_weight),
        })
    }

    /// Band index for a weight already known to lie in `[min, max]`.
    #[inline]
    pub fn band_of(&self, weight: f64) -> usize {
        let mut idx = f64::floor(f64::log2(weight / self.min_weight)) as usize;
        if self.pow_two_span && weight == self.max_weight && idx > 0 {
            idx -= 1;
        }
        idx
    }
}

#[inline]
fn is_pow_two_f64(x: f64) -> bool {
    if !x.is_finite() || x <= 0.0 {
        return false;
    }
    // IEEE-754: a power of two has zero mantissa bits.
    (x.to_bits() & ((1u64 << 52) - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nonpositive_min() {
        assert!(BandHash::new(0.0, 8.0).is_err());
        assert!(BandHash::new(-1.0, 8.0).is_err());
        assert!(BandHash::new(f64::NAN, 8.0).is_err());
    }

    #[test]
    fn rejects_bad_max() {
        assert!(BandHash::new(2.0, 1.0).is_err());
        assert!(BandHash::new(1.0, f64::INFINITY).is_err());
        assert!(BandHash::new(1.0, f64::NAN).is_err());
    }

    #[test]
    fn degenerate_range_is_one_band() {
        let h = BandHash::new(3.0, 3.0).unwrap();
        // span of 1 is a power of two, but band 0 must not underflow
        assert_eq!(h.band_of(3.0), 0);
    }

    #[test]
    fn pow_two_detection() {
        assert!(is_pow_two_f64(1.0));
        assert!(is_pow_two_f64(2.0));
        assert!(is_pow_two_f64(1024.0));
        assert!(is_pow_two_f64(0.5));
        assert!(!is_pow_two_f64(3.0));
        assert!(!is_pow_two_f64(0.0));
        assert!(!is_pow_two_f64(-2.0));
        assert!(!is_pow_two_f64(f64::NAN));
        assert!(!is_pow_two_f64(f64::INFINITY));
    }

    #[test]
    fn band_of_pow_two_span() {
        let h = BandHash::new(1.0, 8.0).unwrap();
        assert_eq!(h.band_of(1.0), 0);
        assert_eq!(h.band_of(1.999), 0);
        assert_eq!(h.band_of(2.0), 1);
        assert_eq!(h.band_of(4.0), 2);
        // w == max on a power-of-two span folds into the last band
        assert_eq!(h.band_of(8.0), 2);
    }

    #[test]
    fn band_of_general_span() {
        let h = BandHash::new(1.0, 10.0).unwrap();
        assert_eq!(h.band_of(1.0), 0);
        assert_eq!(h.band_of(5.0), 2);
        assert_eq!(h.band_of(10.0), 3);
    }

    #[test]
    fn band_of_fractional_min() {
        let h = BandHash::new(0.5, 10.0).unwrap();
        assert_eq!(h.band_of(0.5), 0);
        assert_eq!(h.band_of(1.0), 1);
        assert_eq!(h.band_of(7.0), 3);
    }
}
