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

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32 as RngType;
use thiserror::Error;

#[cfg(feature = "shared_rng")]
use std::cell::RefCell;

use std::collections::HashMap;
use std::hash::Hash;

use crate::band::Band;
use crate::band_hash::BandHash;
use crate::sum_tree::SumTree;

type BandIndex = usize;
type SlotIndex = usize;
type Position = (BandIndex, SlotIndex);

/// Result alias for fallible set operations.
pub type SetResult<T> = Result<T, SetError>;

// All instances share the same rng stream (per thread), reseedable through
// `seed_shared`.
#[cfg(feature = "shared_rng")]
thread_local! {
    static GEN: RefCell<RngType> = RefCell::new(RngType::from_seed(rand::random()));
}

/// Reseeds the thread-shared generator used by **all** instances.
#[cfg(feature = "shared_rng")]
pub fn seed_shared(seed: u64) {
    GEN.with(|g| *g.borrow_mut() = RngType::seed_from_u64(seed));
}

/// Errors that can occur within the sampling set.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SetError {
    /// Construction with a non-positive minimum, a non-finite maximum, or
    /// an inverted range.
    #[error("invalid weight range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },
    /// A weight outside the range fixed at construction. The set is
    /// unchanged.
    #[error("weight {weight} outside allowed range [{min}, {max}]")]
    WeightOutOfRange { weight: f64, min: f64, max: f64 },
    /// Sampling from an empty set.
    #[error("the set is empty")]
    Empty,
    /// The queried element is not in the set.
    #[error("element not found in the set")]
    NotFound,
    /// The iteration cursor is past the last element.
    #[error("iterated past the end of the set")]
    EndOfIteration,
}

/// A weighted set that supports fast sampling *with replacement*
/// with probability proportional to item weights.
///
/// This implements the composition–rejection sampler of
/// St-Onge et al., *Comput. Phys. Commun.* 240 (2019) 30-37
/// (DOI: [10.1016/j.cpc.2019.02.008](https://doi.org/10.1016/j.cpc.2019.02.008)),
/// specialized with **dyadic (power-of-two) weight bands**.
///
/// # Model
/// Store pairs $(x_i, w_i)$ with $w_{\min} \le w_i \le w_{\max}$, both bounds
/// fixed at construction. Items are partitioned by weight scale into bands
/// $B_k$, approximately:
///
/// - $B_k = \[i \mid 2^k \cdot w_{\min} \le w_i < 2^{k+1} \cdot w_{\min} \]$
///   for $k = 0,\dots,G-2$,
/// - $B_{G-1}$ covers the top range, closing at $w_{\max}$ exactly.
///
/// For each band $k$, the set maintains its total $S_k = \sum_{i \in B_k} w_i$
/// in a prefix-sum tree over bands, and a ceiling $m_k \ge w_i$ for all
/// $i \in B_k$ (about $2^{k+1} w_{\min}$; the last band uses $w_{\max}$).
///
/// # Sampling (composition–rejection)
/// 1. **Composition:** choose a band $g$ with probability $S_g / S$ by an
///    inverse-CDF descent of the prefix-sum tree (logarithmic in the number
///    of bands).
/// 2. **Rejection:** pick a slot uniformly within $B_g$ and accept it with
///    probability $w_j / m_g$; otherwise retry in the same band. Dyadic
///    banding keeps $w_j$ within a factor two of $m_g$, so acceptance needs
///    $\mathcal{O}(1)$ expected trials.
///
/// # Complexity
/// Let $W = w_{\max}/w_{\min}$ and $G = \lfloor \log_2 W \rfloor + 1$.
/// Sampling costs $\mathcal{O}(\log G) = \mathcal{O}(\log\log W)$ plus an
/// expected-constant rejection step; insert, erase, and `set_weight` update
/// one leaf-to-root path in $\mathcal{O}(\log G)$ and one band in
/// $\mathcal{O}(1)$. None of these depend on the number of elements.
///
/// # Floating-point drift
/// The tree accumulates weights by repeated addition and subtraction, so
/// after many mutations [`total_weight`](RouletteSet::total_weight) may
/// deviate from the exact sum of live weights by a small relative amount.
/// This is not an error; `clear` followed by re-insertion re-sums exactly.
///
/// # Examples
/// ```
/// use rouletteset::RouletteSet;
///
/// let mut s = RouletteSet::<u64>::new(1.0, 8.0).unwrap();
/// s.insert(&1, 3.0).unwrap();
/// s.insert(&2, 5.0).unwrap();
///
/// // Draw one sample (with replacement)
/// let draw = s.sample();
/// assert!(draw.is_ok());
///
/// // Deterministic iteration over stored items
/// for (k, w) in &s {
///     let _ = (k, w);
/// }
/// ```
#[derive(Debug)]
pub struct RouletteSet<T>
where
    T: Clone + Eq + Hash,
{
    min_weight: f64,
    max_weight: f64,

    #[cfg(not(feature = "shared_rng"))]
    rng: RngType,

    hash: BandHash,
    bands: Vec<Band<T>>,
    positions: HashMap<T, Position>,
    tree: SumTree,

    // Iteration cursor; `None` is the end state. Every mutation bumps
    // `epoch` so a stale cursor is caught in debug builds.
    cursor: Option<Position>,
    cursor_epoch: u64,
    epoch: u64,
}

impl<T> RouletteSet<T>
where
    T: Clone + Eq + Hash,
{
    /// Creates an empty set accepting weights in `[min_weight, max_weight]`.
    ///
    /// The band layout is fixed here and never resized. The owned generator
    /// is seeded from OS entropy; use [`RouletteSet::with_seed`] for
    /// reproducible streams.
    ///
    /// Returns [`SetError::InvalidRange`] if `min_weight <= 0`, `max_weight`
    /// is not finite, or `max_weight < min_weight`.
    pub fn new(min_weight: f64, max_weight: f64) -> SetResult<Self> {
        let (hash, bands, tree) = Self::scaffold(min_weight, max_weight)?;
        Ok(RouletteSet {
            min_weight,
            max_weight,
            #[cfg(not(feature = "shared_rng"))]
            rng: RngType::from_os_rng(),
            hash,
            bands,
            positions: HashMap::new(),
            tree,
            cursor: None,
            cursor_epoch: 0,
            epoch: 0,
        })
    }

    /// Creates an empty set whose owned generator starts from `seed`.
    #[cfg(not(feature = "shared_rng"))]
    pub fn with_seed(min_weight: f64, max_weight: f64, seed: u64) -> SetResult<Self> {
        let mut set = Self::new(min_weight, max_weight)?;
        set.rng = RngType::seed_from_u64(seed);
        Ok(set)
    }

    /// Creates a set from an iterator of `(element, weight)` pairs.
    ///
    /// Stops at the first out-of-range weight, returning
    /// [`SetError::WeightOutOfRange`].
    pub fn from_pairs<I>(min_weight: f64, max_weight: f64, pairs: I) -> SetResult<Self>
    where
        I: IntoIterator<Item = (T, f64)>,
    {
        let mut set = Self::new(min_weight, max_weight)?;
        for (element, weight) in pairs {
            set.insert(&element, weight)?;
        }
        Ok(set)
    }

    fn scaffold(min_weight: f64, max_weight: f64) -> SetResult<(BandHash, Vec<Band<T>>, SumTree)> {
        let hash = BandHash::new(min_weight, max_weight)?;
        let n_bands = hash.band_of(max_weight) + 1;

        let mut bands = Vec::with_capacity(n_bands);
        let mut ceiling = 2.0 * min_weight;
        for band_idx in 0..n_bands {
            let is_last = band_idx + 1 == n_bands;
            bands.push(Band::new(if is_last { max_weight } else { ceiling }));
            ceiling *= 2.0;
        }

        Ok((hash, bands, SumTree::new(n_bands)))
    }

    /// Returns the number of elements in the set.
    pub fn size(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Checks if the element exists in the set.
    #[inline]
    pub fn contains(&self, element: &T) -> bool {
        self.positions.contains_key(element)
    }

    /// Number of stored copies of `element`: 0 or 1.
    #[inline]
    pub fn count(&self, element: &T) -> usize {
        usize::from(self.positions.contains_key(element))
    }

    /// Smallest admissible weight, fixed at construction.
    pub fn min_weight(&self) -> f64 {
        self.min_weight
    }

    /// Largest admissible weight, fixed at construction.
    pub fn max_weight(&self) -> f64 {
        self.max_weight
    }

    /// Returns the total weight of the set.
    ///
    /// Subject to floating-point drift after many mutations; see the
    /// type-level docs.
    pub fn total_weight(&self) -> f64 {
        self.tree.total()
    }

    /// Returns the weight of the given element.
    ///
    /// Returns [`SetError::NotFound`] if the element is not in the set.
    pub fn get_weight(&self, element: &T) -> SetResult<f64> {
        let &(band_idx, slot) = self.positions.get(element).ok_or(SetError::NotFound)?;
        Ok(self.bands[band_idx].get(slot).1)
    }

    /// Inserts an element into the set with the given weight.
    ///
    /// Returns `true` on success, `false` when the element was already
    /// present (its stored weight is kept; use
    /// [`set_weight`](RouletteSet::set_weight) to change it).
    ///
    /// Returns [`SetError::WeightOutOfRange`] if the weight is invalid; the
    /// set is unchanged in that case.
    pub fn insert(&mut self, element: &T, weight: f64) -> SetResult<bool> {
        self.check_weight(weight)?;
        if self.positions.contains_key(element) {
            return Ok(false);
        }
        self.epoch += 1;

        let band_idx = self.hash.band_of(weight);
        let slot = self.bands[band_idx].push(element.clone(), weight);
        self.positions.insert(element.clone(), (band_idx, slot));
        self.tree.add(band_idx, weight);

        Ok(true)
    }

    /// Sets the weight of an element, inserting it if absent.
    ///
    /// The element may move to a different band; any iteration cursor and
    /// ordering observed before this call are invalidated.
    ///
    /// Returns [`SetError::WeightOutOfRange`] before any mutation if the
    /// weight is invalid.
    pub fn set_weight(&mut self, element: &T, weight: f64) -> SetResult<()> {
        self.check_weight(weight)?;
        self.erase(element);
        self.insert(element, weight)?;
        Ok(())
    }

    /// Erases an element from the set, if present.
    ///
    /// Returns `true` if an element was removed, `false` if it was absent.
    pub fn erase(&mut self, element: &T) -> bool {
        let Some(&(band_idx, slot)) = self.positions.get(element) else {
            return false;
        };
        self.epoch += 1;

        let weight = self.bands[band_idx].get(slot).1;
        self.tree.add(band_idx, -weight);

        // The record that backfills the vacated slot needs its index fixed.
        if let Some(moved) = self.bands[band_idx].swap_remove(slot).cloned() {
            self.positions.insert(moved, (band_idx, slot));
        }
        self.positions.remove(element);

        true
    }

    /// Removes all elements. The band layout and weight range are kept.
    pub fn clear(&mut self) {
        self.epoch += 1;
        self.tree.clear();
        self.positions.clear();
        for band in &mut self.bands {
            band.clear();
        }
        self.cursor = None;
    }

    /// Reseeds the owned generator.
    #[cfg(not(feature = "shared_rng"))]
    pub fn seed(&mut self, seed: u64) {
        self.rng = RngType::seed_from_u64(seed);
    }

    /// Copies the set, seeding the copy's generator from one draw of this
    /// set's generator.
    ///
    /// On the birthday problem: seeding copies from single draws means that
    /// across many copies seed collisions become likely; with a 32-bit
    /// seed space, roughly 9300 copies for one expected collision. For
    /// safer mass copying, pass explicit seeds to
    /// [`clone_with_seed`](RouletteSet::clone_with_seed).
    #[cfg(not(feature = "shared_rng"))]
    pub fn clone_reseeded(&mut self) -> Self {
        let seed = self.rng.random::<u64>();
        self.clone_with_seed(seed)
    }

    /// Copies the set with a fresh generator seeded from `seed`.
    ///
    /// The copy starts with a reset iteration cursor.
    #[cfg(not(feature = "shared_rng"))]
    pub fn clone_with_seed(&self, seed: u64) -> Self {
        RouletteSet {
            min_weight: self.min_weight,
            max_weight: self.max_weight,
            rng: RngType::seed_from_u64(seed),
            hash: self.hash.clone(),
            bands: self.bands.clone(),
            positions: self.positions.clone(),
            tree: self.tree.clone(),
            cursor: None,
            cursor_epoch: 0,
            epoch: 0,
        }
    }

    /// Draw one `(element, weight)` proportional to weight (with
    /// replacement), using the set's own generator.
    ///
    /// **Complexity:** $\mathcal{O}(\log\log W)$ expected, where
    /// $W = w_{\max}/w_{\min}$.
    ///
    /// Returns [`SetError::Empty`] if the set is empty. For deterministic
    /// external randomness, use [`sample_with`](RouletteSet::sample_with).
    pub fn sample(&mut self) -> SetResult<(T, f64)> {
        #[cfg(feature = "shared_rng")]
        {
            GEN.with(|g| self.sample_with(&mut *g.borrow_mut()))
        }
        #[cfg(not(feature = "shared_rng"))]
        {
            let mut rng = self.rng.clone();
            let drawn = self.sample_with(&mut rng);
            self.rng = rng;
            drawn
        }
    }

    /// Draw one `(element, weight)` using a caller-supplied generator.
    ///
    /// Algorithm and guarantees are identical to
    /// [`sample`](RouletteSet::sample), but all random draws come from
    /// `rng` and the set itself is not mutated.
    ///
    /// Returns [`SetError::Empty`] if the set is empty.
    pub fn sample_with<R>(&self, rng: &mut R) -> SetResult<(T, f64)>
    where
        R: Rng + ?Sized,
    {
        if self.positions.is_empty() {
            return Err(SetError::Empty);
        }

        loop {
            let r = rng.random_range(0.0..1.0);
            let band = &self.bands[self.tree.locate(r)];
            if band.is_empty() {
                // drift residue on a drained band; redraw
                continue;
            }

            let ceiling = band.ceiling();
            loop {
                let u: f64 = rng.random_range(0.0..1.0);
                let slot = usize::min((u * band.len() as f64) as usize, band.len() - 1);
                let weight = band.get(slot).1;
                if rng.random_range(0.0..1.0) < weight / ceiling {
                    return Ok((band.get(slot).0.clone(), weight));
                }
                // Expected O(1) retries
            }
        }
    }

    fn check_weight(&self, weight: f64) -> SetResult<()> {
        // negated form so NaN is rejected too
        if !(weight >= self.min_weight && weight <= self.max_weight) {
            return Err(SetError::WeightOutOfRange {
                weight,
                min: self.min_weight,
                max: self.max_weight,
            });
        }
        Ok(())
    }
}

/// Stateful iteration cursor, walking bands in order and slots within each
/// band. The order reflects insertion history and past swap-removes; it is
/// not stable across logically equivalent operation sequences. Any mutation
/// invalidates the cursor (checked in debug builds).
impl<T> RouletteSet<T>
where
    T: Clone + Eq + Hash,
{
    /// Positions the cursor on the first element, or at the end if the set
    /// is empty.
    pub fn iter_begin(&mut self) {
        self.cursor = self.occupied_at_or_after(0, 0);
        self.cursor_epoch = self.epoch;
    }

    /// Advances the cursor by one element.
    ///
    /// Returns [`SetError::EndOfIteration`] when the cursor is already past
    /// the end; reaching the end is itself not an error.
    pub fn iter_next(&mut self) -> SetResult<()> {
        self.debug_check_cursor();
        match self.cursor {
            Some((band_idx, slot)) => {
                self.cursor = self.occupied_at_or_after(band_idx, slot + 1);
                Ok(())
            }
            None => Err(SetError::EndOfIteration),
        }
    }

    /// Returns the element under the cursor with its weight.
    ///
    /// Returns [`SetError::EndOfIteration`] when the cursor is at the end
    /// (or was never positioned).
    pub fn get_at_iter(&self) -> SetResult<(T, f64)> {
        self.debug_check_cursor();
        let (band_idx, slot) = self.cursor.ok_or(SetError::EndOfIteration)?;
        let (element, weight) = self.bands[band_idx].get(slot);
        Ok((element.clone(), *weight))
    }

    /// First occupied position at `(band_idx, slot)` or later, in cursor
    /// order.
    fn occupied_at_or_after(&self, band_idx: BandIndex, slot: SlotIndex) -> Option<Position> {
        if slot < self.bands[band_idx].len() {
            return Some((band_idx, slot));
        }
        self.bands
            .iter()
            .enumerate()
            .skip(band_idx + 1)
            .find(|(_, band)| !band.is_empty())
            .map(|(idx, _)| (idx, 0))
    }

    fn debug_check_cursor(&self) {
        debug_assert!(
            self.cursor.is_none() || self.cursor_epoch == self.epoch,
            "iteration cursor used after mutation"
        );
    }
}

#[cfg(feature = "shared_rng")]
impl<T> Clone for RouletteSet<T>
where
    T: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        RouletteSet {
            min_weight: self.min_weight,
            max_weight: self.max_weight,
            hash: self.hash.clone(),
            bands: self.bands.clone(),
            positions: self.positions.clone(),
            tree: self.tree.clone(),
            cursor: None,
            cursor_epoch: 0,
            epoch: 0,
        }
    }
}

impl<'a, T> IntoIterator for &'a RouletteSet<T>
where
    T: Clone + Eq + Hash,
{
    type Item = (&'a T, f64);
    type IntoIter = Iter<'a, T>;

    /// Returns a sequential iterator over the items in the set, in cursor
    /// order.
    fn into_iter(self) -> Self::IntoIter {
        let mut outer = self.bands.iter();
        let inner = outer.next().map(Band::iter).unwrap_or_default();
        Iter { outer, inner }
    }
}

impl<T> RouletteSet<T>
where
    T: Clone + Eq + Hash,
{
    /// Borrowing iterator over `(element, weight)` pairs.
    pub fn iter(&self) -> Iter<'_, T> {
        self.into_iter()
    }

    /// Returns an iterator that lazily draws `n` samples with the set's
    /// own generator.
    pub fn into_sampling_iter(&mut self, n: usize) -> SamplingIter<'_, T> {
        SamplingIter {
            set: self,
            remaining: n,
        }
    }

    /// Returns an iterator that lazily draws `n` samples with a
    /// caller-supplied generator.
    pub fn sampling_iter_with<'a, R>(&'a self, rng: &'a mut R, n: usize) -> SamplingIterWith<'a, T, R>
    where
        R: Rng + ?Sized,
    {
        SamplingIterWith {
            set: self,
            rng,
            remaining: n,
        }
    }
}

/// A sequential iterator over the items in the set.
pub struct Iter<'a, T> {
    outer: std::slice::Iter<'a, Band<T>>,
    inner: std::slice::Iter<'a, (T, f64)>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (&'a T, f64);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((element, weight)) = self.inner.next() {
                return Some((element, *weight));
            }
            self.inner = self.outer.next()?.iter();
        }
    }
}

/// Iterator yielding a fixed number of samples drawn with the owned
/// generator. Stops early only if the set is empty.
pub struct SamplingIter<'a, T>
where
    T: Clone + Eq + Hash,
{
    set: &'a mut RouletteSet<T>,
    remaining: usize,
}

impl<T> Iterator for SamplingIter<'_, T>
where
    T: Clone + Eq + Hash,
{
    type Item = (T, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.set.sample() {
            Ok(drawn) => {
                self.remaining -= 1;
                Some(drawn)
            }
            Err(_) => {
                self.remaining = 0;
                None
            }
        }
    }
}

/// Iterator yielding a fixed number of samples drawn with an external
/// generator.
pub struct SamplingIterWith<'a, T, R>
where
    T: Clone + Eq + Hash,
    R: Rng + ?Sized,
{
    set: &'a RouletteSet<T>,
    rng: &'a mut R,
    remaining: usize,
}

impl<T, R> Iterator for SamplingIterWith<'_, T, R>
where
    T: Clone + Eq + Hash,
    R: Rng + ?Sized,
{
    type Item = (T, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.set.sample_with(self.rng) {
            Ok(drawn) => {
                self.remaining -= 1;
                Some(drawn)
            }
            Err(_) => {
                self.remaining = 0;
                None
            }
        }
    }
}
