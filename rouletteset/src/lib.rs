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

//! Weighted sampling with composition–rejection and dyadic (power-of-two)
//! weight bands.
//!
//! This crate implements the sampler from:
//! G. St-Onge, J.-G. Young, L. Hébert-Dufresne, L. J. Dubé,
//! *Efficient sampling of spreading processes on complex networks using a composition and rejection algorithm*,
//! **Comput. Phys. Commun.** 240 (2019) 30–37. DOI: [10.1016/j.cpc.2019.02.008](https://doi.org/10.1016/j.cpc.2019.02.008)
//!
//! Let $W = w_{\max}/w_{\min}$. Items are partitioned into
//! $G = \lfloor \log_2 W \rfloor + 1$ weight bands. A prefix-sum tree over
//! bands selects a band in $\mathcal{O}(\log G) = \mathcal{O}(\log\log W)$
//! time, and the subsequent acceptance–rejection step inside the band runs
//! in $\mathcal{O}(1)$ expected time. Insert, erase, and weight updates are
//! $\mathcal{O}(\log G)$ as well, independent of the number of elements.
//!
//! If $W$ is bounded in your application, every operation is effectively
//! $\mathcal{O}(1)$ on average.

mod band;
mod band_hash;
mod sum_tree;
pub mod roulette_set;

pub use roulette_set::{
    Iter, RouletteSet, SamplingIter, SamplingIterWith, SetError, SetResult,
};

#[cfg(feature = "shared_rng")]
pub use roulette_set::seed_shared;
