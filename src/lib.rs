#![doc = include_str!("../README.md")]
#![no_std]
#![deny(
    unsafe_code,
    unused_imports,
    unused_variables,
    unused_must_use,
    missing_docs,
    clippy::all,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented
)]
#![allow(clippy::len_without_is_empty)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub(crate) type Kbn = compensated_summation::KahanBabuskaNeumaier<f64>;

mod utils;
pub(crate) use utils::RingBuffer;

mod window;
pub use window::{Sample, Window};

mod fixed;
pub use fixed::FixedWindow;

mod exponential;
pub use exponential::{ExponentialWindow, alpha_for_approximating_fixed};

mod mean;
pub use mean::MeanWindow;
