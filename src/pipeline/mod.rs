//! Pipeline stages between a caller's option bag and a downloadable archive.
//!
//! ## Data Flow
//!
//! ```text
//! options ──▶ normalize ──▶ invoke ──▶ collect ──▶ archive
//! (JSON bag)   (typed)     (engine)   (classify)  (zip + combined md)
//! ```
//!
//! 1. [`normalize`] — option bag to [`crate::options::EngineConfig`], with the
//!    single-worker override applied last
//! 2. [`invoke`]    — one engine run per document on the blocking pool, in a
//!    fresh working directory
//! 3. [`collect`]   — classify the working directory into output, debug and
//!    image sets
//! 4. [`archive`]   — zip every successful document and write the overview

pub mod archive;
pub mod collect;
pub mod invoke;
pub mod normalize;
