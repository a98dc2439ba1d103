//! Memory pool management
//!
//! Pooled byte buffers carved from shared chunks. Small requests are served
//! by subpages (one page split into equal elements), larger ones by runs of
//! pages, and anything bigger than a chunk by a private allocation.

mod arena;
mod buffer;
mod chunk;
mod derived;
mod locator;
mod memory;
mod metric;
mod recycler;
mod size_class;
mod subpage;
mod subpage_list;

pub use arena::PoolArena;
pub use buffer::{Location, PooledBuf};
pub use derived::DerivedBuf;
pub use locator::Locator;
pub use metric::{ArenaStats, SubpageMetric, SubpageMetricRef};
pub use size_class::SizeClass;
pub use subpage::SubpageMetricValues;
