// ── Resource store ──
//
// `ResourceCollection<T>` holds one resource type; `ResourceCache` owns
// one collection per tracked type and is the single writer for all of
// them.

mod cache;
pub(crate) mod collection;

pub use cache::{OptimisticWrite, ResourceCache};
