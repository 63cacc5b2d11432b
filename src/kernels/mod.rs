//! Generic kernels: dtype dispatch, launch planning and the typed per-element
//! bodies executed by the queue.

pub mod dispatch;
pub mod elementwise;
pub mod functors;
pub mod launch;
pub mod prelu;
pub mod random;
