pub mod logging;
pub mod model_select;
pub mod queue;
pub mod worker;

pub use model_select::Mode;
pub use queue::JobQueue;
pub use worker::{Worker, WorkerSettings};
