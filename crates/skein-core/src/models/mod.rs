pub mod job;
pub mod message;
pub mod spec;
pub mod thread;

pub use job::{Job, JobStatus};
pub use message::{ChatMessage, MessageRole, OutputChunk};
pub use spec::{Spec, SpecType};
pub use thread::{Thread, ThreadState};
