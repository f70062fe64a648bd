//! Supervised execution of external engine subprocesses.
//!
//! The extraction and transcoding engines are opaque collaborators: the only
//! signals they give are an exit status, the captured output text, and the
//! files they leave behind. [`CommandRunner`] is the seam the rest of the
//! crate uses to invoke them, so tests can substitute a scripted runner.

mod runner;
mod types;

pub use runner::{CommandRunner, TokioCommandRunner};
pub use types::{Invocation, ProcessError, ProcessOutput};
