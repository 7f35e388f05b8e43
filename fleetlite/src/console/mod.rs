//! Serial console interaction.
//!
//! A `ConsoleSession` wraps one VM's console byte stream and offers the
//! primitives the provisioning script is built from: send a line, wait for
//! a substring, read a delimiter-framed unit. Every read is tee'd to the
//! serial log, and every interaction is recorded in the transcript.

mod session;
mod transcript;

pub use session::{ConsoleSession, DEFAULT_FRAME_DELIMITER, DEFAULT_SEND_DELIMITER};
pub use transcript::{ConsoleTranscript, SerialLog};

use tokio::io::{AsyncRead, AsyncWrite};

/// Both directions of a console channel.
pub struct ConsoleIo {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ConsoleIo {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl std::fmt::Debug for ConsoleIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleIo").finish_non_exhaustive()
    }
}
