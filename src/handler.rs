//! Message handlers
//!
//! A [`Handler`] is invoked once per delivered message, never concurrently with
//! itself, so it can keep plain mutable state. [`LinePrinter`] is the handler the
//! binary uses: every payload becomes one line on standard output.

use crate::error::HandlerError;
use crate::transport::Message;
use async_trait::async_trait;
use std::io::{self, Write};

/// Caller-supplied logic run for each received message
#[async_trait]
pub trait Handler: Send {
    async fn handle(&mut self, message: Message) -> Result<(), HandlerError>;
}

/// Writes each payload as one line
pub struct LinePrinter<W: Write + Send> {
    out: W,
}

impl LinePrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> LinePrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render a payload as a single line: lossy UTF-8, trailing line breaks trimmed
    pub fn render_line(payload: &[u8]) -> String {
        let text = String::from_utf8_lossy(payload);
        let mut line = text.trim_end_matches(['\r', '\n']).to_string();
        line.push('\n');
        line
    }
}

#[async_trait]
impl<W: Write + Send> Handler for LinePrinter<W> {
    async fn handle(&mut self, message: Message) -> Result<(), HandlerError> {
        let line = Self::render_line(&message.payload);
        // Blocking write on the loop's task. One short line per message, and
        // the flush keeps it visible before the next message is taken.
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Adapts a closure into a [`Handler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: FnMut(Message) -> Result<(), HandlerError> + Send,
{
    async fn handle(&mut self, message: Message) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}
