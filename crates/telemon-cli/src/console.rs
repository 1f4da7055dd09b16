//! Interactive stdin console
//!
//! Reads command lines, runs them against the engine as the local `console`
//! surface and prints the replies. Device replies to console queries arrive
//! asynchronously on the attached output and are printed as they come.

use telemon_core::Request;
use telemon_runtime::RuntimeHandle;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;

/// Origin name of console requests
pub const CONSOLE_ORIGIN: &str = "console";

/// Printed before every command line
pub const PROMPT: &str = "### ";

/// Console bound to a running engine
pub struct Console<'a> {
    runtime: &'a RuntimeHandle,
    output: mpsc::UnboundedReceiver<String>,
}

impl<'a> Console<'a> {
    /// Attach the console output to `runtime`
    pub async fn attach(runtime: &'a RuntimeHandle) -> Result<Self> {
        let output = runtime.attach_output(CONSOLE_ORIGIN).await?;
        Ok(Self { runtime, output })
    }

    /// Serve `input` until `exit`; after end of input keep printing
    /// forwarded replies until the engine stops
    pub async fn run<R, W>(mut self, input: R, mut out: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;
        out.write_all(PROMPT.as_bytes()).await?;
        out.flush().await?;

        loop {
            tokio::select! {
                line = lines.next_line(), if input_open => match line? {
                    Some(line) => {
                        let line = match line.trim() {
                            "" => "clients",
                            trimmed => trimmed,
                        };
                        let replies = self.runtime.execute(line, CONSOLE_ORIGIN).await?;
                        for reply in replies {
                            write_line(&mut out, &reply).await?;
                        }
                        if Request::parse(line) == Some(Request::Exit) {
                            return Ok(());
                        }
                        out.write_all(PROMPT.as_bytes()).await?;
                        out.flush().await?;
                    }
                    None => {
                        debug!("Console input closed");
                        input_open = false;
                    }
                },

                reply = self.output.recv() => match reply {
                    Some(reply) => write_line(&mut out, &reply).await?,
                    None => return Ok(()),
                },
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}
