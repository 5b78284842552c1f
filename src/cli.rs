//! Interactive follow-up chat for the `analyze` command

use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, warn};

use crate::error::Result;
use crate::llm::GenerativeService;
use crate::processing::AnalysisPipeline;
use crate::state::SessionState;

/// Why the chat loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatExit {
    Quit,
    EndOfInput,
    Interrupted,
}

/// Read messages line by line and print the model's replies until `exit`,
/// end of input, or `interrupt` resolves.
///
/// `interrupt` is raced against both the prompt and every in-flight request,
/// so a stalled call can always be abandoned.
pub async fn run_chat_loop<R, W, I, F>(
    pipeline: &AnalysisPipeline,
    service: &dyn GenerativeService,
    session: &mut SessionState,
    input: R,
    output: &mut W,
    mut interrupt: I,
) -> Result<ChatExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: FnMut() -> F,
    F: Future<Output = ()>,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let line = tokio::select! {
            biased;
            _ = interrupt() => return Ok(ChatExit::Interrupted),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(ChatExit::EndOfInput);
        };

        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "exit" {
            return Ok(ChatExit::Quit);
        }

        let reply = tokio::select! {
            biased;
            _ = interrupt() => {
                warn!("🛑 Chat request interrupted");
                return Ok(ChatExit::Interrupted);
            }
            reply = pipeline.chat(service, session, message) => reply,
        };

        match reply {
            Ok(reply) => {
                output.write_all(format!("\n{}\n\n", reply).as_bytes()).await?;
            }
            Err(e) => error!("エラー: {}", e),
        }
    }
}
