//! The interactive protocol over any byte stream pair.
//!
//! The caller owns the transport (an `ssh -tt` child, or an in-memory pipe
//! in tests); this module only writes the script and frames the replies.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::HiddenValue;
use crate::consts::{LOST_SESSION_EXIT_CODE, TIMEOUT_EXIT_CODE};

use super::framing::OutputFramer;
use super::{CommandOutput, SessionLimits, scrub};

pub struct InteractiveRequest<'a> {
  pub command: &'a str,
  pub hidden: &'a [HiddenValue],
}

/// A sentinel token no command output will contain by accident.
pub fn sentinel_token() -> String {
  format!("__fleetroll_{}", Uuid::new_v4().simple())
}

/// The full input written to the session. Contains secrets: never log it.
fn script(request: &InteractiveRequest<'_>, token: &str) -> String {
  let mut script = String::from("\n");
  for value in request.hidden {
    script.push_str(&format!("read -s {}\n{}\n", value.name, value.expose()));
  }
  script.push_str(request.command);
  script.push('\n');
  script.push_str(&format!("echo {token} $?\n"));
  script
}

/// Run one command through an interactive session.
///
/// Never fails: a dead stream gives exit 255, an expired timer gives
/// exit 124, and whatever was captured before that is returned.
pub async fn run_interactive<R, W>(
  reader: &mut R,
  writer: &mut W,
  request: &InteractiveRequest<'_>,
  limits: SessionLimits,
) -> CommandOutput
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let token = sentinel_token();
  let mut framer = OutputFramer::new(&token);

  let finish = |framer: &OutputFramer, exit_code: i32, stderr: String| CommandOutput {
    exit_code,
    stdout: scrub(&framer.captured(), request.hidden),
    stderr: scrub(&stderr, request.hidden),
  };

  let input = script(request, &token);
  if let Err(e) = async {
    writer.write_all(input.as_bytes()).await?;
    writer.flush().await
  }
  .await
  {
    return finish(&framer, LOST_SESSION_EXIT_CODE, format!("failed to write to session: {e}"));
  }
  debug!(hidden = request.hidden.len(), "interactive script sent");

  let deadline = Instant::now() + limits.session;
  let mut buf = [0u8; 4096];

  loop {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let wait = remaining.min(limits.inactivity);

    match timeout(wait, reader.read(&mut buf)).await {
      Ok(Ok(0)) => {
        return finish(
          &framer,
          LOST_SESSION_EXIT_CODE,
          "session closed before the command reported an exit status".into(),
        );
      }
      Ok(Ok(n)) => {
        if let Some(code) = framer.push(&buf[..n]) {
          return finish(&framer, code, String::new());
        }
      }
      Ok(Err(e)) => {
        return finish(&framer, LOST_SESSION_EXIT_CODE, format!("failed to read from session: {e}"));
      }
      Err(_) => {
        let message = if remaining <= limits.inactivity {
          format!("session timed out after {}s", limits.session.as_secs())
        } else {
          format!("no output for {}s, giving up", limits.inactivity.as_secs())
        };
        warn!(%message, "interactive command timed out");
        return finish(&framer, TIMEOUT_EXIT_CODE, message);
      }
    }
  }
}
