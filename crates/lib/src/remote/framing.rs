//! Framing of interactive terminal output.
//!
//! Bytes arrive in arbitrary chunks. Complete lines are cleaned of
//! escape sequences, the prompt learned from the first non-empty line is
//! stripped, and the sentinel output line ends the command:
//!
//! ```text
//! deploy@sh01:~$                          learned prompt
//! deploy@sh01:~$ ./bin/app reload         captured
//! reloaded                                captured
//! deploy@sh01:~$ echo __fleetroll_ab12 $?  echoed sentinel command, ignored
//! __fleetroll_ab12 0                      sentinel output, exit status 0
//! ```

/// Remove ANSI escape sequences, carriage returns and other control characters.
pub fn strip_control(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars().peekable();

  while let Some(c) = chars.next() {
    match c {
      '\u{1b}' => match chars.next() {
        // CSI: parameters up to a final byte in @..~
        Some('[') => {
          for next in chars.by_ref() {
            if ('@'..='~').contains(&next) {
              break;
            }
          }
        }
        // OSC: up to BEL or ESC \
        Some(']') => {
          while let Some(next) = chars.next() {
            if next == '\u{7}' {
              break;
            }
            if next == '\u{1b}' && chars.peek() == Some(&'\\') {
              chars.next();
              break;
            }
          }
        }
        _ => {}
      },
      '\n' | '\t' => out.push(c),
      c if c.is_control() => {}
      c => out.push(c),
    }
  }

  out
}

#[derive(Debug)]
pub struct OutputFramer {
  token: String,
  pending: Vec<u8>,
  prompt: Option<String>,
  lines: Vec<String>,
  exit_code: Option<i32>,
}

impl OutputFramer {
  pub fn new(token: &str) -> Self {
    Self {
      token: token.to_string(),
      pending: Vec::new(),
      prompt: None,
      lines: Vec::new(),
      exit_code: None,
    }
  }

  /// Feed received bytes. Returns the exit status once the sentinel output is seen.
  pub fn push(&mut self, bytes: &[u8]) -> Option<i32> {
    if self.exit_code.is_some() {
      return self.exit_code;
    }
    self.pending.extend_from_slice(bytes);

    while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
      let raw: Vec<u8> = self.pending.drain(..=pos).collect();
      let line = strip_control(&String::from_utf8_lossy(&raw[..raw.len() - 1]));
      if let Some(code) = self.take_line(line) {
        self.exit_code = Some(code);
        self.pending.clear();
        break;
      }
    }

    self.exit_code
  }

  fn take_line(&mut self, line: String) -> Option<i32> {
    let Some(prompt) = &self.prompt else {
      let trimmed = line.trim();
      if !trimmed.is_empty() {
        self.prompt = Some(trimmed.to_string());
      }
      return None;
    };

    let line = match line.trim_start().strip_prefix(prompt.as_str()) {
      Some(rest) => rest.trim_start().to_string(),
      None => line,
    };

    if let Some(idx) = line.find(&self.token) {
      if line.contains("echo") {
        return None;
      }
      let status = line[idx + self.token.len()..].trim();
      let digits: String = status.chars().rev().take_while(char::is_ascii_digit).collect();
      let digits: String = digits.chars().rev().collect();
      return Some(digits.parse().unwrap_or(1));
    }

    if line.trim().is_empty() {
      return None;
    }
    self.lines.push(line);
    None
  }

  pub fn prompt(&self) -> Option<&str> {
    self.prompt.as_deref()
  }

  pub fn exit_code(&self) -> Option<i32> {
    self.exit_code
  }

  /// Everything captured so far, including a trailing partial line.
  pub fn captured(&self) -> String {
    let mut lines = self.lines.clone();
    if !self.pending.is_empty() {
      let tail = strip_control(&String::from_utf8_lossy(&self.pending));
      if !tail.trim().is_empty() {
        lines.push(tail);
      }
    }
    lines.join("\n")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TOKEN: &str = "__fleetroll_0123abcd";

  #[test]
  fn strips_csi_osc_and_carriage_returns() {
    let raw = "\u{1b}]0;deploy@sh01\u{7}\u{1b}[01;32mdeploy\u{1b}[0m$ ls\r";
    assert_eq!(strip_control(raw), "deploy$ ls");
  }

  #[test]
  fn frames_command_output() {
    let mut framer = OutputFramer::new(TOKEN);
    let chunks = [
      "deploy@sh01:~$ \r\n",
      "deploy@sh01:~$ ./bin/app reload\r\nreloa",
      "ded\r\ndeploy@sh01:~$ echo __fleetroll_0123abcd $?\r\n",
      "__fleetroll_0123abcd 3\r\n",
    ];

    let mut code = None;
    for chunk in chunks {
      code = framer.push(chunk.as_bytes());
    }

    assert_eq!(code, Some(3));
    assert_eq!(framer.prompt(), Some("deploy@sh01:~$"));
    assert_eq!(framer.captured(), "./bin/app reload\nreloaded");
  }

  #[test]
  fn partial_output_is_kept_without_sentinel() {
    let mut framer = OutputFramer::new(TOKEN);
    assert_eq!(framer.push(b"$ \nstarting\nhalf a li"), None);
    assert_eq!(framer.captured(), "starting\nhalf a li");
  }

  #[test]
  fn bytes_after_the_sentinel_are_ignored() {
    let mut framer = OutputFramer::new(TOKEN);
    framer.push(b"$ \n__fleetroll_0123abcd 0\nlogout\n");
    assert_eq!(framer.exit_code(), Some(0));
    assert_eq!(framer.captured(), "");
  }
}
