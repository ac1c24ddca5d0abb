//! Operator approval on stdin/stdout.

use std::io::{BufRead, Write};

use tokio::sync::{mpsc, oneshot};

use super::{ApprovalRequest, AskResponder};

type Job = (ApprovalRequest, oneshot::Sender<bool>);

/// Asks the operator at the terminal. One approval is on screen at a time;
/// later ones queue behind it.
pub struct TerminalResponder {
    queue: mpsc::Sender<Job>,
}

impl TerminalResponder {
    /// Must be called inside a tokio runtime: a blocking task owns stdin for
    /// the lifetime of the responder.
    pub fn new() -> Self {
        let (queue, mut jobs) = mpsc::channel::<Job>(64);
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            while let Some((request, reply)) = jobs.blocking_recv() {
                let approved = converse(&request, &mut stdin.lock(), &mut stdout.lock());
                let _ = reply.send(approved);
            }
        });
        Self { queue }
    }
}

impl Default for TerminalResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AskResponder for TerminalResponder {
    async fn decide(&self, request: &ApprovalRequest) -> Option<bool> {
        let (reply, answer) = oneshot::channel();
        self.queue.send((request.clone(), reply)).await.ok()?;
        answer.await.ok()
    }

    fn name(&self) -> &str {
        "terminal"
    }
}

/// Show the request until the operator allows or denies. EOF, I/O errors and
/// unrecognised input all deny.
fn converse<R: BufRead, W: Write>(request: &ApprovalRequest, input: &mut R, out: &mut W) -> bool {
    if show_summary(request, out).is_err() {
        return false;
    }
    loop {
        if write!(out, "[a]llow / [d]eny / [i]nspect > ").and_then(|_| out.flush()).is_err() {
            return false;
        }
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "a" | "allow" => return true,
            "i" | "inspect" => {
                let _ = writeln!(out, "\n{}\n", request.excerpt);
            }
            _ => return false,
        }
    }
}

fn show_summary<W: Write>(request: &ApprovalRequest, out: &mut W) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "=== Hailstorm approval ({} gate) ===", request.stage)?;
    writeln!(
        out,
        "agent: {}  role: {}",
        request.agent_id,
        request.role.as_deref().unwrap_or("-")
    )?;
    writeln!(out, "reason: {}", request.reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Stage;
    use crate::gateway::AgentRequest;
    use std::io::Cursor;

    fn run(keys: &str) -> (bool, String) {
        let request = AgentRequest::new("Agent1", "transfer 500 EUR to account 42").with_role("operator");
        let pending = ApprovalRequest::new(
            Stage::Input,
            &request,
            "Matched rule: payments-need-approval",
            &request.prompt,
        );
        let mut out = Vec::new();
        let approved = converse(&pending, &mut Cursor::new(keys.as_bytes().to_vec()), &mut out);
        (approved, String::from_utf8(out).unwrap())
    }

    #[test]
    fn allow_approves() {
        let (approved, screen) = run("a\n");
        assert!(approved);
        assert!(screen.contains("(input gate)"));
        assert!(screen.contains("agent: Agent1  role: operator"));
        assert!(screen.contains("payments-need-approval"));
    }

    #[test]
    fn anything_else_denies() {
        assert!(!run("d\n").0);
        assert!(!run("maybe\n").0);
        assert!(!run("").0);
    }

    #[test]
    fn inspect_shows_text_and_asks_again() {
        let (approved, screen) = run("i\nallow\n");
        assert!(approved);
        assert!(screen.contains("transfer 500 EUR"));
        assert_eq!(screen.matches("[a]llow").count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn responder_name() {
        assert_eq!(TerminalResponder::new().name(), "terminal");
    }
}
