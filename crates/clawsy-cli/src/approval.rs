//! Terminal approval prompts for files, screenshots, clipboard writes and
//! camera previews.
//!
//! Prompts use dialoguer on a blocking thread so the engine keeps serving
//! other commands while the user decides. Without an interactive terminal
//! every request is denied.
//!
//! A prompt left unanswered past the prompt timeout counts as a denial. The
//! dialoguer prompt itself cannot be cancelled: it stays on screen, its late
//! answer is discarded, and the next prompt waits until it is dismissed.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dialoguer::{Confirm, Select};
use tokio::sync::Mutex;
use tracing::{info, warn};

use clawsy_node::capabilities::{CameraImage, FileAccessRequest, FileAction};
use clawsy_node::{ApprovalDecision, ApprovalHandler, Notification};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Characters of clipboard text shown in the prompt.
const CLIPBOARD_PREVIEW: usize = 200;

/// Choices offered for a grantable request, in display order.
const CHOICES: &[(&str, ApprovalDecision)] = &[
    ("Allow once", ApprovalDecision::Once),
    ("Allow for 1 hour", ApprovalDecision::For(HOUR)),
    ("Allow for 1 day", ApprovalDecision::For(DAY)),
    ("Deny", ApprovalDecision::Deny),
];

/// Asks on the controlling terminal, one prompt at a time.
pub struct ConsoleApprover {
    interactive: bool,
    prompt_timeout: Duration,
    prompt_lock: Arc<Mutex<()>>,
}

impl ConsoleApprover {
    /// `prompt_timeout` should stay below the engine's command timeout so a
    /// slow answer is reported as a denial rather than a timeout.
    pub fn new(prompt_timeout: Duration) -> Self {
        Self::with_interactive(
            std::io::stdin().is_terminal() && std::io::stderr().is_terminal(),
            prompt_timeout,
        )
    }

    pub fn with_interactive(interactive: bool, prompt_timeout: Duration) -> Self {
        Self {
            interactive,
            prompt_timeout,
            prompt_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run a blocking dialoguer prompt. The terminal stays locked until the
    /// prompt returns, even if the caller has stopped waiting for it.
    async fn ask<T, F>(&self, what: &str, prompt: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
    {
        if !self.interactive {
            warn!(what, "no terminal to ask, denying");
            return None;
        }

        let lock = self.prompt_lock.clone();
        let answered = tokio::time::timeout(self.prompt_timeout, async move {
            let guard = lock.lock_owned().await;
            tokio::task::spawn_blocking(move || {
                let answer = prompt();
                drop(guard);
                answer
            })
            .await
        })
        .await;

        match answered {
            Ok(Ok(Ok(answer))) => Some(answer),
            Ok(Ok(Err(e))) => {
                warn!(what, error = %e, "approval prompt failed");
                None
            }
            Ok(Err(e)) => {
                warn!(what, error = %e, "approval prompt task failed");
                None
            }
            Err(_) => {
                warn!(what, secs = self.prompt_timeout.as_secs(), "approval prompt unanswered, denying");
                None
            }
        }
    }

    async fn choose(&self, what: &str, prompt: String) -> ApprovalDecision {
        let picked = self
            .ask(what, move || {
                let labels: Vec<&str> = CHOICES.iter().map(|(label, _)| *label).collect();
                Select::new()
                    .with_prompt(prompt)
                    .items(&labels)
                    .default(0)
                    .interact_opt()
            })
            .await;

        let decision = picked
            .flatten()
            .and_then(|index| CHOICES.get(index))
            .map_or(ApprovalDecision::Deny, |(_, d)| *d);
        info!(what, decision = ?decision, "approval decision");
        decision
    }
}

fn prompt_text(request: &FileAccessRequest) -> String {
    match request.action {
        FileAction::Download => format!("The agent wants to read '{}'", request.name),
        FileAction::Upload => format!("The agent wants to write '{}'", request.name),
    }
}

fn clipboard_prompt(text: &str) -> String {
    let mut shown: String = text.chars().take(CLIPBOARD_PREVIEW).collect();
    if shown.len() < text.len() {
        shown.push_str("...");
    }
    format!("The agent wants to set the clipboard to:\n{shown}\n")
}

#[async_trait]
impl ApprovalHandler for ConsoleApprover {
    async fn approve_file_access(&self, request: &FileAccessRequest) -> ApprovalDecision {
        self.choose("file access", prompt_text(request)).await
    }

    async fn approve_screen_capture(&self, interactive: bool) -> ApprovalDecision {
        let prompt = if interactive {
            "The agent wants you to pick a screen area to capture"
        } else {
            "The agent wants a screenshot"
        };
        self.choose("screenshot", prompt.to_string()).await
    }

    async fn approve_clipboard_write(&self, text: &str) -> ApprovalDecision {
        self.choose("clipboard write", clipboard_prompt(text)).await
    }

    async fn approve_camera_image(&self, image: &CameraImage) -> bool {
        let size = image.base64.len() * 3 / 4;
        let answer = self
            .ask("camera image", move || {
                Confirm::new()
                    .with_prompt(format!("Send the camera image ({size} bytes) to the agent?"))
                    .default(false)
                    .interact()
            })
            .await;
        answer == Some(true)
    }

    fn notify(&self, notification: &Notification) {
        let verb = match notification.action {
            FileAction::Download => "Sending",
            FileAction::Upload => "Receiving",
        };
        if notification.automatic {
            eprintln!("{verb} '{}' (standing permission)", notification.name);
        } else {
            eprintln!("{verb} '{}'", notification.name);
        }
    }
}
