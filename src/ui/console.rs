use super::{AskRequest, AskResponse, SayMessage, UIError, UserInterface};
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};

// ANSI color codes for terminal formatting
struct Colors {
    reset: &'static str,
    bold: &'static str,
    green: &'static str,
    yellow: &'static str,
    red: &'static str,
    cyan: &'static str,
}

impl Colors {
    fn new() -> Self {
        Colors {
            reset: "\x1b[0m",
            bold: "\x1b[1m",
            green: "\x1b[32m",
            yellow: "\x1b[33m",
            red: "\x1b[31m",
            cyan: "\x1b[36m",
        }
    }
}

/// Terminal host used by the replay binary.
///
/// Partial text previews are printed incrementally: only the part that was
/// not shown yet is written.
pub struct ConsoleUI {
    colors: Colors,
    auto_approve: bool,
    // Text of the message currently being streamed
    shown: Mutex<String>,
}

impl ConsoleUI {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            colors: Colors::new(),
            auto_approve,
            shown: Mutex::new(String::new()),
        }
    }

    fn write_text(&self, text: &str, partial: bool) -> Result<(), UIError> {
        let mut shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stdout = io::stdout().lock();
        match text.strip_prefix(shown.as_str()) {
            Some(rest) => write!(stdout, "{rest}")?,
            // Preview was rewritten, start over on a new line
            None => write!(stdout, "\n{text}")?,
        }
        if partial {
            *shown = text.to_string();
        } else {
            writeln!(stdout)?;
            shown.clear();
        }
        stdout.flush()?;
        Ok(())
    }

    fn finish_preview(&self) -> Result<(), UIError> {
        let mut shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
        if !shown.is_empty() {
            writeln!(io::stdout())?;
            shown.clear();
        }
        Ok(())
    }

    async fn read_line(&self) -> Result<String, UIError> {
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        reader.read_line(&mut line).await?;
        Ok(line.trim().to_string())
    }
}

#[async_trait]
impl UserInterface for ConsoleUI {
    async fn say(&self, message: SayMessage) -> Result<(), UIError> {
        match message {
            SayMessage::Text { text, partial } => self.write_text(&text, partial),
            SayMessage::UserFeedback(text) => {
                self.finish_preview()?;
                println!("{}feedback:{} {}", self.colors.cyan, self.colors.reset, text);
                Ok(())
            }
            SayMessage::Error(text) => {
                self.finish_preview()?;
                println!("{}✗ {}{}", self.colors.red, text, self.colors.reset);
                Ok(())
            }
        }
    }

    async fn ask(&self, request: AskRequest) -> Result<AskResponse, UIError> {
        self.finish_preview()?;
        println!(
            "{}{}{} ({:?}){}",
            self.colors.bold,
            self.colors.yellow,
            request.tool,
            request.kind,
            self.colors.reset
        );
        if let Some(message) = &request.message {
            println!("{message}");
        }

        if self.auto_approve {
            println!("{}✓ approved (--yes){}", self.colors.green, self.colors.reset);
            return Ok(AskResponse::Approved { feedback: None });
        }

        print!("{}approve? [y/N, or type feedback] > {}", self.colors.green, self.colors.reset);
        io::stdout().flush()?;
        let answer = self.read_line().await?;
        let response = match answer.as_str() {
            "y" | "Y" | "yes" => AskResponse::Approved { feedback: None },
            "" | "n" | "N" | "no" => AskResponse::Denied { feedback: None },
            _ => AskResponse::Denied {
                feedback: Some(answer),
            },
        };
        Ok(response)
    }

    async fn close_browser_session(&self) -> Result<(), UIError> {
        tracing::debug!("No browser session to close");
        Ok(())
    }
}
