use std::io::BufRead;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use keyward_core::{UpdateEvent, UpdateFailure};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Update,
    Quit,
    Help,
    Unknown,
}

pub fn parse_command(line: &str) -> Option<Command> {
    let command = match line.trim().to_ascii_lowercase().as_str() {
        "" => return None,
        "u" | "update" => Command::Update,
        "q" | "quit" | "exit" => Command::Quit,
        "h" | "help" | "?" => Command::Help,
        _ => Command::Unknown,
    };
    Some(command)
}

pub fn print_controls() {
    println!("Commands: [u]pdate to install a pending update, [q]uit, [h]elp");
}

/// Read stdin on a plain thread so a pending read never holds up runtime
/// shutdown. The channel closes at end of input.
pub fn spawn_line_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// How the update session ended, as seen through its events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionEnd {
    #[default]
    Stopped,
    Installed {
        release: String,
    },
    Fatal(UpdateFailure),
}

/// Turns update events into terminal output.
pub struct EventRenderer {
    draw_target: fn() -> ProgressDrawTarget,
    bar: Option<ProgressBar>,
    end: SessionEnd,
}

impl EventRenderer {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr)
    }

    fn with_draw_target(draw_target: fn() -> ProgressDrawTarget) -> Self {
        Self {
            draw_target,
            bar: None,
            end: SessionEnd::Stopped,
        }
    }

    fn progress_bar(&mut self, total: u64) -> &ProgressBar {
        self.bar.get_or_insert_with(|| {
            let bar = if total > 0 {
                let bar = ProgressBar::with_draw_target(Some(total), (self.draw_target)());
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
                );
                bar
            } else {
                let bar = ProgressBar::with_draw_target(None, (self.draw_target)());
                bar.set_style(
                    ProgressStyle::with_template("{spinner:.green} {bytes} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            };
            bar.set_message("Downloading...");
            bar
        })
    }

    fn finish_bar(&mut self, message: &'static str) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(message);
        }
    }

    pub fn handle(&mut self, event: UpdateEvent) {
        match event {
            UpdateEvent::Available(descriptor) => {
                println!(
                    "Update {} is available. Enter 'u' to install it.",
                    descriptor.name
                );
            }
            UpdateEvent::Downloading(progress) => {
                self.progress_bar(progress.total)
                    .set_position(progress.downloaded);
            }
            UpdateEvent::Installing { release } => {
                self.finish_bar("Downloaded");
                println!("Installing {release}...");
            }
            UpdateEvent::Installed { release } => {
                println!("Installed {release}. Restart to use the new version.");
                self.end = SessionEnd::Installed { release };
            }
            UpdateEvent::Failed(failure) => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon_with_message("Failed");
                }
                eprintln!(
                    "There was an error during {} of {}: {}",
                    failure.stage, failure.release, failure.message
                );
                if failure.fatal {
                    self.end = SessionEnd::Fatal(failure);
                }
            }
        }
    }

    /// Render events until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<UpdateEvent>) -> SessionEnd {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        self.finish_bar("Stopped");
        self.end
    }
}

impl Default for EventRenderer {
    fn default() -> Self {
        Self::new()
    }
}
