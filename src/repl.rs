use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use llm_provider::ProviderError;
use lua_engine::Completeness;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::commands::{parse_repl_command, ReplCommand};
use crate::console::{CodeProposal, Console, ConsoleEvent, ConsoleInput};

const HELP_TEXT: &str = "Commands: :help, :history, :preview <prompt>, :reset, :quit\n\
                         Prefix a prompt with 'ai:' for one model turn, 'ai!' for agent mode.";
const MESSAGE_RULE: &str = "----------------------------------------";

/// Line-editing front end driving one [`Console`].
///
/// Collects Lua lines (buffering until the engine stops expecting
/// continuations), routes `ai:`/`ai!` prompts to the model, renders console
/// events, and mediates the approval gate by pre-filling proposed code for
/// editing.
pub struct Repl {
    console: Console,
    editor: DefaultEditor,
    buffered_lines: Vec<String>,
}

impl Repl {
    pub fn new(console: Console) -> anyhow::Result<Self> {
        // Ctrl-C while a model call blocks lands here as SIGINT (rustyline's
        // raw mode is only active while reading a line) and aborts just the
        // in-flight call.
        signal_hook::flag::register(signal_hook::consts::SIGINT, console.cancel_signal())?;

        Ok(Self {
            console,
            editor: DefaultEditor::new()?,
            buffered_lines: Vec::new(),
        })
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let prompt = if self.buffered_lines.is_empty() {
                ">>> "
            } else {
                "... "
            };

            match self.editor.readline(prompt) {
                Ok(line) => match self.handle_line(line) {
                    Ok(false) => {}
                    Ok(true) => break,
                    Err(error) => {
                        // One report per failed attempt; committed history
                        // is untouched and the session goes on.
                        eprintln!("model call failed: {error}");
                    }
                },
                Err(ReadlineError::Interrupted) => {
                    self.buffered_lines.clear();
                    println!("^C");
                }
                Err(ReadlineError::Eof) => {
                    println!("Goodbye!");
                    break;
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(())
    }

    /// Returns `Ok(true)` when the operator asked to quit.
    fn handle_line(&mut self, line: String) -> Result<bool, ProviderError> {
        if self.buffered_lines.is_empty() {
            if let Some(prompt) = line.strip_prefix("ai!") {
                let _ = self.editor.add_history_entry(&line);
                self.prompt_model(prompt.trim(), true)?;
                return Ok(false);
            }

            if let Some(prompt) = line.strip_prefix("ai:") {
                let _ = self.editor.add_history_entry(&line);
                self.prompt_model(prompt.trim(), false)?;
                return Ok(false);
            }

            if let Some(command) = parse_repl_command(&line) {
                let _ = self.editor.add_history_entry(&line);
                return Ok(self.handle_command(command));
            }
        }

        self.buffered_lines.push(line);
        let source = self.buffered_lines.join("\n");
        if self.console.engine().completeness(&source) == Completeness::Incomplete {
            return Ok(false);
        }

        self.buffered_lines.clear();
        let _ = self.editor.add_history_entry(&source);

        let mut emit = EventRenderer::new();
        self.console
            .handle_input(ConsoleInput::UserCode { code: source }, &mut |event| {
                emit.render(event)
            })?;

        Ok(false)
    }

    fn handle_command(&mut self, command: ReplCommand) -> bool {
        match command {
            ReplCommand::Help => println!("{HELP_TEXT}"),
            ReplCommand::History => {
                for node in self.console.history_since(0) {
                    let data = serde_json::to_string(&node.data)
                        .unwrap_or_else(|_| "<unprintable>".to_string());
                    println!("[{}]: {data}", node.depth());
                }
            }
            ReplCommand::Preview(prompt) => {
                let request = self.console.request_preview(&prompt);
                match serde_json::to_string_pretty(&request) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(error) => println!("cannot render request: {error}"),
                }
            }
            ReplCommand::Reset => match self.console.reset() {
                Ok(()) => println!("Session reset: fresh namespace, fresh history."),
                Err(error) => println!("reset failed: {error}"),
            },
            ReplCommand::Quit => {
                println!("Goodbye!");
                return true;
            }
            ReplCommand::Unknown(command) => {
                println!("Unknown command: {command} (:help for the list)");
            }
        }

        false
    }

    fn prompt_model(&mut self, prompt: &str, agent_requested: bool) -> Result<(), ProviderError> {
        let agent_mode = agent_requested && self.console.supports_agent_loop();
        if agent_requested && !agent_mode {
            println!(
                "{} does not support agent mode; running a single turn",
                self.console.describe_backend()
            );
        }

        let mut pending: Option<CodeProposal> = None;

        {
            let mut emit = EventRenderer::new();
            self.console.generate(prompt, agent_mode, &mut |event| {
                emit.render_capturing(event, &mut pending)
            })?;
        }

        while let Some(proposal) = pending.take() {
            let approved = if proposal.agent_mode {
                // Unattended loop: execute as proposed.
                proposal
            } else {
                match self.approve(&proposal) {
                    Some(code) => CodeProposal { code, ..proposal },
                    None => {
                        println!("Proposal discarded.");
                        break;
                    }
                }
            };

            let mut emit = EventRenderer::new();
            self.console
                .handle_input(ConsoleInput::ModelCode(approved), &mut |event| {
                    emit.render_capturing(event, &mut pending)
                })?;
        }

        Ok(())
    }

    /// Pre-fills the proposed code for editing; `None` abandons it.
    fn approve(&mut self, proposal: &CodeProposal) -> Option<String> {
        match self
            .editor
            .readline_with_initial(">>> ", (&proposal.code, ""))
        {
            Ok(edited) if edited.trim().is_empty() => None,
            Ok(edited) => Some(edited),
            Err(_) => None,
        }
    }
}

/// Renders console events to the terminal, running the waiting indicator
/// between `WaitingForModel` and the next observable event.
struct EventRenderer {
    spinner: Option<Spinner>,
    streamed: bool,
}

impl EventRenderer {
    fn new() -> Self {
        Self {
            spinner: None,
            streamed: false,
        }
    }

    fn render(&mut self, event: ConsoleEvent) {
        let mut ignored = None;
        self.render_capturing(event, &mut ignored);
    }

    fn render_capturing(&mut self, event: ConsoleEvent, pending: &mut Option<CodeProposal>) {
        if !matches!(event, ConsoleEvent::WaitingForModel) {
            if let Some(spinner) = self.spinner.take() {
                spinner.stop();
            }
        }

        match event {
            ConsoleEvent::WaitingForModel => {
                self.spinner = Some(Spinner::start());
            }
            ConsoleEvent::StreamChunk { text } => {
                self.streamed = true;
                print!("{text}");
                let _ = io::stdout().flush();
            }
            ConsoleEvent::ModelMessage { text } => {
                if self.streamed {
                    // The text already streamed; just close the line.
                    println!();
                    self.streamed = false;
                } else {
                    println!("{MESSAGE_RULE}");
                    println!("{text}");
                    println!("{MESSAGE_RULE}");
                }
            }
            ConsoleEvent::CodeResult { text } => {
                print!("{text}");
                let _ = io::stdout().flush();
            }
            ConsoleEvent::WaitingForApproval { proposal } => {
                *pending = Some(proposal);
            }
            ConsoleEvent::WaitingForInput => {}
        }
    }
}

/// Waiting indicator shown while the console blocks on the model.
///
/// Shares only a stop flag with the caller and is joined when stopped, so
/// its lifetime is bounded by the blocking call it decorates.
struct Spinner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    const FRAMES: [&'static str; 4] = ["|", "/", "-", "\\"];
    const FRAME_DELAY_MS: u64 = 120;

    fn start() -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("ailua-spinner".to_string())
            .spawn(move || {
                let mut frame = 0usize;
                while !stop_flag.load(Ordering::Acquire) {
                    print!("\r{} waiting for model", Self::FRAMES[frame % Self::FRAMES.len()]);
                    let _ = io::stdout().flush();
                    frame += 1;
                    thread::sleep(Duration::from_millis(Self::FRAME_DELAY_MS));
                }

                print!("\r{}\r", " ".repeat(24));
                let _ = io::stdout().flush();
            })
            .ok();

        Self { stop, handle }
    }

    fn stop(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.finish();
    }
}
