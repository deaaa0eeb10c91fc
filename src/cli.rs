use anyhow::{Context, Result};
use ragchat::api::ChatClient;
use ragchat::config::ClientConfig;
use ragchat::conversation::{Conversation, ConversationState};
use ragchat::render::TranscriptView;
use ragchat::session::{FileSessionStorage, SessionIdentityStore};
use ragchat::types::{MessageId, Role};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const SAMPLE_QUESTIONS: [&str; 6] = [
    "What is LlamaIndex?",
    "How do I install LlamaIndex?",
    "What vector stores are supported?",
    "What is RAG?",
    "How do I use Anthropic with LlamaIndex?",
    "What is LlamaCloud pricing?",
];

const HELP: &str = "Commands:
  /clear          start over (also clears the server-side session)
  /history        show the server's memory of this session
  /samples        list sample questions
  /ask <n>        send sample question n
  /save <path>    write the transcript as HTML
  /reindex        ask the backend to re-index its documents
  /session        show the session id
  /quit           exit";

#[derive(Debug, PartialEq)]
enum Command {
    Message(String),
    Clear,
    History,
    Samples,
    Ask(usize),
    Save(PathBuf),
    Reindex,
    Session,
    Help,
    Quit,
    Invalid(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Message(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name {
        "clear" => Command::Clear,
        "history" => Command::History,
        "samples" => Command::Samples,
        "ask" => match arg.parse::<usize>() {
            Ok(n) if (1..=SAMPLE_QUESTIONS.len()).contains(&n) => Command::Ask(n),
            _ => Command::Invalid(format!(
                "usage: /ask <1-{}>",
                SAMPLE_QUESTIONS.len()
            )),
        },
        "save" if !arg.is_empty() => Command::Save(PathBuf::from(arg)),
        "save" => Command::Invalid("usage: /save <path>".to_string()),
        "reindex" => Command::Reindex,
        "session" => Command::Session,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command /{other}, try /help")),
    };
    Some(command)
}

/// Turns successive conversation snapshots into terminal output.
///
/// Only the newest assistant message is followed; content that no longer
/// extends what was already printed (an error annotation) is reprinted on a
/// fresh line.
#[derive(Default)]
struct TerminalPrinter {
    current: Option<MessageId>,
    printed: String,
    finished: bool,
}

impl TerminalPrinter {
    fn delta(&mut self, state: &ConversationState) -> String {
        let Some(msg) = state.messages.last().filter(|msg| msg.role == Role::Assistant) else {
            return String::new();
        };
        if self.current.as_ref() != Some(&msg.id) {
            self.current = Some(msg.id.clone());
            self.printed.clear();
            self.finished = false;
        }
        if self.finished {
            return String::new();
        }

        let mut out = match msg.content.strip_prefix(self.printed.as_str()) {
            Some(fresh) => fresh.to_string(),
            None => format!("\n{}", msg.content),
        };
        self.printed = msg.content.clone();
        if !msg.is_streaming {
            self.finished = true;
            out.push('\n');
        }
        out
    }
}

fn print_flush(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn print_samples() {
    println!("Try asking:");
    for (i, question) in SAMPLE_QUESTIONS.iter().enumerate() {
        println!("  {}. {}", i + 1, question);
    }
}

async fn send_and_print(
    conversation: &Conversation<ChatClient>,
    printer: &mut TerminalPrinter,
    text: &str,
) {
    let mut updates = conversation.subscribe();
    updates.borrow_and_update();

    let follow = async {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            print_flush(&printer.delta(&state));
            if !state.is_loading() {
                break;
            }
        }
    };
    tokio::join!(conversation.send(text), follow);
}

pub async fn run(config: ClientConfig) -> Result<()> {
    let store = SessionIdentityStore::new(FileSessionStorage::for_scope(&config.session_scope));
    let session_id = store.get_or_create_session_id();
    let client = ChatClient::new(&config.api_base);

    match client.health().await {
        Ok(health) => tracing::info!(status = %health.status, "{}", health.message),
        Err(err) => {
            tracing::warn!(error = %err, base = %client.base_url(), "health check failed");
            eprintln!("API is not available at {} ({err})", client.base_url());
        }
    }

    let conversation = Conversation::new(client, session_id);
    let mut printer = TerminalPrinter::default();
    let mut view = TranscriptView::new();

    let initial = conversation.snapshot();
    if let Some(welcome) = initial.messages.first() {
        println!("{}\n", welcome.content);
    }
    if view.render(&initial).show_sample_questions {
        print_samples();
    }
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_flush("\n> ");
        let Some(line) = lines.next_line().await.context("failed to read input")? else {
            break;
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            Command::Message(text) => send_and_print(&conversation, &mut printer, &text).await,
            Command::Ask(n) => {
                let question = SAMPLE_QUESTIONS[n - 1];
                println!("> {question}");
                send_and_print(&conversation, &mut printer, question).await;
            }
            Command::Clear => {
                conversation.clear().await;
                let state = conversation.snapshot();
                if let Some(greeting) = state.messages.first() {
                    println!("{}", greeting.content);
                }
                if view.render(&state).show_sample_questions {
                    print_samples();
                }
            }
            Command::History => {
                match conversation.transport().history(conversation.session_id()).await {
                    Ok(history) if history.messages.is_empty() => {
                        println!("No history on the server for this session.")
                    }
                    Ok(history) => {
                        for entry in history.messages {
                            println!("[{}] {}", entry.role, entry.content);
                        }
                    }
                    Err(err) => eprintln!("Failed to fetch history: {err}"),
                }
            }
            Command::Samples => print_samples(),
            Command::Save(path) => {
                let frame = view.render(&conversation.snapshot());
                let html = frame.to_html_document("RAG chat transcript");
                match std::fs::write(&path, html) {
                    Ok(()) => println!("Saved transcript to {}", path.display()),
                    Err(err) => eprintln!("Failed to save transcript: {err}"),
                }
            }
            Command::Reindex => match conversation.transport().reindex().await {
                Ok(report) => println!(
                    "Re-indexed {} documents ({})",
                    report.documents_indexed, report.status
                ),
                Err(err) => eprintln!("Failed to re-index: {err}"),
            },
            Command::Session => println!("{}", conversation.session_id()),
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Invalid(message) => eprintln!("{message}"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragchat::types::ChatMessage;

    fn state(messages: Vec<ChatMessage>) -> ConversationState {
        ConversationState {
            messages,
            in_flight: None,
            last_error: None,
        }
    }

    #[test]
    fn parses_messages_and_commands() {
        assert_eq!(parse_command("   "), None);
        assert_eq!(
            parse_command(" What is RAG? "),
            Some(Command::Message("What is RAG?".into()))
        );
        assert_eq!(parse_command("/clear"), Some(Command::Clear));
        assert_eq!(parse_command("/ask 4"), Some(Command::Ask(4)));
        assert!(matches!(parse_command("/ask 9"), Some(Command::Invalid(_))));
        assert_eq!(
            parse_command("/save out/chat.html"),
            Some(Command::Save(PathBuf::from("out/chat.html")))
        );
        assert!(matches!(parse_command("/save"), Some(Command::Invalid(_))));
        assert!(matches!(parse_command("/bogus"), Some(Command::Invalid(_))));
    }

    #[test]
    fn printer_emits_only_new_text() {
        let mut printer = TerminalPrinter::default();
        let mut reply = ChatMessage::assistant_placeholder();

        assert_eq!(printer.delta(&state(vec![reply.clone()])), "");
        reply.content.push_str("RAG ");
        assert_eq!(printer.delta(&state(vec![reply.clone()])), "RAG ");
        reply.content.push_str("is...");
        assert_eq!(printer.delta(&state(vec![reply.clone()])), "is...");
        reply.is_streaming = false;
        assert_eq!(printer.delta(&state(vec![reply.clone()])), "\n");
        assert_eq!(printer.delta(&state(vec![reply])), "");
    }

    #[test]
    fn printer_reprints_replaced_content() {
        let mut printer = TerminalPrinter::default();
        let mut reply = ChatMessage::assistant_placeholder();
        reply.content.push_str("partial");
        printer.delta(&state(vec![reply.clone()]));

        reply.content = "Sorry, I encountered an error: boom".into();
        reply.is_streaming = false;
        assert_eq!(
            printer.delta(&state(vec![reply])),
            "\nSorry, I encountered an error: boom\n"
        );
    }
}
