//! Command-line surface over the dashboard.

use crate::auth::{password_strength, AuthState, PasswordStrength, Registration};
use crate::chat::{filter_chats, Message, Role};
use crate::config::AppConfig;
use crate::dashboard::Dashboard;
use crate::notes::parse_tags;
use crate::registry::Document;
use crate::upload::{read_upload, UploadStage};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "clearchart", version, about = "Health records and AI chat from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in with email/password or a Google id token
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long, conflicts_with_all = ["email", "password"])]
        google_id_token: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        accept_terms: bool,
    },
    Logout,
    Whoami,
    /// List records; `--watch` keeps refreshing until processing finishes
    Documents {
        #[arg(long)]
        watch: bool,
    },
    Upload {
        path: PathBuf,
    },
    Delete {
        id: String,
    },
    ViewUrl {
        id: String,
    },
    Summaries,
    /// Ask a question about your records
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    NewChat,
    History {
        #[arg(long)]
        filter: Option<String>,
    },
    Resume {
        chat_id: String,
        #[arg(long)]
        name: Option<String>,
    },
    Notes {
        #[command(subcommand)]
        action: NotesCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum NotesCommand {
    List {
        #[arg(long)]
        search: Option<String>,
        /// Comma-separated
        #[arg(long)]
        tags: Option<String>,
    },
    Add {
        content: String,
        #[arg(long)]
        tags: Option<String>,
    },
    Edit {
        id: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        tags: Option<String>,
    },
    Rm {
        id: String,
    },
}

fn prompt(label: &str) -> io::Result<String> {
    eprint!("{}: ", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn document_line(doc: &Document) -> String {
    format!(
        "{:<38} {:<10} {:<10} {}",
        doc.id,
        doc.status.label(),
        doc.display_date(),
        doc.title
    )
}

fn print_document(doc: &Document) {
    println!("{}", document_line(doc));
}

fn print_message(message: &Message) {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("[{}] {}", who, message.content);
}

async fn require_session(dashboard: &Dashboard) -> CliResult {
    match dashboard.session().ready().await {
        AuthState::SignedIn(_) => Ok(()),
        _ => Err("Not signed in. Run `clearchart login` first.".into()),
    }
}

pub async fn execute(cli: Cli) -> CliResult {
    let config = AppConfig::from_env()?;
    let dashboard = Dashboard::connect(&config).await?;

    match cli.command {
        Command::Login {
            email,
            password,
            google_id_token,
        } => {
            let result = match google_id_token {
                Some(token) => dashboard.login_with_google(&token).await,
                None => {
                    let email = match email {
                        Some(e) => e,
                        None => prompt("Email")?,
                    };
                    let password = match password {
                        Some(p) => p,
                        None => prompt("Password")?,
                    };
                    dashboard.login(&email, &password).await
                }
            };
            let session = result.map_err(|e| e.user_message())?;
            println!("Signed in as {}", session.label());
            if let Some(warning) = dashboard.session().auth_error() {
                eprintln!("{}", warning);
            }
        }
        Command::Register {
            email,
            name,
            password,
            accept_terms,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt("Password")?,
            };
            let confirm_password = prompt("Confirm password")?;
            if password_strength(&password) == PasswordStrength::Weak {
                eprintln!("Warning: weak password");
            }
            let form = Registration {
                email,
                display_name: name,
                password,
                confirm_password,
                accepted_terms: accept_terms,
            };
            let session = dashboard
                .register(&form)
                .await
                .map_err(|e| e.user_message())?;
            println!("Account created for {}", session.label());
        }
        Command::Logout => {
            dashboard.logout().await?;
            println!("Signed out");
        }
        Command::Whoami => match dashboard.session().ready().await {
            AuthState::SignedIn(session) => {
                println!("{}", session.label());
                if let Some(email) = &session.email {
                    println!("{}", email);
                }
            }
            _ => println!("Not signed in"),
        },
        Command::Documents { watch } => {
            require_session(&dashboard).await?;
            dashboard.mount().await;
            let registry = dashboard.registry();
            registry.documents().iter().for_each(print_document);
            if watch {
                while registry.has_pending() {
                    tokio::time::sleep(config.poll_interval).await;
                    println!();
                    registry.documents().iter().for_each(print_document);
                }
            }
        }
        Command::Upload { path } => {
            require_session(&dashboard).await?;
            let file = read_upload(&path)?;
            let doc = dashboard
                .uploads()
                .upload(file, |stage| {
                    let label = match stage {
                        UploadStage::Uploading => "Uploading...",
                        UploadStage::Processing => "Processing...",
                        UploadStage::Complete => "Complete",
                    };
                    eprintln!("{}", label);
                })
                .await?;
            print_document(&doc);
        }
        Command::Delete { id } => {
            require_session(&dashboard).await?;
            dashboard.registry().delete(&id).await?;
            println!("Deleted {}", id);
        }
        Command::ViewUrl { id } => {
            require_session(&dashboard).await?;
            println!("{}", dashboard.registry().view_url(&id).await?);
        }
        Command::Summaries => {
            require_session(&dashboard).await?;
            for summary in dashboard.registry().summaries().await? {
                println!(
                    "{} ({})",
                    summary.filename.as_deref().unwrap_or(&summary.id),
                    summary.processing_status.as_deref().unwrap_or("unknown")
                );
                if let Some(text) = &summary.summary {
                    println!("  {}", text);
                }
            }
        }
        Command::Ask { question } => {
            require_session(&dashboard).await?;
            let chat = dashboard.chat();
            let Some(reply) = chat.send(&question.join(" ")).await else {
                return Err("Nothing to send".into());
            };
            print_message(&reply);
            let titles = chat.source_titles(&reply).await;
            for source in reply.unique_sources() {
                let title = titles
                    .get(&source.document_id)
                    .map(String::as_str)
                    .unwrap_or("Document");
                match source.page {
                    Some(page) => println!("  source: {} (p. {})", title, page),
                    None => println!("  source: {}", title),
                }
            }
            if let Some(id) = chat.chat_id() {
                eprintln!("chat: {}", id);
            }
        }
        Command::NewChat => {
            dashboard.chat().new_chat();
            println!("Started a new chat");
        }
        Command::History { filter } => {
            require_session(&dashboard).await?;
            let chats = dashboard.chat().history().await?;
            for chat in filter_chats(&chats, filter.as_deref().unwrap_or("")) {
                println!(
                    "{:<38} {} ({} messages)",
                    chat.chat_id,
                    chat.display_title(),
                    chat.message_count
                );
            }
        }
        Command::Resume { chat_id, name } => {
            require_session(&dashboard).await?;
            let chat = dashboard.chat();
            chat.resume(&chat_id, name.as_deref()).await?;
            chat.messages().iter().for_each(print_message);
        }
        Command::Notes { action } => {
            require_session(&dashboard).await?;
            run_notes(&dashboard, action).await?;
        }
    }
    Ok(())
}

async fn run_notes(dashboard: &Dashboard, action: NotesCommand) -> CliResult {
    let notes = dashboard.notes();
    match action {
        NotesCommand::List { search, tags } => {
            let tags = tags.as_deref().map(parse_tags).unwrap_or_default();
            for note in notes.list(search.as_deref(), &tags).await? {
                let tags = if note.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", note.tags.join(", "))
                };
                println!("{}{}\n  {}", note.note_id, tags, note.content);
            }
        }
        NotesCommand::Add { content, tags } => {
            let tags = tags.as_deref().map(parse_tags).unwrap_or_default();
            let note = notes.create(&content, tags).await?;
            println!("Created note {}", note.note_id);
        }
        NotesCommand::Edit { id, content, tags } => {
            let tags = tags.as_deref().map(parse_tags);
            notes.update(&id, content.as_deref(), tags).await?;
            println!("Updated note {}", id);
        }
        NotesCommand::Rm { id } => {
            notes.delete(&id).await?;
            println!("Deleted note {}", id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn document_line_shows_title_and_status() {
        let mut record = crate::api::models::DocumentRecord {
            document_id: "d1".into(),
            filename: "labs.pdf".into(),
            processing_status: Some("processing".into()),
            upload_date: Some("2025-03-04T10:11:12".into()),
            ..Default::default()
        };
        let line = document_line(&Document::from(record.clone()));
        assert!(line.starts_with("d1 "));
        assert!(line.contains("Processing"));
        assert!(line.contains("2025-03-04"));
        assert!(line.ends_with("labs.pdf"));

        record.title = Some("Lipid panel".into());
        assert!(document_line(&Document::from(record)).ends_with("Lipid panel"));
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_joins_words() {
        let cli = Cli::try_parse_from(["clearchart", "ask", "What", "is", "LDL?"]).unwrap();
        match cli.command {
            Command::Ask { question } => assert_eq!(question.join(" "), "What is LDL?"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn notes_subcommands_parse() {
        let cli = Cli::try_parse_from(["clearchart", "notes", "list", "--tags", "labs, bp"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Notes {
                action: NotesCommand::List { tags: Some(_), search: None }
            }
        ));
        assert!(Cli::try_parse_from(["clearchart", "documents", "--watch"]).is_ok());
    }

    #[test]
    fn google_token_excludes_password_login() {
        let err = Cli::try_parse_from([
            "clearchart",
            "login",
            "--email",
            "a@b.c",
            "--google-id-token",
            "tok",
        ]);
        assert!(err.is_err());
    }
}
