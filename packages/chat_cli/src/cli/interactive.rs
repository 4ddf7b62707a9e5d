//! The interactive client: one conversation on screen at a time, unread
//! notices for everything else.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::warn;

use chat_sync::{
    ChatHandle, ChatSession, ConnectionState, ConnectionStatus, Listener, Partner, SendError,
    TokenSource, UserId, WebSocketTransport,
};

use super::{format_message, resolve_partner};
use crate::config::ClientConfig;

type Handle = ChatHandle<WebSocketTransport, TokenSource>;

const HELP: &str = "\
/open <partner>   open a conversation (id or display name)
/close            close the current conversation
/partners         list people you have talked to
/unread           list conversations with unread messages
/history          reload the open conversation
/quit             sign out and exit
anything else     send to the open conversation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Open(String),
    Close,
    Partners,
    Unread,
    History,
    Help,
    Quit,
    Say(String),
    Unknown(String),
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Say(line.trim_end_matches(['\r', '\n']).to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "open" | "o" if !arg.is_empty() => Input::Open(arg.to_string()),
        "close" | "c" => Input::Close,
        "partners" | "p" => Input::Partners,
        "unread" | "u" => Input::Unread,
        "history" | "h" => Input::History,
        "help" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        _ => Input::Unknown(format!("/{name}")),
    }
}

pub async fn run(client: &ClientConfig, open: Option<String>) -> Result<()> {
    let identity = client.identity()?;
    let session = ChatSession::start(
        WebSocketTransport::new(client.broker_url.clone()),
        client.credentials.clone(),
        client.session.clone(),
    )
    .context("Failed to start chat session")?;
    let chat = session.handle();

    let status_task = tokio::spawn(show_status(chat.watch_status()));
    let listener = chat.register_listener().await;
    let inbox_task = tokio::spawn(show_incoming(chat.clone(), listener, identity.id.clone()));

    chat.sign_in(identity.clone()).await;
    println!(
        "Signed in as {} ({}). /help for commands.",
        identity.display_name, identity.id
    );

    let directory = match chat.all_users().await {
        Ok(users) => users,
        Err(e) => {
            warn!(error = %e, "user directory unavailable");
            Vec::new()
        }
    };
    let mut view = View {
        chat: chat.clone(),
        local: identity.id.clone(),
        directory,
        open: None,
    };
    if let Some(partner) = open {
        view.open(&partner).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !view.handle(parse_input(&line)).await {
            break;
        }
    }

    inbox_task.abort();
    status_task.abort();
    session.shutdown().await;
    println!("Signed out.");
    Ok(())
}

async fn show_status(mut status: watch::Receiver<ConnectionStatus>) {
    let mut last = status.borrow().state;
    while status.changed().await.is_ok() {
        let state = status.borrow_and_update().state;
        if state == last {
            continue;
        }
        last = state;
        match state {
            ConnectionState::Connecting => println!("* connecting..."),
            ConnectionState::Connected => println!("* connected"),
            ConnectionState::Disconnected => println!("* disconnected"),
        }
    }
}

async fn show_incoming(chat: Handle, mut listener: Listener, local: UserId) {
    while let Some(message) = listener.messages.recv().await {
        let partner = message.counterpart(&local).clone();
        if chat.active_partner().await.as_ref() == Some(&partner) {
            println!("{}", format_message(&message, &local));
        } else {
            let from = if message.sender_display_name.is_empty() {
                message.sender_id.to_string()
            } else {
                message.sender_display_name.clone()
            };
            println!(
                "* new message from {from} ({} unread)",
                chat.unread_count().await
            );
        }
    }
}

struct View {
    chat: Handle,
    local: UserId,
    directory: Vec<Partner>,
    open: Option<Partner>,
}

impl View {
    /// Returns false when the user asked to quit.
    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Quit => return false,
            Input::Empty => {}
            Input::Help => println!("{HELP}"),
            Input::Open(query) => self.open(&query).await,
            Input::Close => {
                self.open = None;
                self.chat.select_partner(None).await;
            }
            Input::Partners => self.list_partners().await,
            Input::Unread => self.list_unread().await,
            Input::History => match self.open.clone() {
                Some(partner) => self.show(&partner).await,
                None => println!("Open a conversation first: /open <partner>"),
            },
            Input::Say(text) => self.say(&text).await,
            Input::Unknown(command) => println!("Unknown command {command}. /help for commands."),
        }
        true
    }

    async fn open(&mut self, query: &str) {
        let partner = resolve_partner(query, &self.directory);
        if partner.id == self.local {
            println!("That's you.");
            return;
        }
        self.chat.select_partner(Some(partner.id.clone())).await;
        self.open = Some(partner.clone());
        self.show(&partner).await;
    }

    /// Load history (merging with anything already received) and print the
    /// whole conversation.
    async fn show(&self, partner: &Partner) {
        println!("--- {} ---", partner.display_name);
        if let Err(e) = self.chat.load_history(&partner.id).await {
            println!("* could not load history: {e}");
        }
        for message in self.chat.conversation(&partner.id).await {
            println!("{}", format_message(&message, &self.local));
        }
    }

    async fn say(&self, text: &str) {
        let Some(partner) = &self.open else {
            println!("Open a conversation first: /open <partner>");
            return;
        };
        match self.chat.send(partner, text).await {
            Ok(_) => {}
            Err(SendError::NotConnected) => println!("* not connected, message not sent"),
            Err(e) => println!("* not sent: {e}"),
        }
    }

    async fn list_partners(&mut self) {
        let partners = match self.chat.partners().await {
            Ok(partners) => partners,
            Err(e) => {
                println!("* could not list partners: {e}");
                return;
            }
        };
        if partners.is_empty() {
            println!("No chat partners yet.");
            return;
        }
        let unread = self.chat.unread().await;
        for partner in &partners {
            let marker = if unread.contains(&partner.id) { "*" } else { " " };
            println!("{marker} {:<24} {}", partner.display_name, partner.id);
        }
        for partner in partners {
            if !self.directory.iter().any(|p| p.id == partner.id) {
                self.directory.push(partner);
            }
        }
    }

    async fn list_unread(&self) {
        let unread = self.chat.unread().await;
        if unread.is_empty() {
            println!("No unread messages.");
            return;
        }
        let names: Vec<String> = unread
            .iter()
            .map(|id| {
                self.directory
                    .iter()
                    .find(|p| &p.id == id)
                    .map_or_else(|| id.to_string(), |p| p.display_name.clone())
            })
            .collect();
        println!("Unread: {}", names.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse_input("hello there\n"), Input::Say("hello there".into()));
        assert_eq!(parse_input("  indented"), Input::Say("  indented".into()));
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_input("   \t"), Input::Empty);
    }

    #[test]
    fn commands_and_aliases() {
        assert_eq!(parse_input("/open Bob Smith"), Input::Open("Bob Smith".into()));
        assert_eq!(parse_input("/o bob"), Input::Open("bob".into()));
        assert_eq!(parse_input("/close"), Input::Close);
        assert_eq!(parse_input("/partners"), Input::Partners);
        assert_eq!(parse_input("/u"), Input::Unread);
        assert_eq!(parse_input("/history"), Input::History);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/?"), Input::Help);
    }

    #[test]
    fn open_needs_a_partner() {
        assert_eq!(parse_input("/open"), Input::Unknown("/open".into()));
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert_eq!(parse_input("/dance now"), Input::Unknown("/dance".into()));
    }
}
