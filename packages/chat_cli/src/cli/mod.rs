pub mod interactive;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;

use chat_sync::api::ChatApi;
use chat_sync::{Message, Partner, TokenSource, UserId};

use crate::config::{ChatConfig, ClientConfig, FileConfig};

fn api(client: &ClientConfig) -> Result<ChatApi<TokenSource>> {
    ChatApi::new(
        client.session.api_base_url.clone(),
        Arc::new(client.credentials.clone()),
        client.session.request_timeout,
    )
    .context("Failed to build HTTP client")
}

/// `chat partners`
pub async fn partners_command(client: &ClientConfig, all: bool, json: bool) -> Result<()> {
    let identity = client.identity()?;
    let api = api(client)?;
    let partners = if all {
        api.all_users(&identity.id).await
    } else {
        api.chat_partners(&identity.id).await
    }
    .context("Failed to fetch partners")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&partners)?);
        return Ok(());
    }
    if partners.is_empty() {
        println!("No chat partners yet.");
        return Ok(());
    }
    for partner in &partners {
        println!("{:<24} {}", partner.display_name, partner.id);
    }
    Ok(())
}

/// `chat history <partner>`
pub async fn history_command(client: &ClientConfig, partner: &str, json: bool) -> Result<()> {
    let identity = client.identity()?;
    let messages = api(client)?
        .history(&UserId::new(partner))
        .await
        .with_context(|| format!("Failed to fetch history with {partner}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("No messages with {partner}.");
    }
    for message in &messages {
        println!("{}", format_message(message, &identity.id));
    }
    Ok(())
}

/// `chat config`
pub fn config_command(chat_config: &ChatConfig, file_config: &FileConfig) -> Result<()> {
    println!("# {}", chat_config.config_toml_path().display());
    print!("{}", toml::to_string_pretty(&file_config.redacted())?);
    Ok(())
}

/// `[12:03] Alice: hello`, with "you" for our own messages.
pub fn format_message(message: &Message, local: &UserId) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let who = if &message.sender_id == local {
        "you"
    } else if message.sender_display_name.is_empty() {
        message.sender_id.as_str()
    } else {
        message.sender_display_name.as_str()
    };
    format!("[{time}] {who}: {}", message.content)
}

/// Find a partner by exact id, then by case-insensitive display name.
/// Unknown queries are taken as a raw user id.
pub fn resolve_partner(query: &str, directory: &[Partner]) -> Partner {
    directory
        .iter()
        .find(|p| p.id.as_str() == query)
        .or_else(|| {
            directory
                .iter()
                .find(|p| p.display_name.eq_ignore_ascii_case(query))
        })
        .cloned()
        .unwrap_or_else(|| Partner::new(query, query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_sync::Identity;
    use chrono::Utc;

    fn directory() -> Vec<Partner> {
        vec![
            Partner::new("user_1", "Alice"),
            Partner::new("user_2", "Bob"),
        ]
    }

    #[test]
    fn resolves_by_id_then_name() {
        assert_eq!(resolve_partner("user_2", &directory()).display_name, "Bob");
        assert_eq!(resolve_partner("alice", &directory()).id, UserId::new("user_1"));
    }

    #[test]
    fn unknown_partner_is_a_raw_id() {
        let p = resolve_partner("user_9", &directory());
        assert_eq!(p.id, UserId::new("user_9"));
        assert_eq!(p.display_name, "user_9");
    }

    #[test]
    fn formats_own_and_partner_messages() {
        let me = Identity::new("me", "Me");
        let bob = Partner::new("bob", "Bob");
        let mine = Message::compose(&me, &bob, "hi", Utc::now());
        assert!(format_message(&mine, &me.id).ends_with("] you: hi"));

        let theirs = Message::compose(&Identity::new("bob", "Bob"), &Partner::new("me", "Me"), "yo", Utc::now());
        assert!(format_message(&theirs, &me.id).ends_with("] Bob: yo"));
    }
}
