use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::db::Repository;
use crate::dispatch::chunk_lines;
use crate::error::{AppError, Result};
use crate::models::TagFilter;
use crate::registry::SiteRegistry;
use crate::telegram::TelegramClient;

// Informational replies are split well below the hard message limit.
const REPLY_CHUNK_LEN: usize = 500;

const DEFAULT_SITE: &str = "stackoverflow";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Add { site: String, filter: TagFilter },
    Delete(DeleteTarget),
    List,
    Sites,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    All,
    Ordinal(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    EmptySite,
    EmptyFilter,
    BadOrdinal,
}

impl ParseError {
    fn reply(self) -> &'static str {
        match self {
            ParseError::EmptySite => "Empty site name",
            ParseError::EmptyFilter => "Empty all tag lists",
            ParseError::BadOrdinal => "Incorrect number",
        }
    }
}

/// Parse a chat message into a command. Returns None for plain text and
/// unknown commands, which are ignored.
pub fn parse_command(text: &str) -> Option<std::result::Result<Command, ParseError>> {
    let mut tokens = text.trim().split_whitespace();
    let head = tokens.next()?;
    // Commands in group chats arrive as /command@botname.
    let name = head.split('@').next().unwrap_or(head);

    match name {
        "/start" => Some(Ok(Command::Start)),
        "/list" => Some(Ok(Command::List)),
        "/sites" => Some(Ok(Command::Sites)),
        "/del" => Some(parse_delete(tokens.next())),
        "/add" => Some(parse_add(tokens)),
        _ => None,
    }
}

fn parse_delete(arg: Option<&str>) -> std::result::Result<Command, ParseError> {
    match arg {
        Some("all") => Ok(Command::Delete(DeleteTarget::All)),
        Some(n) => match n.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Command::Delete(DeleteTarget::Ordinal(n))),
            _ => Err(ParseError::BadOrdinal),
        },
        None => Err(ParseError::BadOrdinal),
    }
}

/// `/add [site=<slug>] tags=a,b tags_all=c tags_exclude=d`
///
/// A `tags*=` token switches the active list; bare tokens keep appending to
/// it, so `tags=rust tokio` and `tags=rust,tokio` are equivalent.
fn parse_add<'a, I>(tokens: I) -> std::result::Result<Command, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    #[derive(Clone, Copy)]
    enum Mode {
        None,
        Any,
        All,
        Exclude,
    }

    let mut site = DEFAULT_SITE.to_string();
    let mut filter = TagFilter::default();
    let mut mode = Mode::None;

    for token in tokens {
        if let Some(rest) = token.strip_prefix("tags=") {
            mode = Mode::Any;
            push_tags(&mut filter.any, rest);
        } else if let Some(rest) = token.strip_prefix("tags_any=") {
            mode = Mode::Any;
            push_tags(&mut filter.any, rest);
        } else if let Some(rest) = token.strip_prefix("tags_all=") {
            mode = Mode::All;
            push_tags(&mut filter.all, rest);
        } else if let Some(rest) = token.strip_prefix("tags_exclude=") {
            mode = Mode::Exclude;
            push_tags(&mut filter.exclude, rest);
        } else if let Some(rest) = token.strip_prefix("site=") {
            site = rest.to_string();
        } else {
            match mode {
                Mode::None => {}
                Mode::Any => push_tags(&mut filter.any, token),
                Mode::All => push_tags(&mut filter.all, token),
                Mode::Exclude => push_tags(&mut filter.exclude, token),
            }
        }
    }

    if site.is_empty() {
        return Err(ParseError::EmptySite);
    }
    if filter.is_empty() {
        return Err(ParseError::EmptyFilter);
    }
    Ok(Command::Add { site, filter })
}

fn push_tags(list: &mut Vec<String>, value: &str) {
    for tag in value.split(',') {
        let tag = strip_quotes(tag.trim());
        if !tag.is_empty() {
            list.push(tag.to_string());
        }
    }
}

fn strip_quotes(tag: &str) -> &str {
    tag.strip_prefix('\'')
        .map(|t| t.strip_suffix('\'').unwrap_or(t))
        .unwrap_or(tag)
}

pub struct CommandHandler {
    repo: Repository,
    registry: Arc<SiteRegistry>,
    telegram: TelegramClient,
}

impl CommandHandler {
    pub fn new(repo: Repository, registry: Arc<SiteRegistry>, telegram: TelegramClient) -> Self {
        Self {
            repo,
            registry,
            telegram,
        }
    }

    /// Long-poll for inbound commands until shutdown is requested. A failing
    /// command never kills the loop; it is logged and the next update is
    /// processed.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut shutdown = shutdown;
        let mut offset = 0i64;

        while !*shutdown.borrow() {
            let updates = tokio::select! {
                result = self.telegram.get_updates(offset) => result,
                _ = shutdown.changed() => break,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("Failed to poll for updates: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else {
                    continue;
                };
                if let Err(e) = self.handle_message(message.chat.id, &text).await {
                    tracing::warn!("Command from chat {} failed: {}", message.chat.id, e);
                }
            }
        }

        tracing::info!("Command loop stopped");
    }

    async fn handle_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let command = match parse_command(text) {
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                tracing::debug!("Rejected command from chat {}: {:?}", chat_id, e);
                return self.reply(chat_id, e.reply()).await;
            }
            None => return Ok(()),
        };

        match command {
            Command::Start => Ok(()),

            Command::Add { site, filter } => {
                let site_id = self.registry.resolve(&self.repo, &site).await?;
                self.repo
                    .insert_subscription(chat_id, site_id, &filter)
                    .await?;
                tracing::info!("Chat {} subscribed to {}", chat_id, site);
                self.reply(chat_id, "Success").await
            }

            Command::Delete(DeleteTarget::All) => {
                let removed = self.repo.delete_subscriptions_for_chat(chat_id).await?;
                tracing::info!("Chat {} deleted its {} subscriptions", chat_id, removed);
                self.reply(chat_id, "Success").await
            }

            Command::Delete(DeleteTarget::Ordinal(n)) => {
                if self.repo.delete_subscription_by_ordinal(chat_id, n).await? {
                    self.reply(chat_id, "Success").await
                } else {
                    self.reply(chat_id, "Incorrect number").await
                }
            }

            Command::List => {
                let subscriptions = self.repo.list_subscriptions(chat_id).await?;
                let mut lines = vec!["Active subscriptions:\n".to_string()];
                for (n, (site, filter)) in subscriptions.iter().enumerate() {
                    lines.push(format!(
                        "№ {}. Site: {}, tags {}\n",
                        n + 1,
                        site,
                        serde_json::to_string(filter)?
                    ));
                }
                self.reply_chunked(chat_id, lines).await
            }

            Command::Sites => {
                let slugs = self.registry.known_slugs().await;
                let mut lines = vec!["Stack Exchange sites supported:\n".to_string()];
                lines.extend(slugs.into_iter().map(|slug| format!("{},\n", slug)));
                self.reply_chunked(chat_id, lines).await
            }
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        match self.telegram.send_message(chat_id, text).await {
            // The chat just wrote to us; an unreachable reply target is
            // nothing to recover from.
            Err(AppError::RecipientUnreachable(_)) => Ok(()),
            other => other,
        }
    }

    async fn reply_chunked(&self, chat_id: i64, lines: Vec<String>) -> Result<()> {
        for chunk in chunk_lines(lines, REPLY_CHUNK_LEN) {
            self.reply(chat_id, &chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(text: &str) -> Command {
        parse_command(text).unwrap().unwrap()
    }

    #[test]
    fn plain_text_and_unknown_commands_are_ignored() {
        assert!(parse_command("hello there").is_none());
        assert!(parse_command("/frobnicate now").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn bot_name_suffix_is_stripped() {
        assert_eq!(parse_command("/list@stack_watcher_bot"), Some(Ok(Command::List)));
    }

    #[test]
    fn add_defaults_to_stackoverflow() {
        let Command::Add { site, filter } = add("/add tags=rust,tokio") else {
            panic!("expected add");
        };
        assert_eq!(site, "stackoverflow");
        assert_eq!(filter.any, vec!["rust", "tokio"]);
        assert!(filter.all.is_empty());
        assert!(filter.exclude.is_empty());
    }

    #[test]
    fn add_accepts_all_token_forms() {
        let Command::Add { site, filter } =
            add("/add site=askubuntu tags_any=bash tags_all=docker iptables tags_exclude='cpp',go")
        else {
            panic!("expected add");
        };
        assert_eq!(site, "askubuntu");
        assert_eq!(filter.any, vec!["bash"]);
        assert_eq!(filter.all, vec!["docker", "iptables"]);
        assert_eq!(filter.exclude, vec!["cpp", "go"]);
    }

    #[test]
    fn bare_tokens_continue_the_active_list() {
        let Command::Add { filter, .. } = add("/add tags= rust tokio tags_exclude= homework") else {
            panic!("expected add");
        };
        assert_eq!(filter.any, vec!["rust", "tokio"]);
        assert_eq!(filter.exclude, vec!["homework"]);
    }

    #[test]
    fn add_requires_at_least_one_tag_list() {
        assert_eq!(
            parse_command("/add site=askubuntu"),
            Some(Err(ParseError::EmptyFilter))
        );
        assert_eq!(parse_command("/add"), Some(Err(ParseError::EmptyFilter)));
    }

    #[test]
    fn add_rejects_empty_site() {
        assert_eq!(
            parse_command("/add site= tags=rust"),
            Some(Err(ParseError::EmptySite))
        );
    }

    #[test]
    fn delete_parses_all_and_ordinals() {
        assert_eq!(
            parse_command("/del all"),
            Some(Ok(Command::Delete(DeleteTarget::All)))
        );
        assert_eq!(
            parse_command("/del 3"),
            Some(Ok(Command::Delete(DeleteTarget::Ordinal(3))))
        );
        assert_eq!(parse_command("/del"), Some(Err(ParseError::BadOrdinal)));
        assert_eq!(parse_command("/del x"), Some(Err(ParseError::BadOrdinal)));
        assert_eq!(parse_command("/del 0"), Some(Err(ParseError::BadOrdinal)));
    }

    #[test]
    fn quotes_are_stripped_from_tags() {
        let Command::Add { filter, .. } = add("/add tags='c++','objective-c'") else {
            panic!("expected add");
        };
        assert_eq!(filter.any, vec!["c++", "objective-c"]);
    }
}
