//! Subscriber commands.
//!
//! [`SubscriberService`] implements every operation a subscriber can
//! trigger; [`parse_command`] maps chat text like `/throttle 30` onto
//! [`Command`] values.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leasewatch_id::{MessageId, SubscriberId};
use leasewatch_render::{compose_test_messages, parse_bool, ComposedMessage};
use leasewatch_snapshot::UpdateFrame;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::context::WatcherContext;
use crate::directory::SubscriberHandle;
use crate::error::{Result, WatcherError};
use crate::registry::GroupRegistry;
use crate::subscriber::{Subscriber, EULA_NOT_ACCEPTED};
use crate::transport::InboundMessage;

// =============================================================================
// Commands
// =============================================================================

/// What to do in answer to one inbound message.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Inbound message to remove from the chat.
    pub delete: Option<MessageId>,
    pub replies: Vec<ComposedMessage>,
}

/// A parsed subscriber command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Pause,
    Resume,
    Throttle(Option<u64>),
    SetCredential(String),
    Login { username: String, password: String },
    Eula(Option<bool>),
    SummaryFormat(Option<String>),
    DetailFormat(Option<String>),
    FilterList,
    FilterAdd(String),
    FilterRemove(String),
    IgnoreDetails(bool),
    IgnoreRemoved(bool),
    Whoami,
    Test(usize),
}

const HELP: &str = "\
/start - create your account
/resume - enable update notifications
/pause - pause update notifications
/throttle [minutes] - at most one update every n minutes
/settoken <token> - set your catalog token
/login <username> <password> - fetch a catalog token
/eula [true|false] - accept the terms of use
/summarymessageformat [template] - show or set the summary template
/detailmessageformat [template] - show or set the detail template
/filter list|add <expr>|remove <expr> - manage item filters
/ignoredetails <bool> - only send summaries
/ignoreremoved <bool> - leave removed items out
/whoami - show what is stored about you
/test [n] - send a test notification";

fn bool_arg(name: &str, arg: &str) -> Result<bool> {
    parse_bool(arg.trim())
        .ok_or_else(|| WatcherError::InvalidArgument(format!("/{name} expects true or false")))
}

fn optional(arg: &str) -> Option<String> {
    let arg = arg.trim();
    (!arg.is_empty()).then(|| arg.to_string())
}

/// Split `/name@bot rest` into the lowercased name and the rest.
fn split_command(text: &str) -> Option<(String, &str)> {
    let body = text.trim().strip_prefix('/')?;
    let (head, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    Some((name, rest))
}

/// Returns true if the message is a command that carries a credential,
/// whether or not it parses.
pub fn carries_credentials(text: &str) -> bool {
    matches!(split_command(text), Some((name, _)) if name == "settoken" || name == "login")
}

/// Parse a chat message into a command.
pub fn parse_command(text: &str) -> Result<Command> {
    let Some((name, rest)) = split_command(text) else {
        return Err(WatcherError::InvalidArgument(
            "commands start with '/', see /help".to_string(),
        ));
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "throttle" => match args.as_slice() {
            [] => Command::Throttle(None),
            [minutes] => Command::Throttle(Some(minutes.parse().map_err(|_| {
                WatcherError::InvalidArgument(format!("'{minutes}' is not a number of minutes"))
            })?)),
            _ => return Err(WatcherError::InvalidArgument("usage: /throttle [minutes]".into())),
        },
        "settoken" => match args.as_slice() {
            [token] => Command::SetCredential(token.to_string()),
            _ => return Err(WatcherError::InvalidArgument("usage: /settoken <token>".into())),
        },
        "login" => match args.as_slice() {
            [username, password] => Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            _ => {
                return Err(WatcherError::InvalidArgument(
                    "usage: /login <username> <password>".into(),
                ))
            }
        },
        "eula" => match args.as_slice() {
            [] => Command::Eula(None),
            [value] => Command::Eula(Some(bool_arg("eula", value)?)),
            _ => return Err(WatcherError::InvalidArgument("usage: /eula [true|false]".into())),
        },
        "summarymessageformat" => Command::SummaryFormat(optional(rest)),
        "detailmessageformat" => Command::DetailFormat(optional(rest)),
        "filter" => {
            let rest = rest.trim();
            let (action, expr) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let expr = expr.trim();
            match (action, expr.is_empty()) {
                ("list", _) | ("", _) => Command::FilterList,
                ("add", false) => Command::FilterAdd(expr.to_string()),
                ("remove", false) => Command::FilterRemove(expr.to_string()),
                ("add" | "remove", true) => {
                    return Err(WatcherError::InvalidArgument(format!(
                        "/filter {action} needs a filter expression"
                    )))
                }
                (other, _) => {
                    return Err(WatcherError::InvalidArgument(format!(
                        "unknown filter action '{other}'"
                    )))
                }
            }
        }
        "ignoredetails" => Command::IgnoreDetails(bool_arg("ignoredetails", rest)?),
        "ignoreremoved" => Command::IgnoreRemoved(bool_arg("ignoreremoved", rest)?),
        "whoami" => Command::Whoami,
        "test" => match args.as_slice() {
            [] => Command::Test(0),
            [n] => Command::Test(n.parse().map_err(|_| {
                WatcherError::InvalidArgument(format!("'{n}' is not a number"))
            })?),
            _ => return Err(WatcherError::InvalidArgument("usage: /test [n]".into())),
        },
        other => {
            return Err(WatcherError::InvalidArgument(format!(
                "unknown command /{other}, see /help"
            )))
        }
    };

    Ok(command)
}

// =============================================================================
// System notices
// =============================================================================

/// An operator announcement shown once to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub published_at: DateTime<Utc>,
    pub message: String,

    /// Pause notifications of subscribers that still have them enabled.
    #[serde(default)]
    pub pause_notifications: bool,
}

// =============================================================================
// Service
// =============================================================================

/// Subscriber-facing operations.
pub struct SubscriberService {
    registry: GroupRegistry,
    min_throttle: Duration,
    notices: Vec<SystemNotice>,
    rng: Mutex<StdRng>,
}

impl SubscriberService {
    /// Create a new service.
    pub fn new(registry: GroupRegistry, min_throttle: Duration) -> Self {
        Self {
            registry,
            min_throttle,
            notices: Vec::new(),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Attach system notices, oldest first.
    pub fn with_notices(mut self, mut notices: Vec<SystemNotice>) -> Self {
        notices.sort_by_key(|notice| notice.published_at);
        self.notices = notices;
        self
    }

    /// Use a seeded RNG for test padding.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn ctx(&self) -> &Arc<WatcherContext> {
        self.registry.context()
    }

    async fn handle(&self, id: SubscriberId) -> Result<SubscriberHandle> {
        self.ctx()
            .directory
            .get(id)
            .await
            .ok_or(WatcherError::UnknownSubscriber(id))
    }

    async fn persist(&self) -> Result<()> {
        self.ctx().directory.persist().await?;
        Ok(())
    }

    /// Run a parsed command and return the replies.
    pub async fn run(
        &self,
        id: SubscriberId,
        sender_name: &str,
        command: Command,
    ) -> Result<Vec<ComposedMessage>> {
        let text = match command {
            Command::Start => self.start(id, sender_name).await?,
            Command::Help => HELP.to_string(),
            Command::Pause => self.pause(id).await?,
            Command::Resume => self.resume(id).await?,
            Command::Throttle(minutes) => self.throttle(id, minutes).await?,
            Command::SetCredential(token) => self.set_credential(id, token).await?,
            Command::Login { username, password } => self.login(id, &username, &password).await?,
            Command::Eula(accepted) => self.eula(id, accepted).await?,
            Command::SummaryFormat(template) => self.summary_template(id, template).await?,
            Command::DetailFormat(template) => self.detail_template(id, template).await?,
            Command::FilterList => self.filter_list(id).await?,
            Command::FilterAdd(filter) => self.filter_add(id, filter).await?,
            Command::FilterRemove(filter) => self.filter_remove(id, &filter).await?,
            Command::IgnoreDetails(value) => self.ignore_details(id, value).await?,
            Command::IgnoreRemoved(value) => self.ignore_removed(id, value).await?,
            Command::Whoami => self.whoami(id).await?,
            Command::Test(n) => return self.test(id, n).await,
        };
        Ok(vec![ComposedMessage::plain(text)])
    }

    /// Handle one inbound chat message: pending notices first, then the
    /// command replies or the error it produced. Messages carrying a
    /// credential are marked for deletion.
    pub async fn execute(&self, message: &InboundMessage) -> Response {
        let mut replies = self.pending_notices(message.from).await;

        let result = match parse_command(&message.text) {
            Ok(command) => self.run(message.from, &message.sender_name, command).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(messages) => replies.extend(messages),
            Err(e) => {
                info!(subscriber_id = %message.from, error = %e, "Command failed");
                replies.push(ComposedMessage::plain(format!("Sorry, that did not work: {e}")));
            }
        }

        let delete = carries_credentials(&message.text).then_some(message.id);
        if delete.is_some() {
            replies.push(ComposedMessage::plain(
                "Your message was removed from the chat history.",
            ));
        }
        Response { delete, replies }
    }

    /// Create a record on first contact.
    pub async fn start(&self, id: SubscriberId, name: &str) -> Result<String> {
        let mut subscriber = Subscriber::new(id, name);
        subscriber.last_system_notice = Some(self.ctx().clock.now());

        let (handle, created) = self.ctx().directory.get_or_insert(subscriber).await;
        if !created {
            let name = handle.lock().await.label();
            return Ok(format!("Hello {name}, we already know each other."));
        }

        self.persist().await?;
        info!(subscriber_id = %id, "Subscriber started");
        Ok(format!(
            "Hello {name}, you are registered.\nShare your catalog token with /settoken or /login, accept the terms with /eula true and enable updates with /resume."
        ))
    }

    /// Disable notifications and leave the group.
    pub async fn pause(&self, id: SubscriberId) -> Result<String> {
        let handle = self.handle(id).await?;
        handle.lock().await.notifications_enabled = false;
        self.registry.unregister(id).await;
        self.persist().await?;
        Ok("Notifications paused.".to_string())
    }

    /// Register with the tier group and enable notifications.
    ///
    /// If the tier cannot be resolved the flag is left as it was.
    pub async fn resume(&self, id: SubscriberId) -> Result<String> {
        let handle = self.handle(id).await?;
        let tier = self.registry.register(Arc::clone(&handle)).await?;
        {
            let mut subscriber = handle.lock().await;
            subscriber.notifications_enabled = true;
            subscriber.watcher_error = None;
        }
        self.persist().await?;
        Ok(format!("Notifications enabled for tier {tier}."))
    }

    /// Show or set the throttle.
    pub async fn throttle(&self, id: SubscriberId, minutes: Option<u64>) -> Result<String> {
        let handle = self.handle(id).await?;

        let Some(minutes) = minutes else {
            let throttle = handle.lock().await.throttle;
            return Ok(describe_throttle(throttle));
        };

        let requested = Duration::from_secs(minutes.saturating_mul(60));
        {
            let mut subscriber = handle.lock().await;
            if !subscriber.is_privileged && requested < self.min_throttle {
                return Err(WatcherError::NotPermitted(format!(
                    "the throttle must be at least {} minutes",
                    self.min_throttle.as_secs() / 60
                )));
            }
            subscriber.throttle = requested;
        }
        self.persist().await?;
        Ok(describe_throttle(requested))
    }

    /// Replace the credential. An enabled subscriber is moved to the
    /// credential's tier group.
    pub async fn set_credential(&self, id: SubscriberId, credential: String) -> Result<String> {
        let handle = self.handle(id).await?;
        let enabled = {
            let mut subscriber = handle.lock().await;
            subscriber.credential = Some(credential);
            subscriber.notifications_enabled
        };
        self.persist().await?;

        if !enabled {
            return Ok("Token saved.".to_string());
        }

        match self.registry.register(handle).await {
            Ok(tier) => Ok(format!("Token saved, you are now watching tier {tier}.")),
            Err(e) => {
                warn!(subscriber_id = %id, error = %e, "Tier lookup for new token failed");
                Ok(format!("Token saved, but checking it failed: {e}"))
            }
        }
    }

    /// Exchange username and password for a credential.
    pub async fn login(&self, id: SubscriberId, username: &str, password: &str) -> Result<String> {
        self.handle(id).await?;
        let credential = self
            .ctx()
            .catalog
            .exchange_credentials(username, password)
            .await?;
        self.set_credential(id, credential).await
    }

    /// Show or set consent.
    pub async fn eula(&self, id: SubscriberId, accepted: Option<bool>) -> Result<String> {
        let handle = self.handle(id).await?;
        let Some(accepted) = accepted else {
            let accepted = handle.lock().await.eula_accepted;
            return Ok(if accepted {
                "You have accepted the terms of use.".to_string()
            } else {
                "You have not accepted the terms of use. Your token is only used for shared polls once you do: /eula true".to_string()
            });
        };

        {
            let mut subscriber = handle.lock().await;
            subscriber.eula_accepted = accepted;
            if accepted && subscriber.watcher_error.as_deref() == Some(EULA_NOT_ACCEPTED) {
                subscriber.watcher_error = None;
            }
        }
        self.persist().await?;
        Ok(if accepted {
            "Terms of use accepted.".to_string()
        } else {
            "Terms of use declined.".to_string()
        })
    }

    /// Show or set the summary template.
    pub async fn summary_template(&self, id: SubscriberId, template: Option<String>) -> Result<String> {
        let handle = self.handle(id).await?;
        let Some(template) = template else {
            return Ok(handle.lock().await.summary_template.clone());
        };

        let frame = handle.lock().await.last_frame.clone();
        self.ctx().renderer.render(&template, &frame.to_template_data())?;

        handle.lock().await.summary_template = template.clone();
        self.persist().await?;
        Ok(format!("Summary format set to \"{template}\"."))
    }

    /// Show or set the detail template.
    pub async fn detail_template(&self, id: SubscriberId, template: Option<String>) -> Result<String> {
        let handle = self.handle(id).await?;
        let Some(template) = template else {
            return Ok(handle.lock().await.detail_template.clone());
        };

        let sample = {
            let subscriber = handle.lock().await;
            subscriber
                .last_frame
                .current
                .first()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| WatcherError::InvalidArgument(e.to_string()))?
                .unwrap_or(serde_json::Value::Null)
        };
        self.ctx().renderer.render(&template, &sample)?;

        handle.lock().await.detail_template = template.clone();
        self.persist().await?;
        Ok(format!("Detail format set to \"{template}\"."))
    }

    /// List filters.
    pub async fn filter_list(&self, id: SubscriberId) -> Result<String> {
        let handle = self.handle(id).await?;
        let filters = handle.lock().await.filters.clone();
        if filters.is_empty() {
            return Ok("You have no filters.".to_string());
        }

        let mut text = String::from("Your filters:\n");
        for filter in filters {
            let _ = writeln!(text, "- {filter}");
        }
        Ok(text)
    }

    /// Add a filter. Adding an existing filter is a no-op.
    pub async fn filter_add(&self, id: SubscriberId, filter: String) -> Result<String> {
        let handle = self.handle(id).await?;
        {
            let mut subscriber = handle.lock().await;
            if !subscriber.filters.contains(&filter) {
                subscriber.filters.push(filter.clone());
            }
        }
        self.persist().await?;
        Ok(format!("Filter '{filter}' added."))
    }

    /// Remove a filter.
    pub async fn filter_remove(&self, id: SubscriberId, filter: &str) -> Result<String> {
        let handle = self.handle(id).await?;
        let removed = {
            let mut subscriber = handle.lock().await;
            let before = subscriber.filters.len();
            subscriber.filters.retain(|f| f != filter);
            subscriber.filters.len() != before
        };
        if !removed {
            return Err(WatcherError::InvalidArgument(format!("no filter '{filter}'")));
        }
        self.persist().await?;
        Ok(format!("Filter '{filter}' removed."))
    }

    /// Toggle detail messages.
    pub async fn ignore_details(&self, id: SubscriberId, value: bool) -> Result<String> {
        let handle = self.handle(id).await?;
        handle.lock().await.ignore_details = value;
        self.persist().await?;
        Ok(if value {
            "You will only receive summaries.".to_string()
        } else {
            "You will receive detail messages.".to_string()
        })
    }

    /// Toggle the removed section of detail messages.
    pub async fn ignore_removed(&self, id: SubscriberId, value: bool) -> Result<String> {
        let handle = self.handle(id).await?;
        handle.lock().await.ignore_removed = value;
        self.persist().await?;
        Ok(if value {
            "Removed items will be left out.".to_string()
        } else {
            "Removed items will be listed.".to_string()
        })
    }

    /// Describe the stored record with the credential redacted.
    pub async fn whoami(&self, id: SubscriberId) -> Result<String> {
        let handle = self.handle(id).await?;
        let mut subscriber = handle.lock().await.clone();
        if subscriber.credential.is_some() {
            subscriber.credential = Some("<redacted>".to_string());
        }
        let membership = self.registry.membership_of(id).await;

        let mut text = serde_json::to_string_pretty(&subscriber)
            .map_err(|e| WatcherError::InvalidArgument(e.to_string()))?;
        let _ = write!(
            text,
            "\ngroup: {}",
            membership.map(|tier| tier.to_string()).unwrap_or_else(|| "none".to_string())
        );
        Ok(text)
    }

    /// Compose a test notification from the last frame, padded to `n`
    /// detail lines per section.
    pub async fn test(&self, id: SubscriberId, n: usize) -> Result<Vec<ComposedMessage>> {
        let handle = self.handle(id).await?;
        let subscriber = handle.lock().await.clone();
        let frame: &UpdateFrame = &subscriber.last_frame;

        let mut rng = self.rng.lock().await;
        let messages = compose_test_messages(
            self.ctx().renderer.as_ref(),
            frame,
            &subscriber.message_options(),
            n,
            &mut *rng,
        )?;
        Ok(messages)
    }

    /// Notices published since the subscriber last saw one. Marks them seen
    /// and applies their actions.
    pub async fn pending_notices(&self, id: SubscriberId) -> Vec<ComposedMessage> {
        if self.notices.is_empty() {
            return Vec::new();
        }
        let Some(handle) = self.ctx().directory.get(id).await else {
            return Vec::new();
        };

        let (messages, paused) = {
            let mut subscriber = handle.lock().await;
            let since = subscriber.last_system_notice;
            let pending: Vec<&SystemNotice> = self
                .notices
                .iter()
                .filter(|notice| since.is_none_or(|since| notice.published_at > since))
                .collect();
            if pending.is_empty() {
                return Vec::new();
            }

            let mut paused = false;
            for notice in &pending {
                if notice.pause_notifications && subscriber.notifications_enabled {
                    subscriber.notifications_enabled = false;
                    paused = true;
                }
            }
            subscriber.last_system_notice = pending.last().map(|notice| notice.published_at);

            let messages: Vec<ComposedMessage> =
                pending.iter().map(|notice| ComposedMessage::plain(notice.message.clone())).collect();
            (messages, paused)
        };

        if paused {
            self.registry.unregister(id).await;
        }
        if let Err(e) = self.persist().await {
            warn!(subscriber_id = %id, error = %e, "Failed to persist notice delivery");
        }
        messages
    }
}

fn describe_throttle(throttle: Duration) -> String {
    let minutes = throttle.as_secs() / 60;
    if minutes == 0 {
        "You receive updates as fast as possible.".to_string()
    } else {
        format!("You receive at most one update every {minutes} minutes.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/start", Command::Start)]
    #[case("/pause", Command::Pause)]
    #[case("/resume@leasewatch_bot", Command::Resume)]
    #[case("/throttle", Command::Throttle(None))]
    #[case("/throttle 30", Command::Throttle(Some(30)))]
    #[case("/settoken abc", Command::SetCredential("abc".to_string()))]
    #[case("/login bob secret", Command::Login { username: "bob".into(), password: "secret".into() })]
    #[case("/eula true", Command::Eula(Some(true)))]
    #[case("/eula", Command::Eula(None))]
    #[case("/summarymessageformat {{ len .added }} new", Command::SummaryFormat(Some("{{ len .added }} new".into())))]
    #[case("/detailmessageformat", Command::DetailFormat(None))]
    #[case("/filter", Command::FilterList)]
    #[case("/filter add lt .attributes.price 400", Command::FilterAdd("lt .attributes.price 400".into()))]
    #[case("/filter remove lt .attributes.price 400", Command::FilterRemove("lt .attributes.price 400".into()))]
    #[case("/ignoredetails 1", Command::IgnoreDetails(true))]
    #[case("/ignoreremoved False", Command::IgnoreRemoved(false))]
    #[case("/WHOAMI", Command::Whoami)]
    #[case("/test 3", Command::Test(3))]
    fn test_parse_command(#[case] text: &str, #[case] expected: Command) {
        assert_eq!(parse_command(text).unwrap(), expected);
    }

    #[rstest]
    #[case("hello")]
    #[case("/throttle soon")]
    #[case("/login bob")]
    #[case("/eula maybe")]
    #[case("/filter add")]
    #[case("/filter drop x")]
    #[case("/frobnicate")]
    fn test_parse_command_rejects(#[case] text: &str) {
        assert!(matches!(
            parse_command(text),
            Err(WatcherError::InvalidArgument(_))
        ));
    }

    #[rstest]
    #[case("/settoken abc", true)]
    #[case("/SetToken@leasewatch_bot abc", true)]
    #[case("/login bob", true)]
    #[case("/login bob secret", true)]
    #[case("/start", false)]
    #[case("settoken abc", false)]
    fn test_carries_credentials(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(carries_credentials(text), expected);
    }

    #[test]
    fn test_describe_throttle() {
        assert_eq!(
            describe_throttle(Duration::from_secs(30 * 60)),
            "You receive at most one update every 30 minutes."
        );
        assert!(describe_throttle(Duration::ZERO).contains("as fast as possible"));
    }
}
