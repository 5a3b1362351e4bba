use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::{self, BufRead, Read, Write as _};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use crossbeam_channel::{select, tick, unbounded, Receiver};
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

use crate::activity::geo::{region_moved, REGION_REFRESH_DEGREES};
use crate::activity::{
    filter_by_date, matches_title, ActivitySummary, BoundingBox, Bucket, GeoPoint, NewActivity,
};
use crate::chat::identity::CONVERSATION_DELIMITER;
use crate::chat::{
    build_inbox, conversation_id, group_by_time_checked, other_participant, ChatBox,
    ConversationId, DisplayItem, Message,
};
use crate::clock::{format_local, parse_instant, Clock};
use crate::config::AppConfig;
use crate::feed::{ConversationView, FeedEvent, FeedHub};
use crate::profile::{display_name, Profile};
use crate::search::{parse_query, regex_pattern_from_input};
use crate::storage::{Attendee, StorageHandle};

const CHAT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(2);

/// Everything a command needs: loaded config, storage, the captured clock and
/// the acting user.
pub struct Session {
    pub config: Arc<AppConfig>,
    pub storage: StorageHandle,
    pub clock: Clock,
    pub user: Option<String>,
}

impl Session {
    pub fn require_user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .context("no acting user; pass --as <USER> or set user.id in the config")
    }
}

#[derive(Args, Debug, Clone)]
pub struct ActivityArgs {
    #[command(subcommand)]
    pub command: ActivityCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ActivityCommand {
    /// Host a new activity
    Create(ActivityCreateArgs),
    /// List activities near a location, bucketed by date
    List(ActivityListArgs),
    /// Show one activity with its attendees
    Show(ActivityShowArgs),
    /// Register the acting user for an activity
    Join(ActivityIdArgs),
    /// Cancel the acting user's registration
    Leave(ActivityIdArgs),
    /// List who is going to an activity
    Attendees(ActivityIdArgs),
    /// Search activities (supports type:, title: and when: prefixes)
    Search(SearchArgs),
    /// Print the activities inside a map viewport
    Map(MapArgs),
    /// List the known activity types
    Types,
}

#[derive(Args, Debug, Clone)]
pub struct ActivityCreateArgs {
    /// Title for the activity (prompted if omitted)
    #[arg()]
    pub title: Option<String>,
    /// Start time, e.g. 2024-10-19T10:00:00+08:00
    #[arg(long)]
    pub date: String,
    /// Optional end time
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long, default_value = "")]
    pub location: String,
    /// Provide the description inline. If omitted, reads from stdin.
    #[arg(long)]
    pub description: Option<String>,
    /// Activity type, see `activity types`
    #[arg(long = "type")]
    pub kind: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub lng: Option<f64>,
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ActivityListArgs {
    /// Latitude of the search centre (defaults to the configured home)
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub lng: Option<f64>,
    /// Search radius in metres
    #[arg(long)]
    pub radius: Option<f64>,
    /// passed, upcoming, today, tomorrow or weekend
    #[arg(long)]
    pub when: Option<String>,
    /// Only titles containing this text
    #[arg(long)]
    pub filter: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ActivityShowArgs {
    pub id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ActivityIdArgs {
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search query terms
    #[arg()]
    pub query: Vec<String>,
    /// Treat the free text as a regular expression
    #[arg(long)]
    pub regex: bool,
    /// Limit the number of results printed
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MapArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub lng: Option<f64>,
    /// Viewport size in degrees on both axes
    #[arg(long, default_value_t = 0.05)]
    pub span: f64,
    /// Keep reading `lat,lng` centres from stdin and refresh when the view moves
    #[arg(long)]
    pub follow: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MessageArgs {
    #[command(subcommand)]
    pub command: MessageCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum MessageCommand {
    /// Send a direct message
    Send(MessageSendArgs),
    /// Print a conversation grouped by time
    Show(MessageShowArgs),
    /// List conversations, newest first
    Inbox(InboxArgs),
    /// Open a live conversation; each stdin line is sent
    Chat(ChatArgs),
}

#[derive(Args, Debug, Clone)]
pub struct MessageSendArgs {
    /// Recipient user id
    pub to: String,
    /// Message text. If omitted, reads from stdin.
    pub content: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct MessageShowArgs {
    /// Peer user id or conversation id
    pub target: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InboxArgs {
    /// Maximum number of recent messages to group
    #[arg(long, default_value_t = 500)]
    pub limit: usize,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// Peer user id or conversation id
    pub target: String,
}

#[derive(Args, Debug, Clone)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProfileCommand {
    /// Create or update the acting user's profile
    Set(ProfileSetArgs),
    /// Show a profile (defaults to the acting user)
    Show(ProfileShowArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ProfileSetArgs {
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub full_name: Option<String>,
    #[arg(long)]
    pub website: Option<String>,
    #[arg(long)]
    pub avatar_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ProfileShowArgs {
    pub id: Option<String>,
    #[arg(long)]
    pub json: bool,
}

pub fn handle_activity_command(session: &Session, args: ActivityArgs) -> Result<()> {
    match args.command {
        ActivityCommand::Create(args) => {
            let id = create_activity(session, args)?;
            println!("Created activity {id}");
            Ok(())
        }
        ActivityCommand::List(args) => print_output(run_activity_list(session, &args)),
        ActivityCommand::Show(args) => print_output(run_activity_show(session, &args)),
        ActivityCommand::Join(args) => activity_join(session, &args),
        ActivityCommand::Leave(args) => activity_leave(session, &args),
        ActivityCommand::Attendees(args) => print_output(run_attendees(session, &args)),
        ActivityCommand::Search(args) => print_output(run_search(session, &args)),
        ActivityCommand::Map(args) => activity_map(session, &args),
        ActivityCommand::Types => {
            for name in session.storage.list_activity_types()? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

pub fn handle_message_command(session: &Session, args: MessageArgs) -> Result<()> {
    match args.command {
        MessageCommand::Send(args) => message_send(session, args),
        MessageCommand::Show(args) => print_output(run_message_show(session, &args)),
        MessageCommand::Inbox(args) => print_output(run_inbox(session, &args)),
        MessageCommand::Chat(args) => message_chat(session, &args),
    }
}

pub fn handle_profile_command(session: &Session, args: ProfileArgs) -> Result<()> {
    match args.command {
        ProfileCommand::Set(args) => {
            let profile = profile_set(session, args)?;
            println!("Updated profile for {}", profile.id);
            Ok(())
        }
        ProfileCommand::Show(args) => print_output(run_profile_show(session, &args)),
    }
}

fn print_output(output: Result<String>) -> Result<()> {
    print!("{}", output?);
    Ok(())
}

fn create_activity(session: &Session, args: ActivityCreateArgs) -> Result<String> {
    let host_id = session.require_user()?;
    let title = match args.title {
        Some(t) => t,
        None => prompt("Title")?,
    };
    let description = match args.description {
        Some(description) => Some(description),
        None => read_stdin()?,
    }
    .filter(|d| !d.trim().is_empty());

    let new = NewActivity {
        title,
        description,
        date: args.date,
        end_date: args.end,
        location: args.location,
        image_uri: args.image,
        host_id: host_id.to_string(),
        coordinates: point_from_args(args.lat, args.lng)?,
        kind: args.kind,
    };
    session.storage.create_activity(&new).context("creating activity")
}

fn run_activity_list(session: &Session, args: &ActivityListArgs) -> Result<String> {
    let options = &session.config.activities;
    let bucket = args
        .when
        .as_deref()
        .map(Bucket::from_name)
        .unwrap_or(options.default_bucket);
    let limit = args.limit.unwrap_or(session.config.search.max_results);
    let center = point_from_args(args.lat, args.lng)?.or_else(|| options.home());

    let mut summaries = match center {
        Some(center) => {
            let radius = args.radius.unwrap_or(options.search_radius_m);
            session
                .storage
                .nearby_activities(center, radius, usize::MAX)?
        }
        None => session.storage.list_activities(usize::MAX)?,
    };
    retain_bucket(&mut summaries, bucket, session.clock.now());
    if let Some(needle) = args.filter.as_deref() {
        summaries.retain(|summary| matches_title(&summary.activity, needle));
    }
    summaries.truncate(limit);
    tracing::debug!(%bucket, count = summaries.len(), "listed activities");

    if args.json {
        return to_json(&summaries);
    }
    Ok(format_activity_list(&summaries, session.clock.offset()))
}

/// Keeps the summaries whose activity falls in `bucket`, in their current order.
fn retain_bucket(summaries: &mut Vec<ActivitySummary>, bucket: Bucket, now: OffsetDateTime) {
    let activities: Vec<_> = summaries.iter().map(|s| s.activity.clone()).collect();
    let kept: HashSet<String> = filter_by_date(&activities, bucket, now)
        .into_iter()
        .map(|activity| activity.id)
        .collect();
    summaries.retain(|summary| kept.contains(&summary.activity.id));
}

#[derive(Serialize)]
struct ActivityDetail<'a> {
    #[serde(flatten)]
    summary: &'a ActivitySummary,
    attendees: &'a [Attendee],
    attending: Option<bool>,
}

fn run_activity_show(session: &Session, args: &ActivityShowArgs) -> Result<String> {
    let summary = session
        .storage
        .fetch_activity(&args.id)?
        .with_context(|| format!("activity {} not found", args.id))?;
    let attendees = session.storage.attendees(&args.id)?;
    let attending = match session.user.as_deref() {
        Some(user) => Some(session.storage.is_attending(user, &args.id)?),
        None => None,
    };
    if args.json {
        return to_json(&ActivityDetail {
            summary: &summary,
            attendees: &attendees,
            attending,
        });
    }

    let offset = session.clock.offset();
    let mut out = format_activity_list(std::slice::from_ref(&summary), offset);
    let activity = &summary.activity;
    if let Some(end) = activity.ends_at() {
        let _ = writeln!(&mut out, "    ends    {}", format_local(end, offset));
    }
    if let Some(description) = activity.description.as_deref() {
        let _ = writeln!(&mut out, "    {}", description.trim());
    }
    let _ = writeln!(&mut out, "    host    {}", activity.host_id);
    if attending == Some(true) {
        let _ = writeln!(&mut out, "    you are going");
    }
    Ok(out)
}

fn activity_join(session: &Session, args: &ActivityIdArgs) -> Result<()> {
    let user = session.require_user()?;
    if session.storage.join_activity(user, &args.id)? {
        println!("Joined activity {}", args.id);
    } else {
        println!("Already going to activity {}", args.id);
    }
    Ok(())
}

fn activity_leave(session: &Session, args: &ActivityIdArgs) -> Result<()> {
    let user = session.require_user()?;
    if session.storage.leave_activity(user, &args.id)? {
        println!("Left activity {}", args.id);
    } else {
        println!("Not registered for activity {}", args.id);
    }
    Ok(())
}

fn run_attendees(session: &Session, args: &ActivityIdArgs) -> Result<String> {
    let attendees = session.storage.attendees(&args.id)?;
    if attendees.is_empty() {
        return Ok("Nobody has joined yet.\n".to_string());
    }
    let mut out = String::new();
    for attendee in &attendees {
        let name = attendee
            .username
            .clone()
            .unwrap_or_else(|| display_name(None, &attendee.user_id));
        let _ = writeln!(&mut out, "{name}  ({})", attendee.user_id);
    }
    Ok(out)
}

fn run_search(session: &Session, args: &SearchArgs) -> Result<String> {
    let raw_query = args.query.join(" ");
    let trimmed = raw_query.trim();
    if trimmed.is_empty() {
        bail!("search query cannot be empty");
    }

    let mut query = parse_query(trimmed);
    if !query.has_terms() && !query.has_filters() {
        bail!("search query must contain terms or filters");
    }
    if args.regex {
        query.regex_pattern = regex_pattern_from_input(trimmed);
        if query.regex_pattern.is_some() {
            query.terms.clear();
        }
    }

    let limit = args.limit.min(session.config.search.max_results);
    let results = session
        .storage
        .search_activities(&query, session.clock.now(), limit)
        .context("executing search")?;
    if args.json {
        return to_json(&results);
    }
    Ok(format_activity_list(&results, session.clock.offset()))
}

fn activity_map(session: &Session, args: &MapArgs) -> Result<()> {
    let center = point_from_args(args.lat, args.lng)?
        .or_else(|| session.config.activities.home())
        .context("map needs --lat/--lng or a home location in the config")?;
    print!("{}", render_map(session, center, args.span, args.json)?);
    if !args.follow {
        return Ok(());
    }

    let mut shown = center;
    for line in io::stdin().lock().lines() {
        let line = line.context("reading map centre")?;
        let Some(next) = parse_point(&line) else {
            tracing::warn!(input = %line.trim(), "ignoring malformed centre");
            continue;
        };
        if !region_moved(shown, next, REGION_REFRESH_DEGREES) {
            tracing::debug!("map region unchanged");
            continue;
        }
        shown = next;
        print!("{}", render_map(session, shown, args.span, args.json)?);
    }
    Ok(())
}

fn render_map(session: &Session, center: GeoPoint, span: f64, json: bool) -> Result<String> {
    let view = BoundingBox::around(center, span, span);
    let summaries = session.storage.activities_in_view(&view)?;
    if json {
        return to_json(&summaries);
    }
    let mut out = format!(
        "Map centred on {:.4}, {:.4} ({} degrees)\n\n",
        center.latitude, center.longitude, span
    );
    out.push_str(&format_activity_list(&summaries, session.clock.offset()));
    Ok(out)
}

/// Parses `lat,lng` or `lat lng`.
fn parse_point(raw: &str) -> Option<GeoPoint> {
    let mut parts = raw
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|part| !part.is_empty());
    let latitude = parts.next()?.parse().ok()?;
    let longitude = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(GeoPoint::new(latitude, longitude)).filter(GeoPoint::is_valid)
}

fn point_from_args(lat: Option<f64>, lng: Option<f64>) -> Result<Option<GeoPoint>> {
    match (lat, lng) {
        (Some(latitude), Some(longitude)) => {
            let point = GeoPoint::new(latitude, longitude);
            if !point.is_valid() {
                bail!("coordinates out of range: {latitude}, {longitude}");
            }
            Ok(Some(point))
        }
        (None, None) => Ok(None),
        _ => bail!("--lat and --lng must be given together"),
    }
}

fn message_send(session: &Session, args: MessageSendArgs) -> Result<()> {
    let user = session.require_user()?;
    let content = match args.content {
        Some(content) => content,
        None => read_stdin()?.unwrap_or_default(),
    };
    let message = session
        .storage
        .send_message(user, &args.to, content.trim_end(), session.clock.now())
        .context("sending message")?;
    println!("Sent message #{} to {}", message.id, message.receiver_id);
    Ok(())
}

/// Accepts either a peer id or a full conversation id and returns the
/// canonical conversation between `user` and that peer.
fn resolve_conversation(user: &str, target: &str) -> Result<ConversationId> {
    let target = target.trim();
    if !target.contains(CONVERSATION_DELIMITER) {
        if target.is_empty() {
            bail!("conversation not found");
        }
        return Ok(conversation_id(user, target));
    }
    match other_participant(target, user) {
        Ok(peer) => Ok(conversation_id(user, &peer)),
        Err(err) => {
            tracing::debug!(%err, "rejecting conversation");
            Err(anyhow!("conversation not found"))
        }
    }
}

fn run_message_show(session: &Session, args: &MessageShowArgs) -> Result<String> {
    let user = session.require_user()?;
    let conversation = resolve_conversation(user, &args.target)?;
    let messages = session.storage.fetch_conversation(&conversation)?;
    if args.json {
        return to_json(&messages);
    }
    if messages.is_empty() {
        return Ok("No messages yet.\n".to_string());
    }

    let peer = conversation
        .other_participant(user)
        .map_err(|_| anyhow!("conversation not found"))?;
    let profile = session.storage.fetch_profile(peer)?;
    let peer_name = display_name(profile.as_ref(), peer);
    let items = group_by_time_checked(&messages, session.config.timeline.gap())
        .context("building conversation timeline")?;
    Ok(render_timeline(&items, user, &peer_name, session.clock.offset()))
}

fn render_timeline(
    items: &[DisplayItem<'_>],
    self_id: &str,
    peer_name: &str,
    offset: UtcOffset,
) -> String {
    let mut out = String::new();
    for item in items {
        match item {
            DisplayItem::Timestamp { time } => {
                let _ = writeln!(&mut out, "-- {} --", format_local(*time, offset));
            }
            DisplayItem::Message(message) => {
                let author = if message.sender_id == self_id {
                    "me"
                } else {
                    peer_name
                };
                let _ = writeln!(&mut out, "  {author}: {}", message.content);
            }
        }
    }
    out
}

fn run_inbox(session: &Session, args: &InboxArgs) -> Result<String> {
    let user = session.require_user()?;
    let messages = session.storage.fetch_user_messages(user, args.limit)?;
    let mut peers: Vec<String> = messages.iter().map(|m| peer_of(m, user)).collect();
    peers.sort();
    peers.dedup();
    let profiles = session.storage.fetch_profiles(&peers)?;
    let inbox = build_inbox(user, &messages, &profiles);
    if args.json {
        return to_json(&inbox);
    }
    Ok(format_inbox(&inbox, session.clock.offset()))
}

fn peer_of(message: &Message, user: &str) -> String {
    if message.sender_id == user {
        message.receiver_id.clone()
    } else {
        message.sender_id.clone()
    }
}

fn format_inbox(inbox: &[ChatBox], offset: UtcOffset) -> String {
    if inbox.is_empty() {
        return "No conversations yet.\n".to_string();
    }
    let mut out = String::new();
    for entry in inbox {
        let when = parse_instant(&entry.last_message_time)
            .map(|at| format_local(at, offset))
            .unwrap_or_else(|| entry.last_message_time.clone());
        let _ = writeln!(&mut out, "{}  ({})  {when}", entry.name, entry.id);
        let _ = writeln!(&mut out, "    {}", snippet(&entry.last_message, 80));
    }
    out
}

enum ChatInput {
    Line(String),
    Poll,
    Closed,
}

fn message_chat(session: &Session, args: &ChatArgs) -> Result<()> {
    let user = session.require_user()?.to_string();
    let conversation = resolve_conversation(&user, &args.target)?;
    let hub = FeedHub::new();
    let subscription = hub.subscribe();
    let storage = session.storage.clone().with_feed(hub.clone());

    let history = storage.fetch_conversation(&conversation)?;
    let mut view = ConversationView::open(
        conversation.clone(),
        &user,
        history,
        session.config.timeline.gap(),
    )
    .map_err(|_| anyhow!("conversation not found"))?;
    let peer = view.peer_id().to_string();
    let peer_name = display_name(storage.fetch_profile(&peer)?.as_ref(), &peer);
    let offset = session.clock.offset();

    let mut stdout = io::stdout();
    let mut printed = HashSet::new();
    print_new_items(&mut stdout, &view, &mut printed, &peer_name, offset)?;
    let mut seen_up_to = view.messages().iter().map(|m| m.id).max().unwrap_or(0);
    let lines = spawn_line_reader();
    let ticker = tick(CHAT_POLL_INTERVAL);
    tracing::info!(conversation = %conversation, "chat opened");

    loop {
        let input = select! {
            recv(lines) -> line => match line {
                Ok(line) => ChatInput::Line(line),
                Err(_) => ChatInput::Closed,
            },
            recv(ticker) -> _ => ChatInput::Poll,
        };
        match input {
            ChatInput::Closed => break,
            ChatInput::Line(line) => {
                if !line.trim().is_empty() {
                    storage.send_message(&user, &peer, line.trim_end(), session.clock.now())?;
                }
            }
            ChatInput::Poll => {
                // Rows written by other processes only reach this hub through polling.
                // Our own sends come back here too; the view drops them by id.
                for message in storage.fetch_conversation_since(&conversation, seen_up_to)? {
                    seen_up_to = seen_up_to.max(message.id);
                    hub.publish(FeedEvent::MessageInserted(message));
                }
            }
        }
        if view.drain(&subscription) > 0 {
            print_new_items(&mut stdout, &view, &mut printed, &peer_name, offset)?;
        }
    }
    tracing::info!(conversation = %conversation, "chat closed");
    Ok(())
}

/// Writes every message of `view` whose id is not in `printed`, preceded by
/// its timestamp marker if it has one, and returns how many were written.
///
/// A late delivery sorts before output already on screen, so it is printed
/// where the terminal is now rather than where the timeline places it.
fn print_new_items(
    out: &mut impl io::Write,
    view: &ConversationView,
    printed: &mut HashSet<i64>,
    peer_name: &str,
    offset: UtcOffset,
) -> Result<usize> {
    let mut fresh = Vec::new();
    let mut marker = None;
    for item in view.display_items() {
        match item {
            DisplayItem::Timestamp { .. } => marker = Some(item),
            DisplayItem::Message(message) => {
                let pending = marker.take();
                if printed.insert(message.id) {
                    fresh.extend(pending);
                    fresh.push(item);
                }
            }
        }
    }
    if fresh.is_empty() {
        return Ok(0);
    }
    out.write_all(render_timeline(&fresh, view.self_id(), peer_name, offset).as_bytes())?;
    out.flush()?;
    Ok(fresh.iter().filter(|item| !item.is_marker()).count())
}

fn spawn_line_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn profile_set(session: &Session, args: ProfileSetArgs) -> Result<Profile> {
    let user = session.require_user()?;
    let existing = session.storage.fetch_profile(user)?.unwrap_or_default();
    let profile = Profile {
        id: user.to_string(),
        username: args.username.unwrap_or(existing.username),
        full_name: args.full_name.or(existing.full_name),
        website: args.website.or(existing.website),
        avatar_url: args.avatar_url.or(existing.avatar_url),
    };
    session
        .storage
        .upsert_profile(&profile)
        .context("saving profile")?;
    Ok(profile)
}

fn run_profile_show(session: &Session, args: &ProfileShowArgs) -> Result<String> {
    let id = match args.id.as_deref() {
        Some(id) => id,
        None => session.require_user()?,
    };
    let profile = session.storage.fetch_profile(id)?;
    if args.json {
        return to_json(&profile);
    }
    let Some(profile) = profile else {
        return Ok(format!("{} has no profile yet.\n", display_name(None, id)));
    };
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}  ({})", profile.display_name(), profile.id);
    for (label, value) in [
        ("name", &profile.full_name),
        ("website", &profile.website),
        ("avatar", &profile.avatar_url),
    ] {
        if let Some(value) = value.as_deref() {
            let _ = writeln!(&mut out, "    {label:<8}{value}");
        }
    }
    Ok(out)
}

fn format_activity_list(summaries: &[ActivitySummary], offset: UtcOffset) -> String {
    if summaries.is_empty() {
        return "No activities found.\n".to_string();
    }
    let mut out = String::new();
    for summary in summaries {
        let activity = &summary.activity;
        let mut headline = activity.title.clone();
        if let Some(kind) = activity.kind.as_deref() {
            let _ = write!(&mut headline, "  [{kind}]");
        }
        let _ = writeln!(&mut out, "{headline}");
        let when = activity
            .starts_at()
            .map(|at| format_local(at, offset))
            .unwrap_or_else(|| activity.date.clone());
        let _ = writeln!(&mut out, "    when    {when}");
        if !activity.location.is_empty() {
            let _ = writeln!(&mut out, "    where   {}", activity.location);
        }
        if let Some(meters) = summary.dist_meters {
            let _ = writeln!(&mut out, "    away    {}", format_distance(meters));
        }
        let _ = writeln!(&mut out, "    going   {}", summary.attendee_count);
        let _ = writeln!(&mut out, "    id      {}", activity.id);
        out.push('\n');
    }
    out
}

fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = serde_json::to_string_pretty(value).context("serializing output")?;
    out.push('\n');
    Ok(out)
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
