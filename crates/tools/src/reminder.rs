//! Reminders: `create_reminder` and `list_reminders`, backed by an
//! in-memory [`ReminderStore`].
//!
//! Times may be absolute (`"18:30"`) or relative (`"5 minutes"`,
//! `"1 hora"`); dates may be ISO (`"2025-03-14"`), `today`/`hoy`,
//! `tomorrow`/`mañana`, or a weekday name in English or Spanish.

use async_trait::async_trait;
use chrono::{
    DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use concierge_core::error::ExecutionError;
use concierge_core::function::{Arguments, FunctionHandler};
use concierge_core::schema::{FunctionDefinition, ParameterSpec};
use concierge_core::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub const CREATE_NAME: &str = "create_reminder";
pub const LIST_NAME: &str = "list_reminders";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set once the scheduler has announced the reminder
    pub notified: bool,
}

impl Reminder {
    fn to_value(&self) -> Value {
        let local = self.due_at.with_timezone(&Local);
        Value::map([
            ("id", Value::from(self.id as i64)),
            ("title", Value::from(self.title.as_str())),
            ("description", Value::from(self.description.clone())),
            ("date", Value::from(local.format("%Y-%m-%d").to_string())),
            ("time", Value::from(local.format("%H:%M").to_string())),
        ])
    }
}

#[derive(Default)]
struct StoreInner {
    reminders: Vec<Reminder>,
    next_id: u64,
}

/// Shared, in-memory reminder list. Cloning yields another handle.
#[derive(Clone, Default)]
pub struct ReminderStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(
        &self,
        title: impl Into<String>,
        description: Option<String>,
        due_at: DateTime<Utc>,
    ) -> Reminder {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let reminder = Reminder {
            id: inner.next_id,
            title: title.into(),
            description,
            due_at,
            created_at: Utc::now(),
            notified: false,
        };
        inner.reminders.push(reminder.clone());
        reminder
    }

    /// Reminders not yet announced, soonest first.
    pub async fn pending(&self) -> Vec<Reminder> {
        let inner = self.inner.read().await;
        let mut pending: Vec<Reminder> = inner
            .reminders
            .iter()
            .filter(|r| !r.notified)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.due_at);
        pending
    }

    pub async fn all(&self) -> Vec<Reminder> {
        self.inner.read().await.reminders.clone()
    }

    /// Mark every pending reminder due at or before `now` as notified and
    /// return them. Each reminder is returned at most once.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<Reminder> {
        let mut inner = self.inner.write().await;
        inner
            .reminders
            .iter_mut()
            .filter(|r| !r.notified && r.due_at <= now)
            .map(|r| {
                r.notified = true;
                r.clone()
            })
            .collect()
    }

    /// Drop announced reminders; returns how many were removed.
    pub async fn clear_notified(&self) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.reminders.len();
        inner.reminders.retain(|r| !r.notified);
        before - inner.reminders.len()
    }
}

/// Resolve a spoken time (and optional date) against `now`.
pub fn parse_due(
    time: &str,
    date: Option<&str>,
    now: NaiveDateTime,
) -> Result<NaiveDateTime, ExecutionError> {
    let time = time.trim();
    let date = date.map(str::trim).filter(|d| !d.is_empty());

    let day = match date {
        Some(d) => parse_date(d, now.date())?,
        None => now.date(),
    };

    if let Some(offset) = parse_relative(time) {
        return now
            .checked_add_signed(offset)
            .ok_or_else(|| ExecutionError::new(format!("time '{time}' is too far away")));
    }

    let clock = parse_clock(time)
        .ok_or_else(|| ExecutionError::new(format!("unrecognized time '{time}'")))?;

    let due = day.and_time(clock);
    // A bare clock time that already passed today means tomorrow.
    if due < now && date.is_none() {
        return Ok(due + Duration::days(1));
    }
    Ok(due)
}

fn parse_date(date: &str, today: NaiveDate) -> Result<NaiveDate, ExecutionError> {
    let lower = date.to_lowercase();
    match lower.as_str() {
        "hoy" | "today" => return Ok(today),
        "mañana" | "manana" | "tomorrow" => return Ok(today + Duration::days(1)),
        _ => {}
    }

    if let Some(weekday) = parse_weekday(&lower) {
        let current = today.weekday().num_days_from_monday();
        let target = weekday.num_days_from_monday();
        let mut ahead = (7 + target - current) % 7;
        // Naming today's weekday means next week's.
        if ahead == 0 {
            ahead = 7;
        }
        return Ok(today + Duration::days(i64::from(ahead)));
    }

    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ExecutionError::new(format!("unrecognized date '{date}'")))
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    let day = match name {
        "lunes" | "monday" => Weekday::Mon,
        "martes" | "tuesday" => Weekday::Tue,
        "miércoles" | "miercoles" | "wednesday" => Weekday::Wed,
        "jueves" | "thursday" => Weekday::Thu,
        "viernes" | "friday" => Weekday::Fri,
        "sábado" | "sabado" | "saturday" => Weekday::Sat,
        "domingo" | "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

/// `"5 minutes"`, `"1 hora"`, `"2 días"` and similar.
fn parse_relative(time: &str) -> Option<Duration> {
    let mut parts = time.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_lowercase();
    match unit.trim_end_matches('s') {
        "min" | "minuto" | "minute" => Duration::try_minutes(amount),
        "hora" | "hour" => Duration::try_hours(amount),
        "día" | "dia" | "day" => Duration::try_days(amount),
        _ => None,
    }
}

/// `"HH:MM"` or `"HH"` followed by `":"`.
fn parse_clock(time: &str) -> Option<NaiveTime> {
    let (hour, minute) = time.split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = match minute.trim() {
        "" => 0,
        m => m.parse().ok()?,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn to_utc(local: NaiveDateTime) -> Result<DateTime<Utc>, ExecutionError> {
    Local
        .from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ExecutionError::new(format!("time {local} does not exist locally")))
}

pub struct CreateReminderFunction {
    store: ReminderStore,
}

impl CreateReminderFunction {
    pub fn new(store: ReminderStore) -> Self {
        Self { store }
    }

    pub fn definition() -> FunctionDefinition {
        FunctionDefinition::new(
            CREATE_NAME,
            "Create a reminder for a specific time, optionally on a given date.",
        )
        .param(ParameterSpec::string("title", "Short title of the reminder").required())
        .param(
            ParameterSpec::string(
                "time",
                "Time as HH:MM or a relative amount such as '5 minutes' or '1 hour'",
            )
            .required(),
        )
        .param(ParameterSpec::string(
            "date",
            "Date as YYYY-MM-DD, a weekday name, or 'today'/'tomorrow'",
        ))
        .param(ParameterSpec::string("description", "Longer description of the reminder"))
    }
}

#[async_trait]
impl FunctionHandler for CreateReminderFunction {
    async fn call(&self, args: Arguments) -> Result<Value, ExecutionError> {
        let title = args.require_str("title")?.trim();
        if title.is_empty() {
            return Err(ExecutionError::new("reminder title must not be empty"));
        }
        let time = args.require_str("time")?;
        let date = args.str("date");
        let description = args.str("description").map(String::from);

        let due_local = parse_due(time, date, Local::now().naive_local())?;
        let reminder = self.store.add(title, description, to_utc(due_local)?).await;

        info!(id = reminder.id, title = %reminder.title, due = %due_local, "Reminder created");

        let mut value = reminder.to_value();
        if let Value::Map(map) = &mut value {
            map.insert(
                "message".into(),
                Value::from(format!(
                    "Reminder '{}' set for {} at {}.",
                    reminder.title,
                    due_local.format("%d/%m/%Y"),
                    due_local.format("%H:%M")
                )),
            );
        }
        Ok(value)
    }
}

pub struct ListRemindersFunction {
    store: ReminderStore,
}

impl ListRemindersFunction {
    pub fn new(store: ReminderStore) -> Self {
        Self { store }
    }

    pub fn definition() -> FunctionDefinition {
        FunctionDefinition::new(LIST_NAME, "List the reminders that have not fired yet.")
    }
}

#[async_trait]
impl FunctionHandler for ListRemindersFunction {
    async fn call(&self, _args: Arguments) -> Result<Value, ExecutionError> {
        let pending = self.store.pending().await;
        Ok(Value::map([
            ("count", Value::from(pending.len() as i64)),
            (
                "reminders",
                Value::List(pending.iter().map(Reminder::to_value).collect()),
            ),
        ]))
    }
}
