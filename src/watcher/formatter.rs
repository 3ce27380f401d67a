use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc, Weekday};
use std::fmt::Write;

use super::Transition;
use crate::api::{ButtonAction, LinkButton, Price};
use crate::storage::ItemSnapshot;

const SHARE_URL: &str = "https://share.toogoodtogo.com/item";

/// A rendered, channel-agnostic notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub item_id: String,
    pub store_id: String,
    pub store_name: String,
}

impl Message {
    pub fn buttons(&self) -> Vec<LinkButton> {
        vec![
            LinkButton {
                text: "Open in App".to_string(),
                action: ButtonAction::Url(format!("{}/{}", SHARE_URL, self.item_id)),
            },
            LinkButton {
                text: "Ignore Store".to_string(),
                action: ButtonAction::Callback(format!("ignore_{}", self.store_id)),
            },
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NotificationFormatter {
    offset: FixedOffset,
}

impl NotificationFormatter {
    /// Builds from a UTC offset in minutes, falling back to UTC when out of range.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or(Utc.fix());
        Self { offset }
    }

    pub fn render_now(&self, snapshot: &ItemSnapshot, transition: Transition) -> Message {
        let today = Utc::now().with_timezone(&self.offset).date_naive();
        self.render(snapshot, transition, today)
    }

    /// Renders `snapshot` under the header for `transition`; `Unchanged` gets no header.
    /// `today` anchors the Today/Tomorrow day label.
    pub fn render(&self, snapshot: &ItemSnapshot, transition: Transition, today: NaiveDate) -> Message {
        let mut text = String::from(header(transition));

        let _ = writeln!(text, "🏪 *{}*", escape_markdown(&snapshot.store_name));
        let _ = writeln!(text, "📍 {}", escape_markdown(&snapshot.address));
        let _ = writeln!(text, "💰 {}", format_price(&snapshot.price));
        let _ = writeln!(text, "🥡 {} bags available", snapshot.quantity);

        if let Some(pickup) = &snapshot.pickup {
            let start = pickup.start.with_timezone(&self.offset);
            let end = pickup.end.with_timezone(&self.offset);
            let _ = writeln!(
                text,
                "⏰ {} {}-{}",
                day_label(start.date_naive(), today),
                start.format("%H:%M"),
                end.format("%H:%M")
            );
        }

        Message {
            text,
            item_id: snapshot.item_id.clone(),
            store_id: snapshot.store_id.clone(),
            store_name: snapshot.store_name.clone(),
        }
    }
}

impl Default for NotificationFormatter {
    fn default() -> Self {
        Self::with_offset_minutes(0)
    }
}

fn header(transition: Transition) -> &'static str {
    match transition {
        Transition::NewStock => "*NEW BAGS AVAILABLE* 🛍️\n\n",
        Transition::SoldOut => "*SOLD-OUT* 🥺\n\n",
        Transition::StockIncreased => "*STOCK INCREASED* 📈\n\n",
        Transition::StockReduced => "*STOCK REDUCED* 📉\n\n",
        Transition::Unchanged => "",
    }
}

/// Backslash-escapes the characters that open an entity in Telegram's legacy Markdown.
fn escape_markdown(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if Some(date) == today.checked_add_signed(Duration::days(1)) {
        "Tomorrow".to_string()
    } else {
        weekday_name(date.weekday()).to_string()
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn format_price(price: &Price) -> String {
    let amount = price.amount();
    match price.code.as_str() {
        "EUR" | "" => format!("€{:.2}", amount),
        "GBP" => format!("£{:.2}", amount),
        "USD" => format!("${:.2}", amount),
        code => format!("{:.2} {}", amount, code),
    }
}
