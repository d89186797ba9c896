//! Template rendering — one arm per `Message` variant.

use subtrack_core::types::{Message, ReminderNotice};

/// Subject and HTML body ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

pub fn render(message: &Message) -> RenderedEmail {
    match message {
        Message::Reminder(notice) => render_reminder(notice),
    }
}

fn render_reminder(notice: &ReminderNotice) -> RenderedEmail {
    let name = escape_html(&notice.display_name());
    let days = match notice.days_before {
        1 => "1 day".to_string(),
        n => format!("{n} days"),
    };
    let renewal = notice.renewal_date.format("%B %-d, %Y");

    let subject = format!("⏰ Reminder: your {name} subscription renews in {days}");
    let html = format!(
        "<html><body>\
         <h2>{name} renews soon</h2>\
         <p>Hi {to},</p>\
         <p>Your <strong>{name}</strong> subscription renews on \
         <strong>{renewal}</strong> ({days} from now).</p>\
         <p>If you no longer need it, cancel before the renewal date to avoid being charged.</p>\
         <p>— Subdub</p>\
         </body></html>",
        to = escape_html(&notice.to),
    );

    RenderedEmail { subject, html }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
