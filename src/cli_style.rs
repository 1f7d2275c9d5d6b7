//! Terminal styling shared by the binaries.
#![allow(dead_code)]

use chrono::NaiveDateTime;
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Color as CtColor, Stylize};

use medtracker_alerts::notifications::display::{alert_line, badge_label};
use medtracker_alerts::notifications::{NotificationRecord, NotificationType};
use medtracker_alerts::stream::StreamStatus;

pub fn get_styles() -> Styles {
    Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

fn type_color(notification_type: NotificationType) -> CtColor {
    match notification_type {
        NotificationType::Expired => CtColor::Red,
        NotificationType::ExpiringSoon => CtColor::Yellow,
        NotificationType::Disposed => CtColor::DarkGrey,
    }
}

pub fn print_alert(record: &NotificationRecord, now: NaiveDateTime) {
    let line = alert_line(record, now);
    if record.read {
        println!("{}", line.dim());
    } else {
        println!("{}", line.with(type_color(record.notification_type)));
    }
}

pub fn print_alerts(records: &[NotificationRecord], now: NaiveDateTime) {
    if records.is_empty() {
        println!("{}", "No alerts yet".dim());
        return;
    }
    for record in records {
        print_alert(record, now);
    }
}

pub fn print_badge(unread: u64) {
    match badge_label(unread) {
        Some(label) => println!("{} {}", "Unread:".bold(), label.white().on_red().bold()),
        None => println!("{}", "No unread alerts".dim()),
    }
}

pub fn print_stream_status(status: &StreamStatus) {
    let user = status
        .user_id
        .as_ref()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{} {:?} (user {})",
        "Stream:".bold(),
        status.state,
        user.cyan()
    );
}
