use chrono::{DateTime, Utc};

use crate::{Alert, AlertBody};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Render an alert as chat text.
pub fn render(alert: &Alert) -> String {
    let instrument = &alert.key.instrument;
    let tf = alert.key.timeframe;
    let now = fmt_time(alert.evaluated_at);
    let price = format_usd(alert.price);

    match &alert.body {
        AlertBody::Streak { detection } => format!(
            "🚨 {instrument} {tf}: {} consecutive bearish candles confirmed 🚨\n\
             Time: {now}\n\
             Last candle closed: {}\n\
             Price: {price}\n\
             Drop: {:.2}%\n\
             Timeframe: {tf}",
            detection.run_length,
            fmt_time(detection.last_end),
            detection.drop_percent,
        ),
        AlertBody::PreClose { lead_minutes, target_end } => format!(
            "⚠️ {instrument} {tf}: caution ⚠️\n\
             2 consecutive bearish candles, {} before the next candle closes\n\
             Time: {now}\n\
             Next candle closes: {}\n\
             Price: {price}\n\
             Timeframe: {tf}",
            lead_label(*lead_minutes),
            fmt_time(*target_end),
        ),
    }
}

/// Operator notice sent when the provider starts rate limiting.
pub fn rate_limit_notice(wait_minutes: u64) -> String {
    format!("⚠️ API rate limit detected! Waiting {wait_minutes} minutes before retrying.")
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn lead_label(minutes: u32) -> String {
    match minutes {
        60 => "1 hour".to_string(),
        m if m % 60 == 0 => format!("{} hours", m / 60),
        1 => "1 minute".to_string(),
        m => format!("{m} minutes"),
    }
}

/// `$12,345.67`
fn format_usd(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac}")
}
