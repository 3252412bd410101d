use chrono::{DateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

const RELEASE_PHRASE: &str = "liberado após as ";

/// Parses the `HH:MM:SS` release time embedded in a `PUCX-ER1001` message,
/// the text following `"liberado após as"`.
///
/// The time is interpreted in the configured `tz` and combined with the
/// current date in that zone; if that combination doesn't exist, or parsing
/// fails outright, falls back to the next hour boundary from `now`.
pub fn parse_lockout_release(body: &str, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    try_parse(body, tz, now).unwrap_or_else(|| next_hour_boundary(now))
}

fn try_parse(body: &str, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let idx = body.find(RELEASE_PHRASE)?;
    let start = idx + RELEASE_PHRASE.len();
    let candidate = body.get(start..start + 8)?;
    let time = NaiveTime::parse_from_str(candidate, "%H:%M:%S").ok()?;

    let now_local = now.with_timezone(&tz);
    let today = now_local.date_naive();
    let combined = today.and_time(time);
    let localized = tz.from_local_datetime(&combined).single()?;
    Some(localized.with_timezone(&Utc))
}

fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(now);
    truncated + chrono::Duration::hours(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn parses_the_embedded_release_time() {
        let body = "Erro PUCX-ER1001: limite excedido, liberado após as 14:05:00 (horario de Brasilia)";
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let release = parse_lockout_release(body, chrono_tz::America::Sao_Paulo, now);

        // 14:05:00 in America/Sao_Paulo (UTC-3) is 17:05:00 UTC.
        assert_eq!(release, Utc.with_ymd_and_hms(2024, 3, 1, 17, 5, 0).unwrap());
    }

    #[test]
    fn falls_back_to_next_hour_boundary_on_parse_failure() {
        let body = "some unrelated PUCX-ER1001 message with no time embedded";
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap();
        let release = parse_lockout_release(body, chrono_tz::America::Sao_Paulo, now);
        assert_eq!(release, Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn falls_back_when_phrase_entirely_absent() {
        let body = "no marker here at all";
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 50, 0).unwrap();
        let release = parse_lockout_release(body, chrono_tz::America::Sao_Paulo, now);
        assert_eq!(release, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }
}
