/// A millisecond duration split into display units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeParts {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl TimeParts {
    pub fn from_ms(ms: u64) -> Self {
        let total_seconds = ms / 1000;
        Self {
            days: total_seconds / 86_400,
            hours: (total_seconds / 3_600) % 24,
            minutes: (total_seconds / 60) % 60,
            seconds: total_seconds % 60,
        }
    }
}

/// Renders a duration as a time code, dropping leading zero units.
///
/// `0` → `0:00`, `5_000` → `0:05`, `65_000` → `01:05`, `3_723_000` → `01:02:03`.
pub fn build_time_code(ms: u64) -> String {
    let parts = TimeParts::from_ms(ms);
    let units = [parts.days, parts.hours, parts.minutes, parts.seconds];
    let first = units.iter().position(|u| *u != 0).unwrap_or(units.len() - 1);

    let code = units[first..]
        .iter()
        .map(|u| format!("{u:02}"))
        .collect::<Vec<_>>()
        .join(":");

    if code.len() <= 3 {
        format!("0:{code}")
    } else {
        code
    }
}

/// Parses `hh:mm:ss` / `mm:ss` / `ss` back into milliseconds.
pub fn parse_time_code(code: &str) -> Option<u64> {
    code.split(':')
        .rev()
        .enumerate()
        .try_fold(0u64, |acc, (i, unit)| {
            let value: u64 = unit.trim().parse().ok()?;
            Some(acc + value * 60u64.pow(i as u32) * 1000)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_time_code() {
        assert_eq!(build_time_code(0), "0:00");
        assert_eq!(build_time_code(5_000), "0:05");
        assert_eq!(build_time_code(65_000), "01:05");
        assert_eq!(build_time_code(3_723_000), "01:02:03");
        assert_eq!(build_time_code(90_061_000), "01:01:01:01");
    }

    #[test]
    fn test_parse_time_code() {
        assert_eq!(parse_time_code("3:45"), Some(225_000));
        assert_eq!(parse_time_code("01:02:03"), Some(3_723_000));
        assert_eq!(parse_time_code("42"), Some(42_000));
        assert_eq!(parse_time_code("abc"), None);
    }
}
