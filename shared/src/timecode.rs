/// Timestamp parsing and trim window resolution.
///
/// Accepts `S`, `M:S` and `H:M:S` where every component is a non-negative
/// integer. Components are not range-checked, so `"90"` and `"1:75"` are both
/// valid. Fractional seconds are rejected rather than truncated.
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Parse a human-entered timestamp into whole seconds.
pub fn to_seconds(text: &str) -> Result<u64, ValidationError> {
    let malformed = || ValidationError::MalformedTimestamp(text.to_string());

    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.len() > 3 {
        return Err(malformed());
    }

    parts.iter().try_fold(0u64, |total, part| {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let value: u64 = part.parse().map_err(|_| malformed())?;
        total
            .checked_mul(60)
            .and_then(|t| t.checked_add(value))
            .ok_or_else(malformed)
    })
}

/// Seconds between two timestamps. The end must come after the start.
pub fn calculate_duration(start: &str, end: &str) -> Result<u64, ValidationError> {
    let start_secs = to_seconds(start)?;
    let end_secs = to_seconds(end)?;
    if end_secs <= start_secs {
        return Err(ValidationError::EmptyTrimWindow {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(end_secs - start_secs)
}

/// Render seconds as `HH:MM:SS`.
pub fn format_hms(seconds: u64) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// Resolved clip bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start_seconds: Option<u64>,
    pub end_seconds: Option<u64>,
}

impl TrimWindow {
    /// Resolve optional bounds. `None` means no trimming at all.
    pub fn resolve(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, ValidationError> {
        let window = match (start, end) {
            (None, None) => return Ok(None),
            (Some(start), Some(end)) => {
                let duration = calculate_duration(start, end)?;
                let start_seconds = to_seconds(start)?;
                TrimWindow {
                    start_seconds: Some(start_seconds),
                    end_seconds: Some(start_seconds + duration),
                }
            }
            (Some(start), None) => TrimWindow {
                start_seconds: Some(to_seconds(start)?),
                end_seconds: None,
            },
            (None, Some(end)) => {
                let end_seconds = to_seconds(end)?;
                if end_seconds == 0 {
                    return Err(ValidationError::EmptyTrimWindow {
                        start: "0".to_string(),
                        end: end.to_string(),
                    });
                }
                TrimWindow {
                    start_seconds: None,
                    end_seconds: Some(end_seconds),
                }
            }
        };
        Ok(Some(window))
    }

    /// Clip length, only known when both bounds are present.
    pub fn duration_seconds(&self) -> Option<u64> {
        match (self.start_seconds, self.end_seconds) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_forms() {
        assert_eq!(to_seconds("45").unwrap(), 45);
        assert_eq!(to_seconds("1:00").unwrap(), 60);
        assert_eq!(to_seconds("1:30").unwrap(), 90);
        assert_eq!(to_seconds("01:02:03").unwrap(), 3723);
        assert_eq!(to_seconds(" 2:05 ").unwrap(), 125);
        assert_eq!(to_seconds("1:75").unwrap(), 135);
    }

    #[test]
    fn test_increasing_in_magnitude() {
        let ordered = ["0", "59", "1:00", "1:30", "10:00", "1:00:00", "1:00:01", "2:00:00"];
        let secs: Vec<u64> = ordered.iter().map(|t| to_seconds(t).unwrap()).collect();
        assert!(secs.windows(2).all(|w| w[0] < w[1]), "{:?}", secs);
    }

    #[test]
    fn test_malformed() {
        for bad in ["", "abc", "1:xx", "1.5", "1:2:3:4", "-5", "1::2", "+3", "99999999999999999999"] {
            assert_eq!(
                to_seconds(bad),
                Err(ValidationError::MalformedTimestamp(bad.to_string())),
                "input {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_calculate_duration() {
        assert_eq!(calculate_duration("00:01:00", "00:02:30").unwrap(), 90);
        assert_eq!(calculate_duration("10", "1:00").unwrap(), 50);
    }

    #[test]
    fn test_end_before_start_rejected() {
        assert!(matches!(
            calculate_duration("2:00", "1:00"),
            Err(ValidationError::EmptyTrimWindow { .. })
        ));
        assert!(matches!(
            calculate_duration("1:00", "60"),
            Err(ValidationError::EmptyTrimWindow { .. })
        ));
    }

    #[test]
    fn test_resolve_window() {
        assert_eq!(TrimWindow::resolve(None, None).unwrap(), None);

        let both = TrimWindow::resolve(Some("0:10"), Some("0:40")).unwrap().unwrap();
        assert_eq!(both.start_seconds, Some(10));
        assert_eq!(both.duration_seconds(), Some(30));

        let start_only = TrimWindow::resolve(Some("1:00"), None).unwrap().unwrap();
        assert_eq!(start_only.start_seconds, Some(60));
        assert_eq!(start_only.duration_seconds(), None);

        let end_only = TrimWindow::resolve(None, Some("2:00")).unwrap().unwrap();
        assert_eq!(end_only.end_seconds, Some(120));
        assert_eq!(end_only.duration_seconds(), None);

        assert!(TrimWindow::resolve(Some("x"), None).is_err());
        assert!(TrimWindow::resolve(None, Some("0")).is_err());
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3723), "01:02:03");
    }
}
