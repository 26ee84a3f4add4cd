//! Operator-facing duration rendering.
//!
//! Policy messages render durations the way existing operator tooling parses
//! them: hours, minutes and fractional seconds, e.g. `4m0s`, `24h0m0s`,
//! `1.5s`, `250ms`.

use std::{fmt, time::Duration};

/// Displays a [`Duration`] in `h`/`m`/`s` notation.
///
/// ```
/// use std::time::Duration;
/// use privca_provisioner::duration::HumanDuration;
///
/// assert_eq!(HumanDuration(Duration::from_secs(240)).to_string(), "4m0s");
/// assert_eq!(HumanDuration(Duration::from_secs(86_400)).to_string(), "24h0m0s");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0;
        if d.is_zero() {
            return f.write_str("0s");
        }

        let secs = d.as_secs();
        let nanos = d.subsec_nanos();

        if secs == 0 {
            return match nanos {
                n if n < 1_000 => write!(f, "{n}ns"),
                n if n < 1_000_000 => write!(f, "{}µs", fraction(n / 1_000, n % 1_000, 3)),
                n => write!(f, "{}ms", fraction(n / 1_000_000, n % 1_000_000, 6)),
            };
        }

        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if hours > 0 || minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        write!(f, "{}s", fraction(u32::try_from(seconds).unwrap_or(u32::MAX), nanos, 9))
    }
}

/// Renders `whole.frac` with the fractional part padded to `width` digits and
/// trailing zeros removed.
fn fraction(whole: u32, frac: u32, width: usize) -> String {
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
